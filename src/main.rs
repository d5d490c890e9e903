use std::process::ExitCode;

use clap::{arg, command, value_parser, Arg, ArgAction};
use gg_fakeip::config::DEFAULT_SUBNET;
use gg_fakeip::{Config, FakeIp, INVALID_ADDRESS};
use tracing::level_filters::LevelFilter;
use tracing::{error, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// One fmt layer writing through `writer`, filtered by `filter`.
fn build_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_level(true)
            .compact(),
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = command!()
        .arg(
            Arg::new("debug")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::SetTrue)
                .help("Activate debug mode"),
        )
        .arg(
            Arg::new("subnet")
                .short('s')
                .long("subnet")
                .value_parser(value_parser!(u8))
                .action(ArgAction::Set)
                .help("First octet of every synthetic address [default: 224]"),
        )
        .arg(
            Arg::new("max_entries")
                .long("max-entries")
                .value_parser(value_parser!(u32))
                .action(ArgAction::Set)
                .help("Maximum number of distinct hostnames"),
        )
        .arg(
            Arg::new("arena_limit")
                .long("arena-limit")
                .value_parser(value_parser!(usize))
                .action(ArgAction::Set)
                .help("Maximum number of bytes kept for hostnames"),
        )
        .arg(arg!([HOSTNAME] ... "Hostnames to map").trailing_var_arg(true))
        .get_matches();

    let debug = matches.get_flag("debug");
    let subnet = matches
        .get_one::<u8>("subnet")
        .copied()
        .unwrap_or(DEFAULT_SUBNET);
    let mut config = Config::new().with_subnet(subnet);
    if let Some(max_entries) = matches.get_one::<u32>("max_entries") {
        config = config.with_max_entries(*max_entries);
    }
    if let Some(limit) = matches.get_one::<usize>("arena_limit") {
        config = config.with_arena_limit(*limit);
    }
    let hostnames: Vec<&String> = matches
        .get_many::<String>("HOSTNAME")
        .map(|hosts| hosts.collect())
        .unwrap_or_default();

    let mut log_level = LevelFilter::WARN;
    if debug {
        log_level = LevelFilter::TRACE;
    }
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing::subscriber::set_global_default(build_subscriber(filter, writer))
        .expect("Failed to set default subscriber");

    let fake_ip = match FakeIp::init(config) {
        Ok(fake_ip) => fake_ip,
        Err(e) => {
            error!("failed to start allocator: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for host in hostnames {
        let ip = fake_ip.get_ip_for_host(host).await;
        if ip == INVALID_ADDRESS {
            println!("{} -> (no address)", host);
            continue;
        }
        let back = fake_ip.get_host_for_ip(ip).await.unwrap_or_default();
        println!("{} -> {} -> {}", host, ip, back);
    }
    if let Some(stats) = fake_ip.stats().await {
        println!(
            "{} entries, capacity {}, {} bytes",
            stats.entries, stats.capacity, stats.arena_bytes
        );
    }
    if let Err(e) = fake_ip.shutdown() {
        error!("shutdown failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_lines(filter: &str, emit: impl FnOnce()) -> Vec<String> {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = build_subscriber(EnvFilter::new(filter), move || writer.clone());
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_each_event_is_written_once() {
        let lines = captured_lines("trace", || {
            tracing::warn!("[worker] exit requested");
            tracing::trace!("[fakeip] shut down");
        });
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.iter().filter(|l| l.contains("exit requested")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.contains("shut down")).count(), 1);
    }

    #[test]
    fn test_filter_drops_lower_levels() {
        let lines = captured_lines("warn", || {
            tracing::debug!("hidden");
            tracing::error!("failed to start allocator");
        });
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("failed to start allocator"));
    }
}
