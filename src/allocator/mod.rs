//! Fake-IP allocator. A single worker thread owns the table and [`FakeIp`]
//! is the front end. One request is in flight at a time, and failures come
//! back as [`INVALID_ADDRESS`] or `None`, never as errors.

use std::net::Ipv4Addr;
use std::sync::Weak;
use std::thread::JoinHandle;

use byteorder::{ByteOrder, LittleEndian};
use ipnetwork::Ipv4Network;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use self::protocol::{
    fatal, recv_message, recv_message_blocking, send_message, FrameReceiver, FrameSender,
    Message, MsgKind, MSG_LEN_MAX,
};
use self::worker::{Worker, STATS_LEN};
use crate::config::Config;
use crate::error::{Error, Result};

mod arena;
pub mod codec;
mod name_table;
pub mod protocol;
mod worker;

pub use self::codec::{address_to_index, index_to_address, INVALID_ADDRESS};
pub use self::name_table::dalias_hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub entries: u64,
    pub capacity: u64,
    pub arena_bytes: u64,
}

/// The channel pair. Only whoever holds the gate touches it.
struct Channels {
    requests: FrameSender,
    responses: FrameReceiver,
    next_seq: u32,
}

impl Channels {
    fn request(&mut self, kind: MsgKind, payload: &[u8]) -> Result<u32> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        send_message(&self.requests, &Message::new(kind, seq, payload))?;
        Ok(seq)
    }

    async fn round_trip(&mut self, kind: MsgKind, payload: &[u8]) -> Result<Message> {
        let seq = self.request(kind, payload)?;
        loop {
            let response = recv_message(&mut self.responses).await?;
            if response.seq == seq {
                return Ok(response);
            }
            debug!("[fakeip] skipping stale response #{}", response.seq);
        }
    }

    fn round_trip_blocking(&mut self, kind: MsgKind, payload: &[u8]) -> Result<Message> {
        let seq = self.request(kind, payload)?;
        loop {
            let response = recv_message_blocking(&mut self.responses)?;
            if response.seq == seq {
                return Ok(response);
            }
            debug!("[fakeip] skipping stale response #{}", response.seq);
        }
    }
}

pub struct FakeIp {
    gate: Mutex<Channels>,
    worker: JoinHandle<()>,
    running: Weak<()>,
    network: Ipv4Network,
}

impl FakeIp {
    /// Creates the channels and the table and starts the worker thread.
    pub fn init(config: Config) -> Result<FakeIp> {
        config.validate()?;
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(&config, req_rx, resp_tx);
        let running = worker.liveness();
        let worker = worker.spawn(config.worker_stack_size)?;
        debug!("[fakeip] started for {}", config.network());
        Ok(FakeIp {
            gate: Mutex::new(Channels {
                requests: req_tx,
                responses: resp_rx,
                next_seq: 0,
            }),
            worker,
            running,
            network: config.network(),
        })
    }

    /// False once the worker loop has ended.
    pub fn is_running(&self) -> bool {
        self.running.strong_count() > 0
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    /// Whether `addr` lies in the synthetic range.
    pub fn is_synthetic(&self, addr: Ipv4Addr) -> bool {
        addr != INVALID_ADDRESS && self.network.contains(addr)
    }

    pub async fn get_ip_for_host(&self, host: &str) -> Ipv4Addr {
        let payload = match host_payload(host) {
            Some(payload) => payload,
            None => return INVALID_ADDRESS,
        };
        let response = {
            let mut channels = self.gate.lock().await;
            channels.round_trip(MsgKind::GetIp, &payload).await
        };
        absorb(response.and_then(parse_ip), "get_ip_for_host").unwrap_or(INVALID_ADDRESS)
    }

    /// Blocking form of [`FakeIp::get_ip_for_host`]. Panics inside an async
    /// runtime.
    pub fn get_ip_for_host_blocking(&self, host: &str) -> Ipv4Addr {
        let payload = match host_payload(host) {
            Some(payload) => payload,
            None => return INVALID_ADDRESS,
        };
        let response = {
            let mut channels = self.gate.blocking_lock();
            channels.round_trip_blocking(MsgKind::GetIp, &payload)
        };
        absorb(response.and_then(parse_ip), "get_ip_for_host").unwrap_or(INVALID_ADDRESS)
    }

    pub async fn get_host_for_ip(&self, addr: Ipv4Addr) -> Option<String> {
        if !self.is_synthetic(addr) {
            trace!("[fakeip] {} is not a synthetic address", addr);
            return None;
        }
        let response = {
            let mut channels = self.gate.lock().await;
            channels.round_trip(MsgKind::GetName, &addr.octets()).await
        };
        absorb(response, "get_host_for_ip").and_then(parse_name)
    }

    /// Blocking form of [`FakeIp::get_host_for_ip`]. Panics inside an async
    /// runtime.
    pub fn get_host_for_ip_blocking(&self, addr: Ipv4Addr) -> Option<String> {
        if !self.is_synthetic(addr) {
            trace!("[fakeip] {} is not a synthetic address", addr);
            return None;
        }
        let response = {
            let mut channels = self.gate.blocking_lock();
            channels.round_trip_blocking(MsgKind::GetName, &addr.octets())
        };
        absorb(response, "get_host_for_ip").and_then(parse_name)
    }

    /// Writes the hostname and a NUL terminator into `buf` and returns the
    /// hostname length. Returns 0, leaving `buf` untouched, when the address
    /// is unknown or the name doesn't fit.
    pub async fn get_host_for_ip_into(&self, addr: Ipv4Addr, buf: &mut [u8]) -> usize {
        copy_terminated(self.get_host_for_ip(addr).await, buf)
    }

    pub fn get_host_for_ip_into_blocking(&self, addr: Ipv4Addr, buf: &mut [u8]) -> usize {
        copy_terminated(self.get_host_for_ip_blocking(addr), buf)
    }

    pub async fn stats(&self) -> Option<Stats> {
        let response = {
            let mut channels = self.gate.lock().await;
            channels.round_trip(MsgKind::Stats, &[]).await
        };
        absorb(response.and_then(parse_stats), "stats")
    }

    pub fn stats_blocking(&self) -> Option<Stats> {
        let response = {
            let mut channels = self.gate.blocking_lock();
            channels.round_trip_blocking(MsgKind::Stats, &[])
        };
        absorb(response.and_then(parse_stats), "stats")
    }

    /// Stops the worker and waits for it. Owning `self` means no call can be
    /// in flight.
    pub fn shutdown(self) -> Result<()> {
        let mut channels = self.gate.into_inner();
        if let Err(e) = channels.request(MsgKind::Exit, &[]) {
            // already gone, joining below still reaps it
            warn!("[fakeip] exit request failed: {}", e);
        }
        self.worker.join().map_err(|_| Error::WorkerPanicked)?;
        drop(channels);
        debug!("[fakeip] shut down");
        Ok(())
    }
}

/// Hostname plus terminator, or `None` when it can't be sent.
fn host_payload(host: &str) -> Option<Vec<u8>> {
    if host.is_empty() || host.as_bytes().contains(&0) || host.len() + 1 > MSG_LEN_MAX {
        trace!("[fakeip] rejecting hostname of {} bytes", host.len());
        return None;
    }
    let mut payload = Vec::with_capacity(host.len() + 1);
    payload.extend_from_slice(host.as_bytes());
    payload.push(0);
    Some(payload)
}

fn absorb<T>(result: Result<T>, op: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e @ Error::ContractViolation(_)) => fatal(e),
        Err(e) => {
            warn!("[fakeip] {} failed: {}", op, e);
            None
        }
    }
}

fn parse_ip(response: Message) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = response.payload.as_slice().try_into().map_err(|_| {
        Error::ContractViolation(format!("GetIp response of {} bytes", response.payload.len()))
    })?;
    Ok(Ipv4Addr::from(octets))
}

fn parse_name(response: Message) -> Option<String> {
    let mut name = response.payload;
    // zero length means not found
    if name.pop() != Some(0) || name.is_empty() {
        return None;
    }
    String::from_utf8(name).ok()
}

fn parse_stats(response: Message) -> Result<Stats> {
    if response.payload.len() != STATS_LEN {
        return Err(Error::ContractViolation(format!(
            "Stats response of {} bytes",
            response.payload.len()
        )));
    }
    let payload = &response.payload;
    Ok(Stats {
        entries: LittleEndian::read_u64(&payload[0..8]),
        capacity: LittleEndian::read_u64(&payload[8..16]),
        arena_bytes: LittleEndian::read_u64(&payload[16..24]),
    })
}

fn copy_terminated(name: Option<String>, buf: &mut [u8]) -> usize {
    match name {
        Some(name) if name.len() < buf.len() => {
            buf[..name.len()].copy_from_slice(name.as_bytes());
            buf[name.len()] = 0;
            name.len()
        }
        _ => 0,
    }
}
