use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};

use super::arena::Arena;
use super::codec::{address_to_index, index_to_address, INVALID_ADDRESS};
use super::name_table::NameTable;
use super::protocol::{
    fatal, recv_message_blocking, send_message, FrameReceiver, FrameSender, Message, MsgKind,
};
use crate::config::Config;
use crate::error::{Error, Result};

pub const STATS_LEN: usize = 24;

/// Sole owner of the name table. Handles one request at a time, so the table
/// needs no locking.
pub struct Worker {
    table: NameTable,
    subnet: u8,
    requests: FrameReceiver,
    responses: FrameSender,
    /// dropped together with the worker when its loop ends
    running: Arc<()>,
}

impl Worker {
    pub fn new(config: &Config, requests: FrameReceiver, responses: FrameSender) -> Worker {
        let arena = Arena::new(config.arena_limit);
        Worker {
            table: NameTable::new(arena, config.max_entries),
            subnet: config.subnet,
            requests,
            responses,
            running: Arc::new(()),
        }
    }

    /// Upgrades only while the worker exists.
    pub fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.running)
    }

    /// Runs the receive loop on a dedicated OS thread.
    pub fn spawn(self, stack_size: usize) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("fakeip-worker".to_string())
            .stack_size(stack_size)
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        debug!("[worker] started, subnet {}", self.subnet);
        loop {
            let request = match recv_message_blocking(&mut self.requests) {
                Ok(request) => request,
                Err(Error::ChannelFailure) => {
                    debug!("[worker] request channel closed");
                    break;
                }
                Err(e) => fatal(e),
            };
            let response = match self.handle(request) {
                Ok(Some(response)) => response,
                Ok(None) => {
                    debug!("[worker] exit requested");
                    break;
                }
                Err(e) => fatal(e),
            };
            if let Err(e) = send_message(&self.responses, &response) {
                warn!("[worker] dropping response #{}: {}", response.seq, e);
            }
        }
        debug!("[worker] stopped with {} entries", self.table.len());
    }

    /// `Ok(None)` ends the loop. Errors are contract violations only.
    fn handle(&mut self, request: Message) -> Result<Option<Message>> {
        let seq = request.seq;
        match request.kind {
            MsgKind::GetIp => {
                let ip = self.ip_for_host(&request.payload)?;
                Ok(Some(Message::new(MsgKind::GetIp, seq, &ip.octets())))
            }
            MsgKind::GetName => {
                let octets: [u8; 4] = request.payload.as_slice().try_into().map_err(|_| {
                    Error::ContractViolation(format!(
                        "GetName payload of {} bytes",
                        request.payload.len()
                    ))
                })?;
                let index = address_to_index(Ipv4Addr::from(octets));
                // empty payload means not found
                let mut payload = Vec::new();
                if let Some(name) = self.table.hostname_for_index(index) {
                    payload.reserve_exact(name.len() + 1);
                    payload.extend_from_slice(name);
                    payload.push(0);
                }
                Ok(Some(Message::new(MsgKind::GetName, seq, &payload)))
            }
            MsgKind::Stats => {
                let mut payload = [0u8; STATS_LEN];
                LittleEndian::write_u64(&mut payload[0..8], self.table.len() as u64);
                LittleEndian::write_u64(&mut payload[8..16], self.table.capacity() as u64);
                LittleEndian::write_u64(&mut payload[16..24], self.table.arena_bytes() as u64);
                Ok(Some(Message::new(MsgKind::Stats, seq, &payload)))
            }
            MsgKind::Exit => Ok(None),
        }
    }

    fn ip_for_host(&mut self, payload: &[u8]) -> Result<Ipv4Addr> {
        let name = match payload.split_last() {
            Some((&0, name)) if !name.is_empty() && !name.contains(&0) => name,
            _ => {
                return Err(Error::ContractViolation(
                    "GetIp payload is not a terminated hostname".to_string(),
                ))
            }
        };
        let allocated = self
            .table
            .lookup_or_insert(name)
            .and_then(|index| index_to_address(index, self.subnet));
        match allocated {
            Ok(ip) => {
                trace!("[worker] {} -> {}", String::from_utf8_lossy(name), ip);
                Ok(ip)
            }
            Err(e) => {
                warn!("[worker] no address for {}: {}", String::from_utf8_lossy(name), e);
                Ok(INVALID_ADDRESS)
            }
        }
    }
}
