use std::mem;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::error;
use zerocopy::{AsBytes, Ref};
use zerocopy_derive::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{Error, Result};

// frame: header {kind, seq, datalen} + datalen payload bytes.
// seq is echoed back so a response left by an abandoned call gets skipped.
pub const MSG_LEN_MAX: usize = 256;

pub type FrameSender = UnboundedSender<Vec<u8>>;
pub type FrameReceiver = UnboundedReceiver<Vec<u8>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgKind {
    GetIp = 0,
    GetName = 1,
    Exit = 2,
    Stats = 3,
}

impl TryFrom<u32> for MsgKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MsgKind::GetIp),
            1 => Ok(MsgKind::GetName),
            2 => Ok(MsgKind::Exit),
            3 => Ok(MsgKind::Stats),
            other => Err(Error::ContractViolation(format!(
                "unknown message kind {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
struct MsgHeader {
    kind: u32,
    seq: u32,
    datalen: u32,
}

const HEADER_LEN: usize = mem::size_of::<MsgHeader>();

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MsgKind,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Message {
    /// Panics when `payload` is larger than [`MSG_LEN_MAX`]; callers validate
    /// lengths before building a message.
    pub fn new(kind: MsgKind, seq: u32, payload: &[u8]) -> Message {
        assert!(
            payload.len() <= MSG_LEN_MAX,
            "payload of {} bytes exceeds MSG_LEN_MAX",
            payload.len()
        );
        Message {
            kind,
            seq,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let header = MsgHeader {
            kind: self.kind as u32,
            seq: self.seq,
            datalen: self.payload.len() as u32,
        };
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Message> {
        let (header, payload): (Ref<&[u8], MsgHeader>, &[u8]) =
            Ref::new_unaligned_from_prefix(frame).ok_or_else(|| {
                Error::ContractViolation(format!("short frame of {} bytes", frame.len()))
            })?;
        let header = *header;
        let datalen = header.datalen as usize;
        if datalen > MSG_LEN_MAX {
            return Err(Error::ContractViolation(format!(
                "payload of {} bytes exceeds MSG_LEN_MAX",
                datalen
            )));
        }
        if datalen != payload.len() {
            return Err(Error::ContractViolation(format!(
                "header announces {} bytes, frame carries {}",
                datalen,
                payload.len()
            )));
        }
        Ok(Message {
            kind: MsgKind::try_from(header.kind)?,
            seq: header.seq,
            payload: payload.to_vec(),
        })
    }
}

pub fn send_message(tx: &FrameSender, msg: &Message) -> Result<()> {
    tx.send(msg.encode()).map_err(|_| Error::ChannelFailure)
}

pub async fn recv_message(rx: &mut FrameReceiver) -> Result<Message> {
    let frame = rx.recv().await.ok_or(Error::ChannelFailure)?;
    Message::decode(&frame)
}

pub fn recv_message_blocking(rx: &mut FrameReceiver) -> Result<Message> {
    let frame = rx.blocking_recv().ok_or(Error::ChannelFailure)?;
    Message::decode(&frame)
}

pub fn fatal(err: Error) -> ! {
    error!("[protocol] fatal: {}", err);
    std::process::abort()
}
