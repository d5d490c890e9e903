use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Arena or table growth failed.
    #[error("out of memory")]
    OutOfMemory,
    /// No synthetic address left for another hostname.
    #[error("synthetic address space exhausted")]
    AddressSpaceExhausted,
    /// The request or response channel is closed.
    #[error("allocator channel failure")]
    ChannelFailure,
    /// Malformed frame or oversized payload from a trusted internal caller.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("allocator worker panicked")]
    WorkerPanicked,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("dns: {0}")]
    Dns(#[from] hickory_proto::error::ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;
