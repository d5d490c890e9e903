pub mod allocator;
pub mod config;
pub mod dns;
pub mod error;

pub use allocator::{FakeIp, Stats, INVALID_ADDRESS};
pub use config::Config;
pub use error::{Error, Result};
