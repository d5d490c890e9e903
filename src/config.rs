use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use lazy_static::lazy_static;

use crate::error::{Error, Result};

pub const DEFAULT_SUBNET: u8 = 224;

lazy_static! {
    pub static ref DEFAULT_NETWORK: Ipv4Network =
        Ipv4Network::new(Ipv4Addr::new(DEFAULT_SUBNET, 0, 0, 0), 8).unwrap();
}

#[derive(Debug, Clone)]
pub struct Config {
    pub subnet: u8,
    /// Optional cap on distinct hostnames, below what the address codec allows.
    pub max_entries: Option<u32>,
    pub arena_limit: Option<usize>,
    pub worker_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subnet: DEFAULT_SUBNET,
            max_entries: None,
            arena_limit: None,
            worker_stack_size: 64 * 1024,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_subnet(mut self, subnet: u8) -> Self {
        self.subnet = subnet;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    #[must_use]
    pub fn with_arena_limit(mut self, limit: usize) -> Self {
        self.arena_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_worker_stack_size(mut self, size: usize) -> Self {
        self.worker_stack_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        // 255.255.255.255 is the invalid sentinel, a 255 subnet would hand it out.
        if self.subnet == 0 || self.subnet == 255 {
            return Err(Error::InvalidConfig(format!(
                "subnet {} is not usable for synthetic addresses",
                self.subnet
            )));
        }
        if self.max_entries == Some(0) {
            return Err(Error::InvalidConfig("max_entries must be positive".to_string()));
        }
        Ok(())
    }

    pub fn network(&self) -> Ipv4Network {
        if self.subnet == DEFAULT_SUBNET {
            return *DEFAULT_NETWORK;
        }
        // A /8 prefix is always valid.
        Ipv4Network::new(Ipv4Addr::new(self.subnet, 0, 0, 0), 8).unwrap_or(*DEFAULT_NETWORK)
    }
}
