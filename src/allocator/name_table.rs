use tracing::trace;

use super::arena::{Arena, Span};
use super::codec::ADDRESS_SPACE;
use crate::error::{Error, Result};

/// Capacity is only ever raised by this many slots, and only on insert.
pub const GROWTH_STEP: usize = 16;

/// The dalias string hash, masked to 28 bits. Stops at the first NUL.
pub fn dalias_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in name.iter().take_while(|&&b| b != 0) {
        h = h.wrapping_mul(16).wrapping_add(byte as u32);
        h ^= (h >> 24) & 0xf0;
    }
    h & 0x0fff_ffff
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    hash: u32,
    /// hostname bytes, NUL terminator included
    name: Span,
}

/// Append-only hostname table. An entry's position is its index, forever.
pub struct NameTable {
    arena: Arena,
    entries: Vec<Entry>,
    capacity: usize,
    limit: u32,
}

impl NameTable {
    pub fn new(arena: Arena, max_entries: Option<u32>) -> NameTable {
        let limit = max_entries.map_or(ADDRESS_SPACE, |max| max.min(ADDRESS_SPACE));
        NameTable {
            arena,
            entries: Vec::new(),
            capacity: 0,
            limit,
        }
    }

    /// Returns the index of `name`, inserting it when it was never seen.
    /// `name` must not contain NUL.
    pub fn lookup_or_insert(&mut self, name: &[u8]) -> Result<u32> {
        let hash = dalias_hash(name);
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.hash == hash && self.stored_name(entry) == name {
                trace!("[name table] cached: {} -> #{}", String::from_utf8_lossy(name), index);
                return Ok(index as u32);
            }
        }

        let index = self.entries.len();
        if index as u64 >= self.limit as u64 {
            return Err(Error::AddressSpaceExhausted);
        }
        if self.entries.len() == self.capacity {
            self.entries
                .try_reserve_exact(self.capacity + GROWTH_STEP - self.entries.len())
                .map_err(|_| Error::OutOfMemory)?;
            self.capacity += GROWTH_STEP;
            trace!("[name table] grew to {}", self.capacity);
        }

        let mut terminated = Vec::with_capacity(name.len() + 1);
        terminated.extend_from_slice(name);
        terminated.push(0);
        let span = self.arena.allocate(&terminated)?;
        self.entries.push(Entry { hash, name: span });
        trace!("[name table] new entry #{} for {}", index, String::from_utf8_lossy(name));
        Ok(index as u32)
    }

    /// Hostname bytes without terminator.
    pub fn hostname_for_index(&self, index: u32) -> Option<&[u8]> {
        self.entries
            .get(index as usize)
            .map(|entry| self.stored_name(entry))
    }

    fn stored_name(&self, entry: &Entry) -> &[u8] {
        let stored = self.arena.get(entry.name);
        &stored[..stored.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn arena_bytes(&self) -> usize {
        self.arena.bytes_used()
    }
}
