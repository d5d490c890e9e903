//! Append-only string arena. Handles are offsets, so growth never dangles them.

use crate::error::{Error, Result};

/// Handle to one allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    offset: usize,
    len: usize,
}

pub struct Arena {
    buf: Vec<u8>,
    limit: Option<usize>,
}

impl Arena {
    pub fn new(limit: Option<usize>) -> Arena {
        Arena {
            buf: Vec::new(),
            limit,
        }
    }

    /// Copies `bytes` into the arena. On failure nothing is written.
    pub fn allocate(&mut self, bytes: &[u8]) -> Result<Span> {
        let offset = self.buf.len();
        let end = offset.checked_add(bytes.len()).ok_or(Error::OutOfMemory)?;
        if let Some(limit) = self.limit {
            if end > limit {
                return Err(Error::OutOfMemory);
            }
        }
        // amortized doubling, reported instead of aborting on failure
        self.buf.try_reserve(bytes.len()).map_err(|_| Error::OutOfMemory)?;
        self.buf.extend_from_slice(bytes);
        Ok(Span {
            offset,
            len: bytes.len(),
        })
    }

    /// Resolves a handle produced by this arena.
    pub fn get(&self, span: Span) -> &[u8] {
        &self.buf[span.offset..span.offset + span.len]
    }

    pub fn bytes_used(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut arena = Arena::new(None);
        let a = arena.allocate(b"a.example\0").unwrap();
        let b = arena.allocate(b"b.example\0").unwrap();
        assert_eq!(arena.get(a), b"a.example\0");
        assert_eq!(arena.get(b), b"b.example\0");
        assert_eq!(arena.bytes_used(), 20);
    }

    #[test]
    fn test_spans_survive_growth() {
        let mut arena = Arena::new(None);
        let first = arena.allocate(b"first").unwrap();
        let big = vec![b'x'; 3 * 4096];
        let second = arena.allocate(&big).unwrap();
        for _ in 0..100 {
            arena.allocate(b"filler").unwrap();
        }
        assert_eq!(arena.get(first), b"first");
        assert_eq!(arena.get(second).len(), 3 * 4096);
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut arena = Arena::new(None);
        let mut capacity = arena.buf.capacity();
        let mut reallocations = 0;
        for _ in 0..100_000 {
            arena.allocate(b"host.example\0").unwrap();
            if arena.buf.capacity() != capacity {
                capacity = arena.buf.capacity();
                reallocations += 1;
            }
        }
        assert_eq!(arena.bytes_used(), 1_300_000);
        // fixed 4 KiB steps would take over 300 reallocations here
        assert!(reallocations < 40, "{} reallocations", reallocations);
    }

    #[test]
    fn test_limit_is_out_of_memory_without_partial_write() {
        let mut arena = Arena::new(Some(8));
        let span = arena.allocate(b"12345").unwrap();
        assert!(matches!(arena.allocate(b"6789"), Err(Error::OutOfMemory)));
        assert_eq!(arena.bytes_used(), 5);
        assert_eq!(arena.get(span), b"12345");
        assert!(arena.allocate(b"678").is_ok());
        assert_eq!(arena.bytes_used(), 8);
    }

    #[test]
    fn test_empty_allocation() {
        let mut arena = Arena::new(None);
        let span = arena.allocate(b"").unwrap();
        assert!(arena.get(span).is_empty());
        assert_eq!(arena.bytes_used(), 0);
    }
}
