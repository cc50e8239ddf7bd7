//! Per-connection receive buffer.
//!
//! Holds bytes read from a participant that have not yet been framed into a
//! message. Growth is chunk based: before every read the buffer guarantees a
//! full chunk of free space, doubling its capacity when it cannot. Capacity
//! never shrinks, and consumed prefixes are compacted to the front.

use crate::error::{RelayError, Result};

/// Growable byte buffer with explicit length and capacity.
///
/// `storage.len()` is the allocated capacity; `len` counts the valid bytes at
/// the front of it.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    storage: Vec<u8>,
    len: usize,
}

impl RecvBuffer {
    /// Create an empty buffer. Nothing is allocated until the first read.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The unconsumed bytes, in arrival order.
    pub fn data(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Make room for one receive of up to `chunk` bytes.
    ///
    /// An unallocated buffer starts at `chunk`; otherwise capacity doubles
    /// whenever `len + chunk` would not fit. Existing bytes are preserved.
    pub fn reserve_chunk(&mut self, chunk: usize) -> Result<()> {
        let capacity = self.capacity();
        let mut target = if capacity == 0 { chunk } else { capacity };
        while self.len + chunk > target {
            target <<= 1;
        }
        if target == capacity {
            return Ok(());
        }

        self.storage
            .try_reserve_exact(target - capacity)
            .map_err(|_| RelayError::Alloc { requested: target })?;
        self.storage.resize(target, 0);
        Ok(())
    }

    /// Free space after the valid bytes, for a read to fill.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.len..]
    }

    /// Record `n` bytes written into the spare space.
    ///
    /// Returns the length before the commit.
    pub fn commit(&mut self, n: usize) -> usize {
        debug_assert!(self.len + n <= self.capacity(), "commit past capacity");
        let previous = self.len;
        self.len = (self.len + n).min(self.capacity());
        previous
    }

    /// Drop the first `n` bytes, shifting the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        if n < self.len {
            self.storage.copy_within(n..self.len, 0);
        }
        self.len -= n;
    }

    /// Copy bytes in directly, growing as needed.
    #[cfg(test)]
    pub fn extend(&mut self, bytes: &[u8], chunk: usize) -> Result<usize> {
        self.reserve_chunk(chunk.max(bytes.len()))?;
        self.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(self.commit(bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 65536;

    #[test]
    fn test_unallocated_until_first_reserve() {
        let mut buf = RecvBuffer::new();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.len(), 0);

        buf.reserve_chunk(CHUNK).unwrap();
        assert_eq!(buf.capacity(), CHUNK);
        assert_eq!(buf.spare_mut().len(), CHUNK);
    }

    #[test]
    fn test_doubles_when_next_chunk_would_overflow() {
        let mut buf = RecvBuffer::new();
        buf.reserve_chunk(CHUNK).unwrap();

        buf.spare_mut()[0] = b'a';
        buf.commit(1);

        // 1 + CHUNK no longer fits in CHUNK
        buf.reserve_chunk(CHUNK).unwrap();
        assert_eq!(buf.capacity(), 2 * CHUNK);
        assert_eq!(buf.data(), b"a");

        // Still room for a whole chunk, so no growth
        buf.reserve_chunk(CHUNK).unwrap();
        assert_eq!(buf.capacity(), 2 * CHUNK);
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut buf = RecvBuffer::new();
        let mut last = 0;

        for round in 0..5 {
            buf.reserve_chunk(CHUNK).unwrap();
            let spare = buf.spare_mut().len();
            buf.commit(spare);
            assert!(buf.capacity() >= last);
            assert_eq!(buf.capacity(), CHUNK << round);
            last = buf.capacity();
        }

        buf.consume(buf.len());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), last);
    }

    #[test]
    fn test_consume_compacts_remainder() {
        let mut buf = RecvBuffer::new();
        buf.extend(b"hello world", 16).unwrap();

        buf.consume(6);
        assert_eq!(buf.data(), b"world");
        assert_eq!(buf.len(), 5);

        buf.consume(100);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_commit_returns_previous_length() {
        let mut buf = RecvBuffer::new();
        assert_eq!(buf.extend(b"abc", 16).unwrap(), 0);
        assert_eq!(buf.extend(b"de", 16).unwrap(), 3);
        assert_eq!(buf.data(), b"abcde");
    }
}
