//! Frame buffer for unconsumed response bytes.
//!
//! Holds the bytes read from the connection that the parser has not yet
//! consumed. The capacity is fixed: the largest thing that ever has to sit in
//! the buffer as a whole is a filename field, which the filesystem bounds.
//! Payload bytes are drained as soon as they arrive.

use crate::error::DecodeError;

/// Fixed-capacity accumulation buffer with compaction.
///
/// The unconsumed bytes always start at offset 0. Consuming bytes shifts the
/// remainder to the front, so the free space is always one contiguous tail.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Backing storage, `capacity` bytes long.
    data: Vec<u8>,
    /// Number of unconsumed bytes at the front of `data`.
    amount: usize,
    /// Set once the source reported end-of-stream.
    end_of_stream: bool,
}

impl FrameBuffer {
    /// Create a buffer able to hold `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            amount: 0,
            end_of_stream: false,
        }
    }

    /// Create a buffer sized for two maximum-length filenames plus one byte.
    pub fn for_name_max(name_max: usize) -> Self {
        Self::new(name_max.saturating_mul(2).saturating_add(1))
    }

    /// Append a chunk at the tail.
    ///
    /// Fails with `CapacityExceeded` if the chunk does not fit; the buffer is
    /// left unchanged in that case.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        let needed = self.amount + chunk.len();
        if needed > self.capacity() {
            return Err(DecodeError::CapacityExceeded {
                needed,
                capacity: self.capacity(),
            });
        }
        self.data[self.amount..needed].copy_from_slice(chunk);
        self.amount = needed;
        Ok(())
    }

    /// Discard the first `n` bytes and compact the rest to offset 0.
    ///
    /// # Panics
    /// Panics if `n` exceeds the number of buffered bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.amount, "consume past end of frame buffer");
        self.data.copy_within(n..self.amount, 0);
        self.amount -= n;
    }

    /// True when the window can no longer grow: the buffer is at capacity or
    /// the source has ended.
    pub fn is_full(&self) -> bool {
        self.amount >= self.capacity() || self.end_of_stream
    }

    /// The unconsumed bytes.
    pub fn window(&self) -> &[u8] {
        &self.data[..self.amount]
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.amount
    }

    /// Check if the buffer holds no unconsumed bytes.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Free space at the tail.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.amount
    }

    /// Record that no more bytes will ever arrive.
    pub fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Whether the source has reported end-of-stream.
    pub fn at_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}
