//! Byte sources feeding the response decoder.

use crate::error::DecodeError;
use std::io::{ErrorKind, Read};
use tracing::trace;

/// Outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// This many bytes were placed at the front of the destination.
    Data(usize),
    /// The peer closed its writing direction.
    EndOfStream,
}

/// Something the decoder can pull raw response bytes from.
///
/// Chunk boundaries carry no meaning; a source may hand out a single byte or
/// everything it has.
pub trait ByteSource {
    /// Read the next chunk into `dst`, blocking until data arrives, the
    /// stream ends, or the read timeout expires.
    ///
    /// `dst` is never empty.
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<Chunk, DecodeError>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<Chunk, DecodeError> {
        (**self).read_chunk(dst)
    }
}

/// Adapts any blocking `Read` (typically a `TcpStream` with a read timeout).
///
/// A read that times out surfaces as `WouldBlock` or `TimedOut` depending on
/// the platform; both become `DecodeError::Timeout`.
pub struct ReadSource<R> {
    inner: R,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<Chunk, DecodeError> {
        debug_assert!(!dst.is_empty(), "read_chunk with empty destination");
        loop {
            match self.inner.read(dst) {
                Ok(0) => {
                    trace!("End of stream");
                    return Ok(Chunk::EndOfStream);
                }
                Ok(n) => {
                    trace!(bytes = n, "Read chunk");
                    return Ok(Chunk::Data(n));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(DecodeError::Timeout);
                }
                Err(e) => return Err(DecodeError::ConnectionError(e)),
            }
        }
    }
}
