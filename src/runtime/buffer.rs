//! Fixed-capacity scratch buffers.
//!
//! Each connection owns one read and one write scratch buffer. They only
//! relay bytes between the socket and the logical receive/transmit channel;
//! between reactor iterations the only thing a scratch buffer ever holds is
//! bytes that have been pulled from a channel but not yet accepted by the
//! socket.

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};

/// A relay buffer that never grows past its capacity.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ScratchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Room left before the buffer is full.
    pub fn spare(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Buffered bytes not yet relayed.
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    /// Direct access for encoders that append in place (headers).
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append at most `limit` bytes from `src` with a single read call.
    ///
    /// Returns the number of bytes read; `Ok(0)` with a non-zero limit means
    /// end of stream.
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R, limit: usize) -> io::Result<usize> {
        let want = limit.min(self.spare());
        if want == 0 {
            return Ok(0);
        }

        let start = self.buf.len();
        self.buf.resize(start + want, 0);
        match src.read(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Push buffered bytes to `dst` with a single write call and drop
    /// whatever was accepted.
    pub fn drain_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<usize> {
        let n = dst.write(&self.buf)?;
        self.buf.advance(n);
        Ok(n)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that accepts at most `limit` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fill_respects_limit_and_capacity() {
        let mut scratch = ScratchBuffer::new(8);
        let mut src = &b"hello world, this is long"[..];

        assert_eq!(scratch.fill_from(&mut src, 5).unwrap(), 5);
        assert_eq!(scratch.chunk(), b"hello");
        assert_eq!(scratch.spare(), 3);

        // Capacity caps the read even with a generous limit.
        assert_eq!(scratch.fill_from(&mut src, 100).unwrap(), 3);
        assert_eq!(scratch.chunk(), b"hello wo");
        assert_eq!(scratch.fill_from(&mut src, 100).unwrap(), 0);
    }

    #[test]
    fn test_fill_error_leaves_buffer_intact() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }

        let mut scratch = ScratchBuffer::new(8);
        scratch.fill_from(&mut &b"ab"[..], 2).unwrap();
        assert!(scratch.fill_from(&mut Broken, 4).is_err());
        assert_eq!(scratch.chunk(), b"ab");
    }

    #[test]
    fn test_partial_drain_keeps_unsent_bytes() {
        let mut scratch = ScratchBuffer::new(16);
        scratch.fill_from(&mut &b"abcdefgh"[..], 16).unwrap();

        let mut sink = Trickle {
            out: Vec::new(),
            limit: 3,
        };
        assert_eq!(scratch.drain_to(&mut sink).unwrap(), 3);
        assert_eq!(scratch.chunk(), b"defgh");
        assert_eq!(scratch.drain_to(&mut sink).unwrap(), 3);
        assert_eq!(scratch.drain_to(&mut sink).unwrap(), 2);
        assert!(scratch.is_empty());
        assert_eq!(sink.out, b"abcdefgh");
    }
}
