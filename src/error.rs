//! Error types for the server.
//!
//! Every error raised while servicing a connection is resolved by tearing
//! that connection down. Only [`ServerError`] is fatal to the process.

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

/// Malformed framing on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than a full header's worth of bytes were available.
    #[error("incomplete header")]
    Incomplete,

    /// The type byte is neither TEXT nor BINARY.
    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// A TEXT message announced more bytes than the server buffers in memory.
    #[error("text payload of {len} bytes exceeds limit of {max}")]
    TextTooLarge { len: u64, max: u64 },

    /// A TEXT payload did not decode as UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors that terminate a single connection.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    /// A BINARY message arrived without a preceding `put`.
    #[error("binary payload without a pending upload")]
    UnexpectedBinary,

    /// The connection was removed (evicted or torn down) while a job held it.
    #[error("connection already closed")]
    Closed,
}

impl ConnError {
    /// Whether this is an ordinary end of the conversation rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnError::PeerClosed | ConnError::Closed => true,
            ConnError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Fatal setup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures seen by the blocking client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("server closed the connection")]
    Closed,

    /// The server answered with a TEXT error instead of the expected reply.
    #[error("server replied: {0}")]
    Server(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(ConnError::PeerClosed.is_disconnect());
        assert!(ConnError::Closed.is_disconnect());
        assert!(ConnError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_disconnect());
        assert!(!ConnError::Protocol(FrameError::UnknownType(7)).is_disconnect());
        assert!(!ConnError::UnexpectedBinary.is_disconnect());
    }

    #[test]
    fn test_frame_error_display() {
        assert_eq!(
            FrameError::UnknownType(2).to_string(),
            "unknown message type: 0x02"
        );
        assert_eq!(
            FrameError::TextTooLarge { len: 10, max: 4 }.to_string(),
            "text payload of 10 bytes exceeds limit of 4"
        );
    }
}
