//! Receive and transmit channels.
//!
//! A channel is the logical source or sink of one message's payload: an
//! in-memory buffer for TEXT messages or a file handle for BINARY ones. The
//! variant alone determines the message type.

use crate::error::FrameError;
use crate::protocol::MessageType;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Seekable byte source or sink backing one message.
#[derive(Debug)]
pub enum Channel {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

impl Channel {
    /// Empty in-memory sink for an inbound TEXT message.
    pub fn memory() -> Self {
        Channel::Memory(Cursor::new(Vec::new()))
    }

    /// In-memory source for an outbound TEXT message.
    pub fn text(text: impl Into<String>) -> Self {
        Channel::Memory(Cursor::new(text.into().into_bytes()))
    }

    pub fn file(file: File) -> Self {
        Channel::File(file)
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Channel::Memory(_) => MessageType::Text,
            Channel::File(_) => MessageType::Binary,
        }
    }

    /// Total size in bytes.
    pub fn size(&self) -> io::Result<u64> {
        match self {
            Channel::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
            Channel::File(file) => Ok(file.metadata()?.len()),
        }
    }

    /// Decode an in-memory channel as UTF-8 text.
    pub fn into_text(self) -> Result<String, FrameError> {
        match self {
            Channel::Memory(cursor) => {
                String::from_utf8(cursor.into_inner()).map_err(|_| FrameError::InvalidUtf8)
            }
            Channel::File(_) => Err(FrameError::InvalidUtf8),
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Memory(cursor) => cursor.read(buf),
            Channel::File(file) => file.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Memory(cursor) => cursor.write(buf),
            Channel::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Memory(_) => Ok(()),
            Channel::File(file) => file.flush(),
        }
    }
}

impl Seek for Channel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Channel::Memory(cursor) => cursor.seek(pos),
            Channel::File(file) => file.seek(pos),
        }
    }
}
