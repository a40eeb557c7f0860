//! Blocking client.
//!
//! Speaks the same framing as the server over a plain `std` socket. Every
//! inbound message is buffered whole, which is fine for the sizes a CLI
//! moves around.

use crate::error::ClientError;
use crate::protocol::{FrameDecoder, Header, MessageType};
use bytes::Bytes;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

const READ_CHUNK: usize = 64 * 1024;

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Message {
    /// The payload as text, if this is a TEXT message.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageType::Text => std::str::from_utf8(&self.payload).ok(),
            MessageType::Binary => None,
        }
    }

    fn into_server_error(self) -> ClientError {
        match self.as_text() {
            Some(text) => ClientError::Server(text.to_string()),
            None => ClientError::Server(format!("unexpected {} byte binary reply", self.payload.len())),
        }
    }
}

pub struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(u64::MAX),
            buf: vec![0; READ_CHUNK],
        })
    }

    /// Bound how long `recv` waits for the server.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send(&mut self, kind: MessageType, payload: &[u8]) -> Result<(), ClientError> {
        let header = Header::new(payload.len() as u64, kind);
        self.stream.write_all(&header.to_bytes())?;
        self.stream.write_all(payload)?;
        Ok(())
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(MessageType::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.send(MessageType::Binary, data)
    }

    /// Block until one full message arrives.
    pub fn recv(&mut self) -> Result<Message, ClientError> {
        loop {
            if let Some((kind, payload)) = self.decoder.decode()? {
                return Ok(Message { kind, payload });
            }
            let n = self.stream.read(&mut self.buf)?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Send a TEXT command and wait for its reply.
    pub fn command(&mut self, command: &str) -> Result<Message, ClientError> {
        self.send_text(command)?;
        self.recv()
    }

    /// Names in the server's data root.
    pub fn list(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.command("list")?;
        let text = reply
            .as_text()
            .ok_or_else(|| reply.clone().into_server_error())?;
        Ok(text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch `name` into `dest`. Returns the number of bytes written.
    pub fn download(&mut self, name: &str, dest: &Path) -> Result<u64, ClientError> {
        let reply = self.command(&format!("get {name}"))?;
        if reply.kind != MessageType::Binary {
            return Err(reply.into_server_error());
        }
        fs::write(dest, &reply.payload)?;
        Ok(reply.payload.len() as u64)
    }

    /// Store the file at `path` on the server as `name`. Returns the byte
    /// count the server acknowledged.
    pub fn upload(&mut self, path: &Path, name: &str) -> Result<u64, ClientError> {
        let data = fs::read(path)?;

        let reply = self.command(&format!("put {name}"))?;
        if !reply.as_text().is_some_and(|t| t.starts_with("ready ")) {
            return Err(reply.into_server_error());
        }

        self.send_binary(&data)?;
        let reply = self.recv()?;
        reply
            .as_text()
            .and_then(|t| t.strip_prefix("stored "))
            .and_then(|rest| rest.rsplit(' ').next())
            .and_then(|bytes| bytes.parse().ok())
            .ok_or_else(|| reply.clone().into_server_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text() {
        let text = Message {
            kind: MessageType::Text,
            payload: Bytes::from_static(b"file not exists"),
        };
        assert_eq!(text.as_text(), Some("file not exists"));
        assert!(matches!(
            text.into_server_error(),
            ClientError::Server(s) if s == "file not exists"
        ));

        let binary = Message {
            kind: MessageType::Binary,
            payload: Bytes::from_static(b"abc"),
        };
        assert_eq!(binary.as_text(), None);
    }
}
