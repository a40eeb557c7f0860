//! Length-prefixed message framing.
//!
//! Every message, in either direction, is a fixed 9-byte header followed by
//! the payload:
//!
//! ```text
//! +-------------------------+-----------+---------------------+
//! | length: u64, big-endian | type: u8  | payload[length]     |
//! +-------------------------+-----------+---------------------+
//! ```
//!
//! Type `0` is TEXT (UTF-8 commands and replies), type `1` is BINARY (raw
//! file contents). There is no padding and no trailer.
//!
//! Reads and writes on a non-blocking socket stop at arbitrary byte
//! boundaries, so each direction carries an explicit progress tracker:
//! [`Inbound`] for decoding and [`Outbound`] for encoding.

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed message header.
pub const HEADER_SIZE: usize = 9;

/// Payload type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Text = 0,
    Binary = 1,
}

impl MessageType {
    /// Try to convert a type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Text),
            1 => Some(MessageType::Binary),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload byte count.
    pub len: u64,
    pub kind: MessageType,
}

impl Header {
    pub fn new(len: u64, kind: MessageType) -> Self {
        Self { len, kind }
    }

    /// Parse a header from the front of `buf`, consuming exactly
    /// [`HEADER_SIZE`] bytes.
    pub fn parse(buf: &mut impl Buf) -> Result<Self, FrameError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(FrameError::Incomplete);
        }
        let len = buf.get_u64();
        let tag = buf.get_u8();
        let kind = MessageType::from_u8(tag).ok_or(FrameError::UnknownType(tag))?;
        Ok(Self { len, kind })
    }

    /// Append the encoded header to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.len);
        buf.put_u8(self.kind.as_u8());
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }
}

/// Progress through the message currently being received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Collecting header bytes.
    AwaitingHeader,
    /// Header parsed, `remaining` payload bytes still to arrive.
    AwaitingPayload { kind: MessageType, remaining: u64 },
    /// Every payload byte has arrived; the message must be handled and the
    /// tracker reset before reading resumes.
    Complete { kind: MessageType, len: u64 },
}

/// Inbound progress tracker.
///
/// The header may itself arrive split over several reads, so up to
/// [`HEADER_SIZE`] bytes are accumulated before parsing. After that the
/// remaining count bounds every read so that bytes belonging to the next
/// message are never consumed as payload.
#[derive(Debug)]
pub struct Inbound {
    header: [u8; HEADER_SIZE],
    filled: usize,
    state: DecodeState,
    max_text_len: u64,
    len: u64,
}

impl Inbound {
    pub fn new(max_text_len: u64) -> Self {
        Self {
            header: [0u8; HEADER_SIZE],
            filled: 0,
            state: DecodeState::AwaitingHeader,
            max_text_len,
            len: 0,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Maximum number of bytes the next read may take from the stream.
    pub fn read_limit(&self, capacity: usize) -> usize {
        match self.state {
            DecodeState::AwaitingHeader => HEADER_SIZE - self.filled,
            DecodeState::AwaitingPayload { remaining, .. } => {
                remaining.min(capacity as u64) as usize
            }
            DecodeState::Complete { .. } => 0,
        }
    }

    /// Accumulate header bytes. Returns the header once the last byte of it
    /// has arrived.
    pub fn push_header(&mut self, bytes: &[u8]) -> Result<Option<Header>, FrameError> {
        debug_assert!(matches!(self.state, DecodeState::AwaitingHeader));
        debug_assert!(bytes.len() <= HEADER_SIZE - self.filled);

        let end = self.filled + bytes.len();
        self.header[self.filled..end].copy_from_slice(bytes);
        self.filled = end;
        if self.filled < HEADER_SIZE {
            return Ok(None);
        }

        self.filled = 0;
        let header = Header::parse(&mut &self.header[..])?;
        if header.kind == MessageType::Text && header.len > self.max_text_len {
            return Err(FrameError::TextTooLarge {
                len: header.len,
                max: self.max_text_len,
            });
        }

        self.len = header.len;
        self.state = if header.len == 0 {
            DecodeState::Complete {
                kind: header.kind,
                len: 0,
            }
        } else {
            DecodeState::AwaitingPayload {
                kind: header.kind,
                remaining: header.len,
            }
        };
        Ok(Some(header))
    }

    /// Account for `n` payload bytes received.
    pub fn consume_payload(&mut self, n: usize) -> DecodeState {
        if let DecodeState::AwaitingPayload { kind, remaining } = self.state {
            debug_assert!(n as u64 <= remaining, "read past end of message");
            let remaining = remaining - n as u64;
            self.state = if remaining == 0 {
                DecodeState::Complete {
                    kind,
                    len: self.len,
                }
            } else {
                DecodeState::AwaitingPayload { kind, remaining }
            };
        }
        self.state
    }

    /// Start over with a fresh header.
    pub fn reset(&mut self) {
        self.filled = 0;
        self.len = 0;
        self.state = DecodeState::AwaitingHeader;
    }
}

/// Progress through the message currently being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    /// The header has not been emitted yet.
    HeaderPending,
    /// Header emitted; `remaining` payload bytes still to be pulled.
    Payload { remaining: u64 },
    /// Header and every payload byte have been handed to the scratch buffer.
    Drained,
}

/// Outbound progress tracker. Emits the header exactly once per message.
#[derive(Debug)]
pub struct Outbound {
    header: Header,
    state: EncodeState,
}

impl Outbound {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            state: EncodeState::HeaderPending,
        }
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    /// Emit the header into `buf` if it has not been written yet.
    ///
    /// Returns `true` if header bytes were appended.
    pub fn write_header(&mut self, buf: &mut impl BufMut) -> bool {
        if self.state != EncodeState::HeaderPending {
            return false;
        }
        self.header.encode(buf);
        self.state = if self.header.len == 0 {
            EncodeState::Drained
        } else {
            EncodeState::Payload {
                remaining: self.header.len,
            }
        };
        true
    }

    /// How many payload bytes may be pulled given `spare` buffer room.
    pub fn payload_limit(&self, spare: usize) -> usize {
        match self.state {
            EncodeState::Payload { remaining } => remaining.min(spare as u64) as usize,
            _ => 0,
        }
    }

    pub fn consume_payload(&mut self, n: usize) {
        if let EncodeState::Payload { remaining } = self.state {
            debug_assert!(n as u64 <= remaining);
            let remaining = remaining - n as u64;
            self.state = if remaining == 0 {
                EncodeState::Drained
            } else {
                EncodeState::Payload { remaining }
            };
        }
    }

    pub fn is_drained(&self) -> bool {
        self.state == EncodeState::Drained
    }
}


/// Incremental decoder over an in-memory byte stream.
///
/// Bytes are fed in arbitrary chunks; complete frames come out in order.
/// Used by the blocking client, where whole payloads are buffered anyway.
#[derive(Debug)]
pub struct FrameDecoder {
    inbound: Inbound,
    pending: BytesMut,
    payload: BytesMut,
}

impl FrameDecoder {
    pub fn new(max_text_len: u64) -> Self {
        Self {
            inbound: Inbound::new(max_text_len),
            pending: BytesMut::new(),
            payload: BytesMut::new(),
        }
    }

    /// Append raw bytes from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Bytes fed but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Pop the next complete frame, if all of its bytes have arrived.
    pub fn decode(&mut self) -> Result<Option<(MessageType, Bytes)>, FrameError> {
        loop {
            let limit = self.inbound.read_limit(self.pending.len());
            match self.inbound.state() {
                DecodeState::AwaitingHeader => {
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    let chunk = self.pending.split_to(limit.min(self.pending.len()));
                    if let Some(header) = self.inbound.push_header(&chunk)? {
                        self.payload.reserve(header.len.min(64 * 1024) as usize);
                    }
                }
                DecodeState::AwaitingPayload { .. } => {
                    if limit == 0 {
                        return Ok(None);
                    }
                    let chunk = self.pending.split_to(limit);
                    self.payload.extend_from_slice(&chunk);
                    self.inbound.consume_payload(limit);
                }
                DecodeState::Complete { kind, .. } => {
                    self.inbound.reset();
                    return Ok(Some((kind, self.payload.split().freeze())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        for kind in [MessageType::Text, MessageType::Binary] {
            for len in [0u64, 1, 255, 65_536, u64::MAX] {
                let header = Header::new(len, kind);
                let mut buf = BytesMut::new();
                header.encode(&mut buf);
                assert_eq!(buf.len(), HEADER_SIZE);
                let parsed = Header::parse(&mut buf).unwrap();
                assert_eq!(parsed, header);
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn test_header_is_big_endian() {
        let bytes = Header::new(0x0102, MessageType::Binary).to_bytes();
        assert_eq!(bytes, [0, 0, 0, 0, 0, 0, 0x01, 0x02, 1]);
    }

    #[test]
    fn test_parse_short_buffer() {
        let mut buf = &[0u8; 8][..];
        assert_eq!(Header::parse(&mut buf), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_parse_unknown_type() {
        let mut raw = Header::new(3, MessageType::Text).to_bytes();
        raw[8] = 7;
        assert_eq!(
            Header::parse(&mut &raw[..]),
            Err(FrameError::UnknownType(7))
        );
    }

    #[test]
    fn test_inbound_split_header() {
        let raw = Header::new(10, MessageType::Binary).to_bytes();
        let mut inbound = Inbound::new(1024);

        assert_eq!(inbound.read_limit(4096), HEADER_SIZE);
        assert_eq!(inbound.push_header(&raw[..4]).unwrap(), None);
        assert_eq!(inbound.read_limit(4096), 5);
        let header = inbound.push_header(&raw[4..]).unwrap().unwrap();
        assert_eq!(header.len, 10);
        assert_eq!(
            inbound.state(),
            DecodeState::AwaitingPayload {
                kind: MessageType::Binary,
                remaining: 10
            }
        );
    }

    #[test]
    fn test_inbound_limit_never_crosses_message() {
        let raw = Header::new(10, MessageType::Text).to_bytes();
        let mut inbound = Inbound::new(1024);
        inbound.push_header(&raw).unwrap();

        // A large buffer must still stop at the end of this payload.
        assert_eq!(inbound.read_limit(4096), 10);
        inbound.consume_payload(7);
        assert_eq!(inbound.read_limit(4096), 3);
        // And a small buffer bounds it the other way.
        assert_eq!(inbound.read_limit(2), 2);

        let state = inbound.consume_payload(3);
        assert_eq!(
            state,
            DecodeState::Complete {
                kind: MessageType::Text,
                len: 10
            }
        );
        assert_eq!(inbound.read_limit(4096), 0);

        inbound.reset();
        assert_eq!(inbound.state(), DecodeState::AwaitingHeader);
    }

    #[test]
    fn test_inbound_empty_payload_completes_on_header() {
        let raw = Header::new(0, MessageType::Text).to_bytes();
        let mut inbound = Inbound::new(1024);
        inbound.push_header(&raw).unwrap();
        assert_eq!(
            inbound.state(),
            DecodeState::Complete {
                kind: MessageType::Text,
                len: 0
            }
        );
    }

    #[test]
    fn test_inbound_rejects_oversized_text() {
        let raw = Header::new(100, MessageType::Text).to_bytes();
        let mut inbound = Inbound::new(64);
        assert_eq!(
            inbound.push_header(&raw),
            Err(FrameError::TextTooLarge { len: 100, max: 64 })
        );

        // Binary payloads are streamed to disk and not bounded.
        let raw = Header::new(100, MessageType::Binary).to_bytes();
        let mut inbound = Inbound::new(64);
        assert!(inbound.push_header(&raw).unwrap().is_some());
    }

    #[test]
    fn test_outbound_header_written_once() {
        let mut outbound = Outbound::new(Header::new(5, MessageType::Text));
        let mut buf = BytesMut::new();

        assert!(outbound.write_header(&mut buf));
        assert!(!outbound.write_header(&mut buf));
        assert_eq!(buf.len(), HEADER_SIZE);

        assert_eq!(outbound.payload_limit(3), 3);
        outbound.consume_payload(3);
        assert_eq!(outbound.payload_limit(100), 2);
        outbound.consume_payload(2);
        assert!(outbound.is_drained());
        assert_eq!(outbound.payload_limit(100), 0);
    }

    #[test]
    fn test_outbound_empty_message() {
        let mut outbound = Outbound::new(Header::new(0, MessageType::Binary));
        assert!(!outbound.is_drained());
        let mut buf = BytesMut::new();
        outbound.write_header(&mut buf);
        assert!(outbound.is_drained());
    }

    #[test]
    fn test_decoder_chunk_boundary_independence() {
        let payload = b"0123456789";
        let mut wire = Header::new(10, MessageType::Binary).to_bytes().to_vec();
        wire.extend_from_slice(payload);

        for cuts in [vec![9, 1, 1, 8], vec![9, 9, 1], vec![19], vec![3, 3, 3, 10]] {
            let mut decoder = FrameDecoder::new(1024);
            let mut frames = Vec::new();
            let mut offset = 0;
            for cut in cuts {
                decoder.extend(&wire[offset..offset + cut]);
                offset += cut;
                while let Some(frame) = decoder.decode().unwrap() {
                    frames.push(frame);
                }
            }
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].0, MessageType::Binary);
            assert_eq!(&frames[0].1[..], payload);
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn test_decoder_back_to_back_frames() {
        let mut wire = BytesMut::new();
        Header::new(2, MessageType::Text).encode(&mut wire);
        wire.extend_from_slice(b"hi");
        Header::new(0, MessageType::Text).encode(&mut wire);
        Header::new(3, MessageType::Binary).encode(&mut wire);
        wire.extend_from_slice(&[1, 2, 3]);

        let mut decoder = FrameDecoder::new(1024);
        decoder.extend(&wire);

        let (kind, body) = decoder.decode().unwrap().unwrap();
        assert_eq!((kind, &body[..]), (MessageType::Text, &b"hi"[..]));
        let (kind, body) = decoder.decode().unwrap().unwrap();
        assert_eq!((kind, body.len()), (MessageType::Text, 0));
        let (kind, body) = decoder.decode().unwrap().unwrap();
        assert_eq!((kind, &body[..]), (MessageType::Binary, &[1u8, 2, 3][..]));
        assert_eq!(decoder.decode().unwrap(), None);
    }
}
