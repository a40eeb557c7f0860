//! Wire protocol.
//!
//! - `frame`: the 9-byte header and the per-direction progress trackers
//! - `command`: tokenizing TEXT payloads into a verb and arguments

pub mod command;
pub mod frame;

pub use command::Request;
pub use frame::{
    DecodeState, EncodeState, FrameDecoder, Header, Inbound, MessageType, Outbound, HEADER_SIZE,
};
