//! Per-connection state.
//!
//! A connection is split into a receive half and a send half, each behind
//! its own lock. The reactor never runs two read jobs or two write jobs for
//! the same connection at once, so each lock is uncontended except when a
//! read job queues a reply on the send half.
//!
//! Both halves relay bytes through a fixed-size scratch buffer and keep
//! their position in the current message across calls, so a message may
//! span any number of non-blocking reads or writes.
//!
//! Reads pause between messages once [`MAX_QUEUED_REPLIES`] replies are
//! waiting to be sent, so a client that never reads cannot make the server
//! hold an unbounded number of open files.

use crate::commands::{Dispatcher, PendingUpload, Reply};
use crate::error::ConnError;
use crate::protocol::{DecodeState, Header, Inbound, MessageType, Outbound};
use crate::runtime::buffer::ScratchBuffer;
use crate::runtime::channel::Channel;
use crate::runtime::token::ConnId;
use mio::net::TcpStream;
use mio::Token;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, trace};

/// Unsent replies a connection may hold before its reads pause.
pub const MAX_QUEUED_REPLIES: usize = 4;

/// Sizing shared by every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnLimits {
    /// Capacity of each scratch buffer.
    pub buffer_size: usize,
    /// Largest TEXT payload accepted.
    pub max_text_len: u64,
}

/// A message received in full.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Text(String),
    /// A BINARY message was written to the file armed by `put`.
    Upload { name: String, len: u64 },
}

/// Result of pulling bytes for the current inbound message.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Message(Received),
    /// The source has nothing more right now.
    Drained,
}

/// What a read job left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadProgress {
    /// Replies were queued for sending.
    pub queued: bool,
    /// Reading stopped at a message boundary with the reply backlog full.
    /// The rest of the input stays in the socket.
    pub paused: bool,
}

/// Result of pushing queued bytes to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The socket stopped accepting bytes; unsent data is kept.
    Blocked,
    /// Everything queued has been sent.
    Idle,
}

/// Inbound side: header parsing and the active receive channel.
#[derive(Debug)]
pub struct RecvHalf {
    scratch: ScratchBuffer,
    inbound: Inbound,
    channel: Option<Channel>,
    /// Name of the upload currently streaming into `channel`.
    receiving: Option<String>,
    /// Upload opened by `put`, claimed by the next BINARY header.
    armed: Option<PendingUpload>,
}

impl RecvHalf {
    pub fn new(limits: ConnLimits) -> Self {
        Self {
            scratch: ScratchBuffer::new(limits.buffer_size),
            inbound: Inbound::new(limits.max_text_len),
            channel: None,
            receiving: None,
            armed: None,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.inbound.state()
    }

    pub fn arm_upload(&mut self, upload: PendingUpload) {
        self.armed = Some(upload);
    }

    pub fn has_armed_upload(&self) -> bool {
        self.armed.is_some()
    }

    /// Pull bytes from `src` until one message completes or `src` would
    /// block. Also returns how many bytes were consumed.
    ///
    /// Reads never cross the end of the current message, so a following
    /// message's header is left in the stream for the next call.
    pub fn read_message<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
    ) -> Result<(ReadOutcome, usize), ConnError> {
        let mut total = 0;

        loop {
            let limit = self.inbound.read_limit(self.scratch.capacity());
            let n = match self.scratch.fill_from(src, limit) {
                Ok(0) => return Err(ConnError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((ReadOutcome::Drained, total));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            total += n;

            if self.inbound.state() == DecodeState::AwaitingHeader {
                let header = self.inbound.push_header(self.scratch.chunk());
                self.scratch.clear();
                if let Some(header) = header? {
                    self.begin(header)?;
                }
            } else {
                let Some(channel) = self.channel.as_mut() else {
                    return Err(ConnError::Closed);
                };
                channel.write_all(self.scratch.chunk())?;
                self.scratch.clear();
                self.inbound.consume_payload(n);
            }

            if let DecodeState::Complete { .. } = self.inbound.state() {
                return Ok((ReadOutcome::Message(self.finish()?), total));
            }
        }
    }

    /// Select the receive channel for a freshly parsed header.
    fn begin(&mut self, header: Header) -> Result<(), ConnError> {
        match header.kind {
            MessageType::Text => {
                if let Some(upload) = self.armed.take() {
                    debug!(name = %upload.name, "Pending upload discarded by text message");
                }
                self.channel = Some(Channel::memory());
            }
            MessageType::Binary => {
                let upload = self.armed.take().ok_or(ConnError::UnexpectedBinary)?;
                trace!(name = %upload.name, bytes = header.len, "Receiving upload");
                self.receiving = Some(upload.name);
                self.channel = Some(Channel::file(upload.file));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Received, ConnError> {
        let len = match self.inbound.state() {
            DecodeState::Complete { len, .. } => len,
            _ => 0,
        };
        self.inbound.reset();

        let mut channel = self.channel.take().ok_or(ConnError::Closed)?;
        match channel.kind() {
            MessageType::Text => Ok(Received::Text(channel.into_text()?)),
            MessageType::Binary => {
                channel.flush()?;
                let name = self.receiving.take().unwrap_or_default();
                Ok(Received::Upload { name, len })
            }
        }
    }

    /// Drop the receive channel and any armed upload.
    fn release(&mut self) {
        self.channel = None;
        self.receiving = None;
        self.armed = None;
        self.scratch.clear();
        self.inbound.reset();
    }
}

/// The message currently being transmitted.
#[derive(Debug)]
struct Transmit {
    channel: Channel,
    outbound: Outbound,
}

impl Transmit {
    fn new(channel: Channel) -> io::Result<Self> {
        let header = Header::new(channel.size()?, channel.kind());
        Ok(Self {
            channel,
            outbound: Outbound::new(header),
        })
    }

    /// Load the header (once) and as much payload as fits into `scratch`.
    fn refill(&mut self, scratch: &mut ScratchBuffer) -> io::Result<()> {
        self.outbound.write_header(scratch.buf_mut());

        let limit = self.outbound.payload_limit(scratch.spare());
        if limit > 0 {
            let n = scratch.fill_from(&mut self.channel, limit)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel ended before its announced size",
                ));
            }
            self.outbound.consume_payload(n);
        }
        Ok(())
    }
}

/// Outbound side: a FIFO of messages, sent one at a time.
#[derive(Debug)]
pub struct SendHalf {
    scratch: ScratchBuffer,
    current: Option<Transmit>,
    queue: VecDeque<Channel>,
}

enum Step {
    Next,
    Finish,
    Refill,
}

impl SendHalf {
    pub fn new(limits: ConnLimits) -> Self {
        Self {
            scratch: ScratchBuffer::new(limits.buffer_size),
            current: None,
            queue: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, channel: Channel) {
        self.queue.push_back(channel);
    }

    /// Nothing in flight and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty() && self.scratch.is_empty()
    }

    /// Messages not yet fully sent, counting the one in transmission.
    pub fn backlog(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    /// Push queued messages to `dst` until it would block or the queue is
    /// empty. Also returns how many bytes were written.
    ///
    /// On a partial write the unsent bytes stay in the scratch buffer and
    /// the channel position is not advanced past them.
    pub fn write_pending<W: Write + ?Sized>(
        &mut self,
        dst: &mut W,
    ) -> Result<(WriteOutcome, usize), ConnError> {
        let mut total = 0;

        loop {
            if self.scratch.is_empty() {
                let step = match &self.current {
                    None => Step::Next,
                    Some(tx) if tx.outbound.is_drained() => Step::Finish,
                    Some(_) => Step::Refill,
                };

                match step {
                    Step::Next => match self.queue.pop_front() {
                        Some(channel) => {
                            self.current = Some(Transmit::new(channel)?);
                            continue;
                        }
                        None => return Ok((WriteOutcome::Idle, total)),
                    },
                    Step::Finish => {
                        if let Some(tx) = self.current.take() {
                            trace!(bytes = tx.outbound.header().len, "Message sent");
                        }
                        continue;
                    }
                    Step::Refill => {
                        if let Some(tx) = self.current.as_mut() {
                            tx.refill(&mut self.scratch)?;
                        }
                    }
                }
            }

            match self.scratch.drain_to(dst) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((WriteOutcome::Blocked, total));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn release(&mut self) {
        self.current = None;
        self.queue.clear();
        self.scratch.clear();
    }
}

/// An accepted client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    token: Token,
    peer: SocketAddr,
    stream: TcpStream,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    recv: Mutex<RecvHalf>,
    send: Mutex<SendHalf>,
}

impl Connection {
    pub fn new(
        id: ConnId,
        token: Token,
        stream: TcpStream,
        peer: SocketAddr,
        now: Instant,
        limits: ConnLimits,
    ) -> Self {
        Self {
            id,
            token,
            peer,
            stream,
            last_activity: Mutex::new(now),
            closed: AtomicBool::new(false),
            recv: Mutex::new(RecvHalf::new(limits)),
            send: Mutex::new(SendHalf::new(limits)),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Reactor slot this connection is registered under.
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub(crate) fn activity(&self) -> &Mutex<Instant> {
        &self.last_activity
    }

    /// Claim the close. Only the first caller gets `true`.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Shut the socket down and release channels that no job is using.
    ///
    /// A job blocked on this socket fails fast and releases its own half;
    /// remaining handles close when the last reference drops.
    pub(crate) fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(conn_id = self.id, error = %e, "Socket shutdown failed");
            }
        }
        if let Some(mut recv) = self.recv.try_lock() {
            recv.release();
        }
        if let Some(mut send) = self.send.try_lock() {
            send.release();
        }
    }

    /// Queue a message for transmission.
    pub fn enqueue(&self, channel: Channel) {
        self.send.lock().enqueue(channel);
    }

    /// Messages waiting to be sent.
    pub fn backlog(&self) -> usize {
        self.send.lock().backlog()
    }

    /// Body of a read job: drain the socket, dispatching every complete
    /// message. `on_progress` runs after any successful transfer.
    ///
    /// Stops early, between messages, once the reply backlog reaches
    /// [`MAX_QUEUED_REPLIES`].
    pub fn service_read(
        &self,
        dispatcher: &Dispatcher,
        on_progress: impl Fn(),
    ) -> Result<ReadProgress, ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }

        let mut recv = self.recv.lock();
        let mut progress = ReadProgress::default();

        loop {
            if recv.state() == DecodeState::AwaitingHeader
                && self.backlog() >= MAX_QUEUED_REPLIES
            {
                trace!(conn_id = self.id, "Reply backlog full, pausing reads");
                progress.paused = true;
                return Ok(progress);
            }

            let (outcome, n) = recv.read_message(&mut &self.stream)?;
            if n > 0 {
                on_progress();
            }

            let received = match outcome {
                ReadOutcome::Drained => return Ok(progress),
                ReadOutcome::Message(received) => received,
            };

            match received {
                Received::Text(text) => {
                    trace!(conn_id = self.id, len = text.len(), "Command received");
                    match dispatcher.dispatch(&text) {
                        Reply::None => {}
                        Reply::Text(reply) => {
                            self.enqueue(Channel::text(reply));
                            progress.queued = true;
                        }
                        Reply::Send(channel) => {
                            self.enqueue(channel);
                            progress.queued = true;
                        }
                        Reply::Receive(upload) => {
                            self.enqueue(Channel::text(format!("ready {}", upload.name)));
                            recv.arm_upload(upload);
                            progress.queued = true;
                        }
                    }
                }
                Received::Upload { name, len } => {
                    debug!(conn_id = self.id, name = %name, bytes = len, "Upload stored");
                    self.enqueue(Channel::text(format!("stored {name} {len}")));
                    progress.queued = true;
                }
            }
        }
    }

    /// Body of a write job: push queued messages until the socket blocks
    /// or the queue is empty.
    pub fn service_write(&self, on_progress: impl Fn()) -> Result<WriteOutcome, ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }

        let mut send = self.send.lock();
        let (outcome, n) = send.write_pending(&mut &self.stream)?;
        if n > 0 {
            on_progress();
        }
        Ok(outcome)
    }
}
