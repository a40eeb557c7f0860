//! The reactor: a single thread that owns the poll.
//!
//! Every registration change happens here. On readiness the reactor strips
//! the interest it just saw, hands the blocking work to the pool, and waits
//! for the job to report back through a completion channel. Workers wake
//! the poll with a [`Waker`] after posting, so completions are picked up on
//! the next loop iteration.
//!
//! Per connection and per direction the interest is tracked as a [`Phase`];
//! at most one read job and one write job are in flight at any time. A read
//! job that stops on a full reply backlog leaves read [`Phase::Paused`]
//! until a write job drains the connection.

use crate::commands::Dispatcher;
use crate::error::ConnError;
use crate::runtime::channel::Channel;
use crate::runtime::connection::{Connection, ReadProgress, WriteOutcome};
use crate::runtime::pool::{JobOutcome, WorkerPool};
use crate::runtime::registry::ConnectionRegistry;
use crate::runtime::token::{ConnId, IdAllocator};
use crossbeam_channel::{Receiver, Sender};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Token for the listening socket.
pub const LISTENER: Token = Token(usize::MAX);
/// Token for cross-thread wake-ups.
pub const WAKER: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 1024;

/// Where one direction of a connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not registered for this direction.
    Idle,
    /// Registered, waiting for readiness.
    Armed,
    /// A job for this direction is running.
    InFlight,
    /// Read only: held back until the pending replies are sent.
    Paused,
}

/// Read and write interest of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestState {
    read: Phase,
    write: Phase,
    /// A reply was queued while a write job was running.
    write_requested: bool,
}

impl Default for InterestState {
    fn default() -> Self {
        Self::new()
    }
}

impl InterestState {
    /// Fresh connection: read armed, nothing to write.
    pub fn new() -> Self {
        Self {
            read: Phase::Armed,
            write: Phase::Idle,
            write_requested: false,
        }
    }

    pub fn read(&self) -> Phase {
        self.read
    }

    pub fn write(&self) -> Phase {
        self.write
    }

    /// The interest that should be registered with the poll right now.
    pub fn interest(&self) -> Option<Interest> {
        match (self.read == Phase::Armed, self.write == Phase::Armed) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Readable event seen. Returns whether a read job should start.
    pub fn begin_read(&mut self) -> bool {
        if self.read == Phase::Armed {
            self.read = Phase::InFlight;
            true
        } else {
            false
        }
    }

    /// Writable event seen. Returns whether a write job should start.
    pub fn begin_write(&mut self) -> bool {
        if self.write == Phase::Armed {
            self.write = Phase::InFlight;
            true
        } else {
            false
        }
    }

    /// A read job finished without error. Read is re-armed, even when the
    /// job found nothing to read, unless the job paused on its reply
    /// backlog. A paused read always has a write armed behind it.
    pub fn read_done(&mut self, paused: bool) {
        if paused {
            self.read = Phase::Paused;
            self.request_write();
        } else {
            self.read = Phase::Armed;
        }
    }

    /// Something was queued for sending.
    pub fn request_write(&mut self) {
        match self.write {
            Phase::Idle | Phase::Paused => self.write = Phase::Armed,
            Phase::Armed => {}
            Phase::InFlight => self.write_requested = true,
        }
    }

    /// A write job finished without error. An unblocked write drained the
    /// connection, which resumes a paused read.
    pub fn write_done(&mut self, blocked: bool) {
        let requested = std::mem::take(&mut self.write_requested);
        self.write = if blocked || requested {
            Phase::Armed
        } else {
            Phase::Idle
        };
        if !blocked && self.read == Phase::Paused {
            self.read = Phase::Armed;
        }
    }
}

/// What a job reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    ReadDone { wants_write: bool, paused: bool },
    WriteDone { blocked: bool },
    /// Tear the registration down. The registry entry is already gone.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub token: Token,
    pub id: ConnId,
    pub event: JobEvent,
}

/// Posts completions to the reactor and wakes it.
#[derive(Clone)]
pub struct Notifier {
    sender: Sender<Completion>,
    waker: Arc<Waker>,
}

impl Notifier {
    pub fn post(&self, completion: Completion) {
        if self.sender.send(completion).is_err() {
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake reactor");
        }
    }

    /// Tell the reactor a connection is gone.
    pub fn closed(&self, conn: &Connection) {
        self.post(Completion {
            token: conn.token(),
            id: conn.id(),
            event: JobEvent::Closed,
        });
    }
}

/// Everything a job needs, shared across workers.
#[derive(Clone)]
pub struct JobContext {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Notifier,
}

/// Guarantees a job reports exactly once. If the job unwinds before
/// calling [`complete`](Self::complete), the drop removes the connection
/// and reports it closed.
struct PendingCompletion {
    ctx: JobContext,
    conn: Arc<Connection>,
    event: Option<JobEvent>,
}

impl PendingCompletion {
    fn new(ctx: &JobContext, conn: &Arc<Connection>) -> Self {
        Self {
            ctx: ctx.clone(),
            conn: Arc::clone(conn),
            event: None,
        }
    }

    fn complete(mut self, event: JobEvent) {
        self.event = Some(event);
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        let event = match self.event.take() {
            Some(event) => event,
            None => {
                error!(conn_id = self.conn.id(), peer = %self.conn.peer(), "Job ended without reporting, closing connection");
                self.ctx.registry.remove(&self.conn);
                JobEvent::Closed
            }
        };
        self.ctx.notifier.post(Completion {
            token: self.conn.token(),
            id: self.conn.id(),
            event,
        });
    }
}

fn read_job(ctx: &JobContext, conn: &Arc<Connection>) {
    let guard = PendingCompletion::new(ctx, conn);
    let event = match conn.service_read(&ctx.dispatcher, || ctx.registry.touch(conn)) {
        Ok(ReadProgress { queued, paused }) => JobEvent::ReadDone {
            wants_write: queued,
            paused,
        },
        Err(e) => {
            log_failure(conn, "read", &e);
            ctx.registry.remove(conn);
            JobEvent::Closed
        }
    };
    guard.complete(event);
}

fn write_job(ctx: &JobContext, conn: &Arc<Connection>) {
    let guard = PendingCompletion::new(ctx, conn);
    let event = match conn.service_write(|| ctx.registry.touch(conn)) {
        Ok(outcome) => JobEvent::WriteDone {
            blocked: outcome == WriteOutcome::Blocked,
        },
        Err(e) => {
            log_failure(conn, "write", &e);
            ctx.registry.remove(conn);
            JobEvent::Closed
        }
    };
    guard.complete(event);
}

/// The pool's completion callback.
pub fn log_job_outcome(outcome: JobOutcome) {
    if let JobOutcome::Panicked(message) = outcome {
        error!(panic = %message, "Job panicked");
    }
}

fn log_failure(conn: &Connection, direction: &str, err: &ConnError) {
    if err.is_disconnect() {
        debug!(conn_id = conn.id(), peer = %conn.peer(), direction, reason = %err, "Connection ended");
    } else {
        warn!(conn_id = conn.id(), peer = %conn.peer(), direction, error = %err, "Connection failed");
    }
}

/// Reactor-side record for one registered connection.
struct Watched {
    id: ConnId,
    fd: RawFd,
    conn: Arc<Connection>,
    state: InterestState,
    registered: Option<Interest>,
}

impl Watched {
    fn new(conn: Arc<Connection>) -> Self {
        Self {
            id: conn.id(),
            fd: conn.raw_fd(),
            conn,
            state: InterestState::new(),
            registered: None,
        }
    }

    /// Bring the poll registration in line with `state`.
    ///
    /// An empty interest set cannot be registered, so a connection with
    /// both directions busy or idle is deregistered instead.
    fn sync(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.conn.token();
        let want = self.state.interest();
        match (self.registered, want) {
            (None, Some(interest)) => {
                registry.register(&mut SourceFd(&self.fd), token, interest)?;
            }
            (Some(current), Some(interest)) if current != interest => {
                registry.reregister(&mut SourceFd(&self.fd), token, interest)?;
            }
            (Some(_), None) => {
                registry.deregister(&mut SourceFd(&self.fd))?;
            }
            _ => {}
        }
        self.registered = want;
        Ok(())
    }
}

/// Knobs the reactor needs from the configuration.
#[derive(Debug, Clone)]
pub struct ReactorSettings {
    pub max_connections: usize,
    pub greeting: Option<String>,
}

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    watched: Slab<Watched>,
    pool: WorkerPool,
    ctx: JobContext,
    completions: Receiver<Completion>,
    ids: IdAllocator,
    settings: ReactorSettings,
}

impl Reactor {
    pub fn new(
        mut listener: TcpListener,
        pool: WorkerPool,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        settings: ReactorSettings,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (sender, completions) = crossbeam_channel::unbounded();

        Ok(Self {
            poll,
            listener,
            watched: Slab::new(),
            pool,
            ctx: JobContext {
                registry,
                dispatcher,
                notifier: Notifier { sender, waker },
            },
            completions,
            ids: IdAllocator::new(),
            settings,
        })
    }

    /// Handle for other threads (the reaper) to post completions.
    pub fn notifier(&self) -> Notifier {
        self.ctx.notifier.clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the event loop. Only returns on a poll failure.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(
            workers = self.pool.size(),
            max_connections = self.settings.max_connections,
            "Reactor started"
        );

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {}
                    token => self.ready(token, event),
                }
            }

            self.drain_completions();
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.pool.is_full() {
            warn!(peer = %peer, workers = self.pool.size(), "Worker pool saturated, rejecting connection");
            return;
        }
        if self.watched.len() >= self.settings.max_connections {
            warn!(peer = %peer, limit = self.settings.max_connections, "Connection limit reached, rejecting connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let registry = &self.ctx.registry;
        let id = self.ids.next_unused(|id| registry.contains(id));
        let entry = self.watched.vacant_entry();
        let conn = registry.add(id, Token(entry.key()), stream, peer);

        let mut watched = Watched::new(Arc::clone(&conn));
        if let Some(greeting) = &self.settings.greeting {
            conn.enqueue(Channel::text(greeting.clone()));
            watched.state.request_write();
        }
        if let Err(e) = watched.sync(self.poll.registry()) {
            warn!(conn_id = id, peer = %peer, error = %e, "Failed to register connection");
            registry.remove(&conn);
            return;
        }

        entry.insert(watched);
        debug!(conn_id = id, peer = %peer, active = self.watched.len(), "Connection accepted");
    }

    fn ready(&mut self, token: Token, event: &Event) {
        let Some(watched) = self.watched.get_mut(token.0) else {
            return;
        };

        let readable = event.is_readable() || event.is_read_closed() || event.is_error();
        let writable = event.is_writable() || event.is_write_closed() || event.is_error();
        let start_read = readable && watched.state.begin_read();
        let start_write = writable && watched.state.begin_write();
        if !start_read && !start_write {
            return;
        }

        // Strip the interest before the job runs so the same readiness is
        // not reported again.
        if let Err(e) = watched.sync(self.poll.registry()) {
            warn!(conn_id = watched.id, error = %e, "Failed to update interest");
            self.close(token);
            return;
        }

        let conn = Arc::clone(&watched.conn);
        if start_read {
            self.spawn(&conn, read_job, "read");
        }
        if start_write {
            self.spawn(&conn, write_job, "write");
        }
    }

    fn spawn(&self, conn: &Arc<Connection>, job: fn(&JobContext, &Arc<Connection>), kind: &'static str) {
        let ctx = self.ctx.clone();
        let conn = Arc::clone(conn);
        trace!(conn_id = conn.id(), kind, "Submitting job");
        self.pool.submit(move || job(&ctx, &conn));
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            self.complete(completion);
        }
    }

    fn complete(&mut self, completion: Completion) {
        let token = completion.token;
        match self.watched.get(token.0) {
            Some(watched) if watched.id == completion.id => {}
            _ => {
                trace!(conn_id = completion.id, "Stale completion ignored");
                return;
            }
        }

        let result = match self.watched.get_mut(token.0) {
            Some(watched) => match completion.event {
                JobEvent::ReadDone { wants_write, paused } => {
                    watched.state.read_done(paused);
                    if wants_write {
                        watched.state.request_write();
                    }
                    watched.sync(self.poll.registry())
                }
                JobEvent::WriteDone { blocked } => {
                    watched.state.write_done(blocked);
                    watched.sync(self.poll.registry())
                }
                JobEvent::Closed => Err(io::Error::from(io::ErrorKind::NotConnected)),
            },
            None => return,
        };

        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotConnected {
                warn!(conn_id = completion.id, error = %e, "Failed to re-arm connection");
            }
            self.close(token);
        }
    }

    /// Deregister and forget a connection. Safe to call more than once.
    fn close(&mut self, token: Token) {
        let Some(watched) = self.watched.try_remove(token.0) else {
            return;
        };

        if watched.registered.is_some() {
            if let Err(e) = self
                .poll
                .registry()
                .deregister(&mut SourceFd(&watched.fd))
            {
                trace!(conn_id = watched.id, error = %e, "Deregister failed");
            }
        }
        self.ctx.registry.remove(&watched.conn);
        debug!(conn_id = watched.id, peer = %watched.conn.peer(), active = self.watched.len(), "Connection closed");
    }
}
