//! Reactor runtime.
//!
//! One reactor thread owns the poll and every registration. Blocking socket
//! and file I/O runs on a bounded worker pool; workers report back through a
//! completion channel and wake the reactor. A reaper thread evicts idle
//! connections.
//!
//! - `buffer`: fixed-capacity scratch buffers relaying socket bytes
//! - `channel`: memory or file backed message bodies
//! - `connection`: per-connection receive/send state machines
//! - `registry`: id and activity indices over live connections
//! - `pool`: the bounded worker pool
//! - `reactor`: the event loop and per-connection interest tracking
//! - `reaper`: TTL eviction

mod buffer;
pub mod channel;
pub mod clock;
pub mod connection;
pub mod pool;
pub mod reactor;
pub mod reaper;
pub mod registry;
pub mod token;

pub use channel::Channel;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{ConnLimits, Connection};
pub use pool::{JobOutcome, WorkerPool};
pub use reactor::{InterestState, Phase, Reactor, ReactorSettings};
pub use reaper::Reaper;
pub use registry::ConnectionRegistry;
pub use token::{ConnId, IdAllocator};

use crate::commands::Dispatcher;
use crate::config::Config;
use crate::error::ServerError;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// A bound server, ready to run.
pub struct Server {
    reactor: Reactor,
    // Held so the reaper thread lives as long as the server.
    _reaper: Reaper,
    addr: SocketAddr,
}

impl Server {
    /// Bind the listener and start the pool and reaper. Nothing is
    /// accepted until [`run`](Self::run).
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;

        let listen = config.listen_addr();
        let addr = resolve(&listen).map_err(|source| ServerError::Bind {
            addr: listen.clone(),
            source,
        })?;
        let listener = create_listener(addr).map_err(|source| ServerError::Bind {
            addr: listen.clone(),
            source,
        })?;
        let listener = mio::net::TcpListener::from_std(listener);
        let addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(SystemClock),
            config.limits(),
        ));
        let dispatcher = Arc::new(Dispatcher::with_defaults(&config.root));
        let pool = WorkerPool::new(config.workers, reactor::log_job_outcome)?;
        let reactor = Reactor::new(
            listener,
            pool,
            Arc::clone(&registry),
            dispatcher,
            ReactorSettings {
                max_connections: config.max_connections,
                greeting: config.greeting.clone(),
            },
        )?;

        let notifier = reactor.notifier();
        let reaper = Reaper::spawn(registry, config.ttl(), config.reap_interval(), move |conn| {
            notifier.closed(conn)
        })?;

        Ok(Self {
            reactor,
            _reaper: reaper,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the reactor on the calling thread. Blocks until the poll fails.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!(addr = %self.addr, "Listening");
        self.reactor.run()?;
        Ok(())
    }

    /// Bind, then run on a dedicated `reactor` thread. Returns the bound
    /// address.
    pub fn spawn(config: &Config) -> Result<SocketAddr, ServerError> {
        let server = Self::bind(config)?;
        let addr = server.local_addr();
        thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || {
                if let Err(e) = server.run() {
                    error!(error = %e, "Server stopped");
                }
            })?;
        Ok(addr)
    }
}

fn resolve(listen: &str) -> std::io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        )
    })
}

/// Non-blocking listener with SO_REUSEADDR and a deep backlog.
fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
