//! Registry of live connections.
//!
//! Two lock-free ordered maps are kept in step: a primary index by id and a
//! secondary index by `(last_activity, id)`. The secondary index makes
//! "everything idle since before T" a prefix range scan.
//!
//! Each connection's activity mutex serializes its own index moves, so a
//! `touch` racing a `remove` or an eviction never leaves a dangling entry.

use crate::runtime::clock::Clock;
use crate::runtime::connection::{ConnLimits, Connection};
use crate::runtime::token::ConnId;
use crossbeam_skiplist::SkipMap;
use mio::net::TcpStream;
use mio::Token;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct ConnectionRegistry {
    by_id: SkipMap<ConnId, Arc<Connection>>,
    by_activity: SkipMap<(Instant, ConnId), ()>,
    clock: Arc<dyn Clock>,
    limits: ConnLimits,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>, limits: ConnLimits) -> Self {
        Self {
            by_id: SkipMap::new(),
            by_activity: SkipMap::new(),
            clock,
            limits,
        }
    }

    /// Create and index a connection for a freshly accepted socket.
    pub fn add(
        &self,
        id: ConnId,
        token: Token,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Arc<Connection> {
        let now = self.clock.now();
        let conn = Arc::new(Connection::new(id, token, stream, peer, now, self.limits));

        self.by_activity.insert((now, id), ());
        self.by_id.insert(id, Arc::clone(&conn));
        conn
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.by_id.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Record activity: move the connection to the newest end of the time
    /// index. No-op once the connection is closed.
    pub fn touch(&self, conn: &Connection) {
        let mut last = conn.activity().lock();
        if conn.is_closed() {
            return;
        }

        let now = self.clock.now();
        if now == *last {
            return;
        }
        self.by_activity.remove(&(*last, conn.id()));
        self.by_activity.insert((now, conn.id()), ());
        *last = now;
    }

    /// Drop the connection from both indices and shut its socket down.
    ///
    /// Idempotent: only the first call has any effect, and only that call
    /// returns `true`.
    pub fn remove(&self, conn: &Connection) -> bool {
        self.remove_if(conn, |_| true)
    }

    /// Remove every connection whose last activity is older than `ttl`.
    /// Returns the evicted connections, oldest first.
    pub fn evict_older_than(&self, ttl: Duration) -> Vec<Arc<Connection>> {
        let Some(cutoff) = self.clock.now().checked_sub(ttl) else {
            return Vec::new();
        };

        // Ids start at 1, so `(cutoff, 0)` sorts before every entry stamped
        // at `cutoff` itself.
        let stale: Vec<ConnId> = self
            .by_activity
            .range(..(cutoff, 0))
            .map(|entry| entry.key().1)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            let Some(conn) = self.get(id) else {
                continue;
            };
            // A touch may have landed since the scan.
            if self.remove_if(&conn, |last| last < cutoff) {
                evicted.push(conn);
            }
        }
        evicted
    }

    fn remove_if(&self, conn: &Connection, pred: impl FnOnce(Instant) -> bool) -> bool {
        {
            let last = conn.activity().lock();
            if !pred(*last) || !conn.mark_closed() {
                return false;
            }
            self.by_activity.remove(&(*last, conn.id()));
        }

        self.by_id.remove(&conn.id());
        conn.shutdown();
        debug!(conn_id = conn.id(), peer = %conn.peer(), "Connection removed");
        true
    }
}
