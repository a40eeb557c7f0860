//! Idle connection reaper.

use crate::runtime::connection::Connection;
use crate::runtime::registry::ConnectionRegistry;
use crossbeam_channel::{select, tick, Receiver, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Background thread that periodically evicts connections idle longer
/// than the TTL. Stops when dropped.
pub struct Reaper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start reaping every `interval`. `on_evict` runs once per evicted
    /// connection, after it has been removed from the registry.
    pub fn spawn<F>(
        registry: Arc<ConnectionRegistry>,
        ttl: Duration,
        interval: Duration,
        on_evict: F,
    ) -> io::Result<Self>
    where
        F: Fn(&Connection) + Send + 'static,
    {
        let (shutdown, stop) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("reaper".to_string())
            .spawn(move || reap_loop(&registry, ttl, interval, stop, on_evict))?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the select below.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Default sweep period for a TTL: a quarter of it, at least one second.
pub fn default_interval(ttl: Duration) -> Duration {
    (ttl / 4).max(Duration::from_secs(1))
}

fn reap_loop<F>(
    registry: &ConnectionRegistry,
    ttl: Duration,
    interval: Duration,
    stop: Receiver<()>,
    on_evict: F,
) where
    F: Fn(&Connection),
{
    info!(ttl_secs = ttl.as_secs(), interval_ms = interval.as_millis() as u64, "Reaper started");
    let ticker = tick(interval);

    loop {
        select! {
            recv(ticker) -> _ => {
                let evicted = registry.evict_older_than(ttl);
                for conn in &evicted {
                    debug!(conn_id = conn.id(), peer = %conn.peer(), "Evicted idle connection");
                    on_evict(conn);
                }
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), remaining = registry.len(), "Reaped idle connections");
                }
            }
            recv(stop) -> _ => break,
        }
    }
    debug!("Reaper stopped");
}
