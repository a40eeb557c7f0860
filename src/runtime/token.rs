//! Connection identity.
//!
//! Ids come from a single atomic counter. They increase monotonically and
//! wrap from the configured maximum back to 1; 0 is never handed out, so it
//! can serve as a sentinel in ordered range queries.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an accepted connection.
pub type ConnId = u64;

/// Lock-free id source.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
    max: ConnId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::with_range(1, ConnId::MAX)
    }

    /// Allocator that starts at `start` and wraps after `max`.
    pub fn with_range(start: ConnId, max: ConnId) -> Self {
        assert!(start >= 1 && start <= max, "invalid id range");
        Self {
            next: AtomicU64::new(start),
            max,
        }
    }

    /// Next id in sequence.
    pub fn next(&self) -> ConnId {
        let max = self.max;
        // The closure always returns Some, so this never fails.
        match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(if cur >= max { 1 } else { cur + 1 })
            }) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Next id for which `in_use` is false. After a wrap this skips ids
    /// still held by long-lived connections.
    pub fn next_unused(&self, in_use: impl Fn(ConnId) -> bool) -> ConnId {
        loop {
            let id = self.next();
            if !in_use(id) {
                return id;
            }
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_wraps_to_one() {
        let ids = IdAllocator::with_range(4, 5);
        assert_eq!(ids.next(), 4);
        assert_eq!(ids.next(), 5);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn test_next_unused_skips_live_ids() {
        let ids = IdAllocator::with_range(1, 4);
        let id = ids.next_unused(|id| id == 1 || id == 2);
        assert_eq!(id, 3);
    }
}
