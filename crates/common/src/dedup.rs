//! Bounded history of recently completed request UIDs.
//!
//! Forwarded probe requests are deduplicated by their 64-bit UID: once a
//! node has forwarded (or rejected) a UID it must answer any replay with a
//! loop rejection rather than forwarding it again. The history is bounded;
//! the oldest entries are evicted first, which is acceptable because a
//! probe transaction is over long before its UID can be evicted under any
//! realistic request rate.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

/// Default number of UIDs remembered before eviction begins.
pub const DEFAULT_UID_HISTORY: usize = 8_192;

/// Thread-safe bounded set of recently seen UIDs.
///
/// ## Invariants
///
/// - `len() <= capacity` at all times.
/// - `record` is idempotent: re-recording a live UID does not grow the
///   history or refresh its eviction position.
#[derive(Debug)]
pub struct UidHistory {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Debug)]
struct Inner {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl UidHistory {
    /// Creates a history bounded to `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Returns `true` if `uid` is still in the history.
    #[must_use]
    pub fn contains(&self, uid: u64) -> bool {
        self.inner.lock().seen.contains(&uid)
    }

    /// Records `uid`, evicting the oldest entry if the history is full.
    pub fn record(&self, uid: u64) {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(uid) {
            return;
        }
        inner.order.push_back(uid);
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.seen.remove(&old);
            }
        }
    }

    /// Number of UIDs currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UidHistory {
    fn default() -> Self {
        Self::new(DEFAULT_UID_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_history_is_empty() {
        let h = UidHistory::new(4);
        assert!(h.is_empty());
        assert!(!h.contains(1));
    }

    #[test]
    fn test_record_then_contains() {
        let h = UidHistory::new(4);
        h.record(42);
        assert!(h.contains(42));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_record_is_idempotent() {
        let h = UidHistory::new(4);
        h.record(7);
        h.record(7);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let h = UidHistory::new(3);
        h.record(1);
        h.record(2);
        h.record(3);
        h.record(4);
        assert_eq!(h.len(), 3);
        assert!(!h.contains(1));
        assert!(h.contains(2));
        assert!(h.contains(4));
    }

    #[test]
    fn test_capacity_floor_of_one() {
        let h = UidHistory::new(0);
        h.record(1);
        h.record(2);
        assert_eq!(h.len(), 1);
        assert!(h.contains(2));
        assert!(!h.contains(1));
    }
}
