//! Storage of probe secrets lodged by neighbours.
//!
//! A `StoreSecret` from a neighbour parks a `(uid, secret)` pair here until
//! a `SecretPing` carrying the same uid arrives over some longer path. The
//! store is indexed both ways: by peer (so a disconnect or replacement can
//! evict) and by uid (so an arbitrary inbound ping resolves fast).
//!
//! ## Invariants
//!
//! - At most one live entry per peer; a new `StoreSecret` replaces the
//!   peer's previous entry in *both* indexes.
//! - The two indexes are coherent at every observable point: both are
//!   mutated under one lock, so a uid hit can never name an evicted peer.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::peer::PeerId;

/// One lodged secret, waiting to be echoed back by a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub peer: PeerId,
    pub uid: u64,
    pub secret: u64,
}

#[derive(Default)]
struct Indexes {
    by_peer: HashMap<PeerId, StoredSecret>,
    by_uid: HashMap<u64, StoredSecret>,
}

/// Two-way indexed store of lodged secrets.
#[derive(Default)]
pub struct SecretStore {
    indexes: Mutex<Indexes>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret for `peer`, replacing any previous entry for the
    /// same peer and removing that entry's uid row.
    pub fn put(&self, peer: PeerId, uid: u64, secret: u64) {
        let entry = StoredSecret { peer, uid, secret };
        let mut idx = self.indexes.lock();
        if let Some(prev) = idx.by_peer.remove(&peer) {
            debug!("replacing stored secret uid={} for {}", prev.uid, peer);
            idx.by_uid.remove(&prev.uid);
        }
        idx.by_uid.insert(uid, entry.clone());
        idx.by_peer.insert(peer, entry);
    }

    /// Looks up a lodged secret by probe uid.
    #[must_use]
    pub fn by_uid(&self, uid: u64) -> Option<StoredSecret> {
        self.indexes.lock().by_uid.get(&uid).cloned()
    }

    /// Drops the entry lodged by `peer`, if any. Called on disconnect.
    pub fn on_disconnect(&self, peer: &PeerId) {
        let mut idx = self.indexes.lock();
        if let Some(prev) = idx.by_peer.remove(peer) {
            debug!("removing stored secret uid={} on disconnect of {}", prev.uid, peer);
            idx.by_uid.remove(&prev.uid);
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.lock().by_peer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PeerId = PeerId(1);
    const P2: PeerId = PeerId(2);

    #[test]
    fn test_put_then_lookup_by_uid() {
        let store = SecretStore::new();
        store.put(P1, 10, 0xDEAD);
        let hit = store.by_uid(10).expect("stored");
        assert_eq!(hit.peer, P1);
        assert_eq!(hit.secret, 0xDEAD);
    }

    #[test]
    fn test_replacement_evicts_old_uid_row() {
        let store = SecretStore::new();
        store.put(P1, 10, 0xDEAD);
        store.put(P1, 11, 0xBEEF);

        // Exactly one live entry, keyed by the latest uid in both indexes.
        assert_eq!(store.len(), 1);
        assert!(store.by_uid(10).is_none());
        let hit = store.by_uid(11).expect("replacement stored");
        assert_eq!(hit.secret, 0xBEEF);
        assert_eq!(hit.peer, P1);
    }

    #[test]
    fn test_entries_are_per_peer() {
        let store = SecretStore::new();
        store.put(P1, 10, 1);
        store.put(P2, 20, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.by_uid(10).unwrap().peer, P1);
        assert_eq!(store.by_uid(20).unwrap().peer, P2);
    }

    #[test]
    fn test_disconnect_removes_both_indexes() {
        let store = SecretStore::new();
        store.put(P1, 10, 1);
        store.on_disconnect(&P1);
        assert!(store.is_empty());
        assert!(store.by_uid(10).is_none());
    }

    #[test]
    fn test_disconnect_of_unknown_peer_is_noop() {
        let store = SecretStore::new();
        store.put(P1, 10, 1);
        store.on_disconnect(&P2);
        assert_eq!(store.len(), 1);
    }
}
