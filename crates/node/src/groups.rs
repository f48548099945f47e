//! Network groups and their id bookkeeping.
//!
//! A [`PeerNetworkGroup`] is one cluster of well-interconnected neighbours
//! plus the integer label assigned to it. Groups live in a priority-ordered
//! registry (most-connected first) owned by the manager; replacement of the
//! registry is atomic, individual groups carry their own lock for the
//! reactive relabeling path.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use veilnet_proto::Message;

use crate::constants::{BETWEEN_PEERS, NO_NETWORKID};
use crate::peer::{PeerId, PeerRef};

struct GroupInner {
    members: Vec<PeerRef>,
    network_id: i32,
    our_group: bool,
    /// Ids already claimed by higher-priority groups; consensus never
    /// returns one of these.
    forbidden: HashSet<i32>,
    last_assign: Option<Instant>,
}

/// One cluster of neighbours with an assigned network id.
///
/// ## Invariants
///
/// - `members` is never empty.
/// - After the first assignment, `network_id != NO_NETWORKID`.
/// - At most one group in a registry has `our_group` set.
pub struct PeerNetworkGroup {
    inner: Mutex<GroupInner>,
}

impl PeerNetworkGroup {
    /// Creates an unassigned group over `members`, with `forbidden` as the
    /// ids already taken by higher-priority groups.
    pub fn new(members: Vec<PeerRef>, forbidden: HashSet<i32>) -> Self {
        Self {
            inner: Mutex::new(GroupInner {
                members,
                network_id: NO_NETWORKID,
                our_group: false,
                forbidden,
                last_assign: None,
            }),
        }
    }

    /// Plurality of the non-forbidden, non-sentinel ids advertised by the
    /// members.
    ///
    /// With one or zero distinct options the vote is meaningless: returns
    /// the last advertised id seen, or the group's current id if nobody
    /// advertised anything usable.
    #[must_use]
    pub fn consensus(&self) -> i32 {
        let inner = self.inner.lock();
        let mut counts: HashMap<i32, u32> = HashMap::new();
        let mut last_id = inner.network_id;
        for member in &inner.members {
            let id = member.provided_network_id();
            if id == NO_NETWORKID || inner.forbidden.contains(&id) {
                continue;
            }
            *counts.entry(id).or_insert(0) += 1;
            last_id = id;
        }
        if counts.len() <= 1 {
            return last_id;
        }
        let mut best_id = inner.network_id;
        let mut best_count = 0;
        for (id, count) in counts {
            if count > best_count {
                best_count = count;
                best_id = id;
            }
        }
        best_id
    }

    /// Labels the group with `id` and broadcasts it to every member,
    /// best-effort.
    pub fn assign_network_id(&self, id: i32) {
        let mut inner = self.inner.lock();
        inner.last_assign = Some(Instant::now());
        inner.network_id = id;
        for member in &inner.members {
            member.set_assigned_network_id(id);
            if member.send_async(Message::NetworkId { id }).is_err() {
                info!("{} disconnected on network id reassignment", member.id());
            }
        }
    }

    /// Replaces the forbidden-id set with a copy of `taken`.
    pub fn set_forbidden_ids(&self, taken: &HashSet<i32>) {
        self.inner.lock().forbidden = taken.clone();
    }

    /// Whether the last assignment is inside the anti-thrash window.
    #[must_use]
    pub fn recently_assigned(&self) -> bool {
        self.inner
            .lock()
            .last_assign
            .is_some_and(|at| at.elapsed() < BETWEEN_PEERS)
    }

    #[must_use]
    pub fn network_id(&self) -> i32 {
        self.inner.lock().network_id
    }

    /// Whether the local node declared itself part of this group.
    #[must_use]
    pub fn is_our_group(&self) -> bool {
        self.inner.lock().our_group
    }

    pub(crate) fn set_our_group(&self, ours: bool) {
        self.inner.lock().our_group = ours;
    }

    /// Whether `peer` is a member.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.inner.lock().members.iter().any(|m| m.id() == *peer)
    }

    /// Snapshot of the member handles.
    #[must_use]
    pub fn members(&self) -> Vec<PeerRef> {
        self.inner.lock().members.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use veilnet_proto::MessageKind;

    use super::*;
    use crate::testing::MemoryPeer;

    fn peer(id: u64, provided: i32) -> Arc<MemoryPeer> {
        let p = MemoryPeer::new(id, 0.1 * id as f64);
        p.set_provided_network_id(provided);
        p
    }

    fn group_of(peers: &[Arc<MemoryPeer>], forbidden: &[i32]) -> PeerNetworkGroup {
        PeerNetworkGroup::new(
            peers.iter().map(|p| p.clone() as PeerRef).collect(),
            forbidden.iter().copied().collect(),
        )
    }

    // ── CONSENSUS ───────────────────────────────────────────────────────

    #[test]
    fn test_consensus_plurality_wins() {
        let peers = [peer(1, 7), peer(2, 7), peer(3, 9)];
        let g = group_of(&peers, &[]);
        assert_eq!(g.consensus(), 7);
    }

    #[test]
    fn test_consensus_ignores_sentinel() {
        let peers = [peer(1, 0), peer(2, 0), peer(3, 9)];
        let g = group_of(&peers, &[]);
        assert_eq!(g.consensus(), 9);
    }

    #[test]
    fn test_consensus_ignores_forbidden() {
        let peers = [peer(1, 7), peer(2, 7), peer(3, 9)];
        let g = group_of(&peers, &[7]);
        assert_eq!(g.consensus(), 9);
    }

    #[test]
    fn test_consensus_no_options_returns_current_id() {
        let peers = [peer(1, 0), peer(2, 0)];
        let g = group_of(&peers, &[]);
        g.assign_network_id(42);
        assert_eq!(g.consensus(), 42);
    }

    #[test]
    fn test_consensus_single_option_is_last_seen() {
        let peers = [peer(1, 0), peer(2, 13), peer(3, 13)];
        let g = group_of(&peers, &[]);
        assert_eq!(g.consensus(), 13);
    }

    // ── ASSIGNMENT ──────────────────────────────────────────────────────

    #[test]
    fn test_assign_broadcasts_to_members() {
        let peers = [peer(1, 0), peer(2, 0)];
        let g = group_of(&peers, &[]);
        g.assign_network_id(17);

        assert_eq!(g.network_id(), 17);
        for p in &peers {
            assert_eq!(p.assigned_network_id(), 17);
            let sent = p.sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].kind(), MessageKind::NetworkId);
        }
    }

    #[test]
    fn test_assign_survives_disconnected_member() {
        let peers = [peer(1, 0), peer(2, 0)];
        peers[1].set_connected(false);
        let g = group_of(&peers, &[]);
        g.assign_network_id(17);
        assert_eq!(g.network_id(), 17);
        assert_eq!(peers[0].sent().len(), 1);
    }

    #[test]
    fn test_recently_assigned_window() {
        let peers = [peer(1, 0)];
        let g = group_of(&peers, &[]);
        assert!(!g.recently_assigned());
        g.assign_network_id(5);
        assert!(g.recently_assigned());
    }

    #[test]
    fn test_contains_by_identity() {
        let peers = [peer(1, 0), peer(2, 0)];
        let g = group_of(&peers, &[]);
        assert!(g.contains(&PeerId(1)));
        assert!(!g.contains(&PeerId(3)));
    }
}
