//! Network-id reckoning: clustering neighbours and labeling the clusters.
//!
//! The batch path runs after every few probe volleys. It snapshots the
//! connected peers, greedily extracts clusters of mutually-reachable peers
//! (best-connected seed first), labels each cluster by member consensus
//! (or a fresh random id), and atomically replaces the group registry. The
//! local node declares itself part of the first, most-connected group.
//!
//! The reactive path runs when a neighbour announces a network id between
//! reckonings: it re-checks that one group's consensus and cascades
//! forbidden-id constraints down the priority order, with an anti-thrash
//! window so two peers cannot make a group's label oscillate.
//!
//! Both paths serialise on the transition gate; the reactive path yields
//! to an in-flight reckon.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use veilnet_common::TrivialRunningAverage;

use crate::constants::{DREGS_MERGE_MARK, FALL_OPEN_MARK, MAGIC_LINEAR_GRACE, NO_NETWORKID};
use crate::groups::PeerNetworkGroup;
use crate::manager::NetworkIdManager;
use crate::peer::{PeerId, PeerRef};

/// Long-run statistics fed by the clustering walk.
#[derive(Default)]
pub(crate) struct ReckonDiagnostics {
    /// Initial setwise goodness of each cluster seed (0.0 on fall-open).
    pub(crate) cluster_goodness: TrivialRunningAverage,
    /// Every best-candidate setwise average considered for admission.
    pub(crate) best_candidate: TrivialRunningAverage,
}

impl NetworkIdManager {
    /// The batch path: rebuild all network groups from the sample matrix.
    pub(crate) fn recompute_network_groups(&self) {
        *self.transition_gate.lock() = true;

        let all = self.connected_peers_snapshot();
        if all.is_empty() {
            *self.transition_gate.lock() = false;
            return;
        }

        // Group membership is rebuilt from scratch: previous assignments
        // are never consulted, only the advertised ids via consensus.
        let mut todo = all.clone();
        let mut taken: HashSet<i32> = HashSet::new();
        let mut new_groups: Vec<Arc<PeerNetworkGroup>> = Vec::new();

        while !todo.is_empty() {
            let seed = self.take_most_connected(&mut todo, &all);
            let mut members = if todo.is_empty() {
                // Sadly this peer gets a group to itself.
                Vec::new()
            } else {
                self.extract_cluster(&seed, &mut todo)
            };
            members.push(seed);

            let group = PeerNetworkGroup::new(members, taken.clone());
            let mut id = group.consensus();
            if id == NO_NETWORKID {
                id = self.fresh_network_id(&taken);
            }
            group.assign_network_id(id);
            taken.insert(id);
            new_groups.push(Arc::new(group));
        }

        // We declare ourselves in our most-connected group.
        new_groups[0].set_our_group(true);
        let our_id = new_groups[0].network_id();
        self.our_network_id.store(our_id, Ordering::Release);

        info!(
            "network id {our_id}: divided {} peers into {} network groups",
            all.len(),
            new_groups.len()
        );
        {
            let diag = self.reckon_diag.lock();
            debug!(
                "cluster goodness mean={:.3}, best candidate mean={:.3}",
                diag.cluster_goodness.current_value(),
                diag.best_candidate.current_value()
            );
        }

        *self.registry.write() = new_groups;
        *self.transition_gate.lock() = false;
    }

    /// The reactive path: a neighbour announced a (possibly new) network
    /// id. Re-labels the announcing peer's group if its consensus moved,
    /// then cascades forbidden-id updates to every lower-priority group.
    pub fn on_peer_changed_network_id(&self, peer: &PeerId) {
        let gate = self.transition_gate.lock();
        if *gate {
            // A reckon is rebuilding everything anyway.
            return;
        }

        let groups = self.registry.read().clone();
        let mut now_taken: HashSet<i32> = HashSet::new();
        let mut found = false;
        for group in &groups {
            if !found && group.contains(peer) {
                found = true;
                if group.is_our_group() {
                    // Even if the consensus moved we hold onto our own
                    // label; stability matters more than agreement here.
                    return;
                }
                let old_id = group.network_id();
                let new_id = group.consensus();
                if old_id == new_id {
                    return;
                }
                if group.recently_assigned() {
                    // Two peers seeing each other in the same group could
                    // otherwise keep swapping labels.
                    return;
                }
                group.assign_network_id(new_id);
                now_taken.insert(new_id);
            } else if found {
                // Lower-priority group: its id may have just been claimed
                // above it.
                group.set_forbidden_ids(&now_taken);
                let old_id = group.network_id();
                let mut new_id = old_id;
                if now_taken.contains(&old_id) {
                    new_id = group.consensus();
                    group.assign_network_id(new_id);
                }
                now_taken.insert(new_id);
            } else {
                // Higher-priority group keeps its id; remember it.
                now_taken.insert(group.network_id());
            }
        }
    }

    /// Removes and returns the best-connected peer in `todo`, scored
    /// against the full snapshot.
    fn take_most_connected(&self, todo: &mut Vec<PeerRef>, all: &[PeerRef]) -> PeerRef {
        let mut best = 0;
        let mut best_value = -1.0;
        for (i, peer) in todo.iter().enumerate() {
            let value = self.connectedness(peer, all);
            if value > best_value {
                best_value = value;
                best = i;
            }
        }
        todo.remove(best)
    }

    /// Multiplicative reachability score of `peer` against `targets` in
    /// `[0.0, 1.0]`. Each factor is floored at `1/|targets|` so a single
    /// unmeasured pair cannot annihilate the score.
    fn connectedness(&self, peer: &PeerRef, targets: &[PeerRef]) -> f64 {
        let floor = 1.0 / targets.len() as f64;
        let mut score = 1.0;
        for target in targets {
            let avg = self.matrix.average(&peer.id(), &target.id());
            score *= avg.max(floor);
        }
        score
    }

    /// Pulls the peers reasonably connected to `seed` out of `todo` and
    /// returns them (without `seed` itself).
    ///
    /// A peer is admitted while its setwise average against the growing
    /// cluster stays above a fixed fraction of the seed's own setwise
    /// goodness. When that goodness is itself below the fall-open mark,
    /// everything left coalesces into this cluster: peers with the probe
    /// protocol disabled all end up in one bucket rather than in dozens of
    /// singletons.
    fn extract_cluster(&self, seed: &PeerRef, todo: &mut Vec<PeerRef>) -> Vec<PeerRef> {
        let mut cluster: Vec<PeerRef> = vec![seed.clone()];
        let mut extracted: Vec<PeerRef> = Vec::new();

        let goodness = self.setwise_ping_average(seed, todo);
        if goodness < FALL_OPEN_MARK {
            info!("falling open with {} peers left", todo.len());
            self.reckon_diag.lock().cluster_goodness.report(0.0);
            extracted.append(todo);
            return extracted;
        }
        self.reckon_diag.lock().cluster_goodness.report(goodness);

        let threshold = goodness * MAGIC_LINEAR_GRACE;
        while !todo.is_empty() {
            let (best_idx, best_avg) = self.find_best_setwise(todo, &cluster);
            self.reckon_diag.lock().best_candidate.report(best_avg);
            if best_avg < threshold {
                break;
            }
            let peer = todo.remove(best_idx);
            cluster.push(peer.clone());
            extracted.push(peer);
        }

        // Combine the dregs: a lone seed and a single leftover with a
        // decent mutual average belong together; splitting them means the
        // admission rule was too picky.
        if extracted.is_empty() && todo.len() == 1 {
            let leftover = &todo[0];
            let a = self.matrix.average(&leftover.id(), &seed.id());
            let b = self.matrix.average(&seed.id(), &leftover.id());
            if 0.5 * a + 0.5 * b > DREGS_MERGE_MARK {
                info!("combining the dregs: {} joins {}", leftover.id(), seed.id());
                extracted.push(todo.remove(0));
            }
        }
        extracted
    }

    /// Mean ping average of `peer` toward each of `others`.
    fn setwise_ping_average(&self, peer: &PeerRef, others: &[PeerRef]) -> f64 {
        if others.is_empty() {
            warn!("setwise ping average of an empty set");
            return 1.0;
        }
        let sum: f64 = others
            .iter()
            .map(|other| self.matrix.average(&peer.id(), &other.id()))
            .sum();
        sum / others.len() as f64
    }

    /// Index and value of the candidate in `of_these` with the highest
    /// setwise average toward `towards`.
    fn find_best_setwise(&self, of_these: &[PeerRef], towards: &[PeerRef]) -> (usize, f64) {
        let mut best = 0;
        let mut best_avg = -1.0;
        for (i, candidate) in of_these.iter().enumerate() {
            let avg = self.setwise_ping_average(candidate, towards);
            if avg > best_avg {
                best_avg = avg;
                best = i;
            }
        }
        (best, best_avg)
    }

    /// Draws a random id that is neither the sentinel nor already taken.
    fn fresh_network_id(&self, taken: &HashSet<i32>) -> i32 {
        let mut rng = self.rng.lock();
        loop {
            let id = rng.gen::<i32>();
            if id != NO_NETWORKID && !taken.contains(&id) {
                return id;
            }
        }
    }
}
