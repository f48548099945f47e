//! Client side of the secret-ping protocol: the periodic prober.
//!
//! A work queue holds the peers still to be measured this round. Each tick
//! pops one target and runs a *volley*: for every other connected peer (in
//! routing order), lodge a fresh secret at the target, then launch a secret
//! ping through that intermediary and score the outcome into the sample
//! matrix. Ticks self-reschedule through the external ticker; every
//! `PING_VOLLEYS_PER_NETWORK_RECOMPUTE` volleys the reckoner runs.
//!
//! At most one tick is ever processing: the `processing` sentinel under the
//! queue lock makes a re-entrant tick a logged no-op. A peer forgotten
//! mid-volley flags a race instead of mutating under the volley's feet; the
//! volley's results are discarded when it ends.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info};

use veilnet_proto::{Message, MessageKind};

use crate::constants::{
    ACCEPTED_TIMEOUT, BETWEEN_PEERS, LONG_PERIOD, PING_VOLLEYS_PER_NETWORK_RECOMPUTE,
    SECRETPONG_TIMEOUT,
};
use crate::dispatch::{MessageFilter, WaitError};
use crate::manager::NetworkIdManager;
use crate::peer::{PeerId, PeerRef};

/// Mutable prober state, all under one lock.
pub(crate) struct ProberState {
    pub(crate) queue: VecDeque<PeerRef>,
    /// The target of the volley currently in flight, if any. Doubles as
    /// the single-prober sentinel.
    pub(crate) processing: Option<PeerRef>,
    /// Set when the in-flight target was forgotten mid-volley; the
    /// volley's samples are discarded at its end.
    pub(crate) race: bool,
    pub(crate) volleys_to_go: u32,
    /// Volleys left to drain before the first reckoning is allowed.
    pub(crate) startup_checks: usize,
}

impl ProberState {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processing: None,
            race: false,
            volleys_to_go: PING_VOLLEYS_PER_NETWORK_RECOMPUTE,
            startup_checks: 0,
        }
    }
}

impl NetworkIdManager {
    /// Queues every currently-connected peer for probing, suppressing
    /// duplicates.
    pub fn check_all_peers(&self) {
        let connected = self.connected_peers_snapshot();
        let mut state = self.prober.lock();
        for peer in connected {
            if !state.queue.iter().any(|q| q.id() == peer.id()) {
                state.queue.push_back(peer);
            }
        }
    }

    /// Walks all connected peers in routing order by repeatedly asking the
    /// routing oracle with an accumulating exclusion set.
    pub(crate) fn connected_peers_snapshot(&self) -> Vec<PeerRef> {
        let random_target = self.rng.lock().gen::<f64>();
        let mut exclude: HashSet<PeerId> = HashSet::new();
        let mut found = Vec::new();
        while let Some(peer) = self.peers.closer_peer(None, &exclude, random_target) {
            exclude.insert(peer.id());
            found.push(peer);
        }
        found
    }

    pub(crate) fn schedule_tick(&self, delay: Duration) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        self.ticker
            .queue_timed_job(Box::new(move || manager.tick()), delay);
    }

    /// One prober tick: run a volley against the next queued target, then
    /// handle reckoning cadence and reschedule.
    pub(crate) fn tick(&self) {
        let target = {
            let mut state = self.prober.lock();
            if state.processing.is_some() {
                error!("re-entrant prober tick; only one thread may run secret pings");
                return;
            }
            state.processing = state.queue.pop_front();
            state.processing.clone()
        };

        if let Some(ref target) = target {
            self.run_volley(target);
        }

        // A forget() racing the volley invalidates everything it measured.
        let raced_target = {
            let mut state = self.prober.lock();
            let raced = if state.race {
                state.race = false;
                state.processing.take()
            } else {
                None
            };
            state.processing = None;
            raced
        };
        if let Some(raced) = raced_target {
            debug!("discarding raced volley against {}", raced.id());
            self.forget_ping_records(&raced.id());
        }

        let reckon_now = {
            let mut state = self.prober.lock();
            state.volleys_to_go = state.volleys_to_go.saturating_sub(1);
            if state.startup_checks > 0 {
                state.startup_checks -= 1;
                false
            } else if state.volleys_to_go == 0 {
                state.volleys_to_go = PING_VOLLEYS_PER_NETWORK_RECOMPUTE;
                true
            } else {
                false
            }
        };
        if reckon_now {
            self.recompute_network_groups();
        }

        let queue_empty = {
            let state = self.prober.lock();
            state.queue.is_empty()
        };
        if queue_empty {
            self.check_all_peers();
            let startup = self.prober.lock().startup_checks > 0;
            self.schedule_tick(if startup { BETWEEN_PEERS } else { LONG_PERIOD });
        } else {
            self.schedule_tick(BETWEEN_PEERS);
        }
    }

    /// Probes `target` through every other connected peer in routing
    /// order, sleeping between probes to be polite.
    fn run_volley(&self, target: &PeerRef) {
        let random_target = self.rng.lock().gen::<f64>();
        let mut routed_to: HashSet<PeerId> = HashSet::new();
        loop {
            if !target.is_routable() || self.prober.lock().race {
                break;
            }
            let Some(next) =
                self.peers
                    .closer_peer(Some(&target.id()), &routed_to, random_target)
            else {
                break;
            };
            routed_to.insert(next.id());
            self.blocking_update_ping_record(target, &next);
            std::thread::sleep(self.config.probe_spacing);
        }
    }

    /// One best-effort probe of `target` through `next`; anything out of
    /// the ordinary counts as a failure. Produces exactly one sample.
    pub(crate) fn blocking_update_ping_record(&self, target: &PeerRef, next: &PeerRef) {
        let (uid, secret) = {
            let mut rng = self.rng.lock();
            (rng.gen::<u64>(), rng.gen::<u64>())
        };
        let (htl, dawn_htl) = self.matrix.with_record(&target.id(), &next.id(), |rec| {
            let htl = rec.next_htl();
            (htl, rec.next_dawn_htl(htl))
        });

        self.total_secret_ping_attempts.fetch_add(1, Ordering::Relaxed);
        let (success, supplied_counter) = self.exchange_secret_ping(target, next, uid, secret, htl, dawn_htl);

        self.matrix.with_record(&target.id(), &next.id(), |rec| {
            if success {
                rec.success(supplied_counter, htl, dawn_htl);
            } else {
                rec.failure(supplied_counter, htl, dawn_htl);
            }
        });
        if success {
            self.secret_ping_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The synchronous probe conversation:
    /// `StoreSecret -> Accepted -> SecretPing -> SecretPong | RejectedLoop`.
    fn exchange_secret_ping(
        &self,
        target: &PeerRef,
        next: &PeerRef,
        uid: u64,
        secret: u64,
        htl: i16,
        dawn_htl: i16,
    ) -> (bool, i32) {
        let failure = (false, 1);

        if target.send_sync(Message::StoreSecret { uid, secret }).is_err() {
            info!("{} left during connectivity test", target.id());
            return failure;
        }
        match self.waiter.wait_for(
            MessageFilter::new(target.id(), uid, &[MessageKind::Accepted]),
            ACCEPTED_TIMEOUT,
        ) {
            Ok(Message::Accepted { .. }) => {}
            Ok(other) => {
                error!("unexpected reply to store-secret: {:?}", other.kind());
                return failure;
            }
            Err(WaitError::Disconnected) => {
                info!("{} left during connectivity test", target.id());
                return failure;
            }
            Err(WaitError::Timeout) => {
                error!("{} is unresponsive to store-secret", target.id());
                return failure;
            }
        }

        if next
            .send_sync(Message::SecretPing {
                uid,
                target_location: target.location(),
                htl,
                dawn_htl,
                counter: 0,
            })
            .is_err()
        {
            info!("{} left during connectivity test", next.id());
            return failure;
        }
        match self.waiter.wait_for(
            MessageFilter::new(
                next.id(),
                uid,
                &[MessageKind::SecretPong, MessageKind::RejectedLoop],
            ),
            SECRETPONG_TIMEOUT,
        ) {
            Ok(Message::SecretPong { counter, secret: supplied, .. }) => {
                debug!("got secret pong, counter={counter}");
                (supplied == secret, counter)
            }
            Ok(Message::RejectedLoop { .. }) => {
                info!("top level loop rejection (no route): {} -> {}", next.id(), target.id());
                failure
            }
            Ok(other) => {
                error!("unexpected reply to secret ping: {:?}", other.kind());
                failure
            }
            Err(WaitError::Disconnected) => {
                info!("{} left during connectivity test", next.id());
                failure
            }
            Err(WaitError::Timeout) => {
                error!("fatal timeout waiting for secret pong from {}", next.id());
                failure
            }
        }
    }

    /// Drops every sample involving `peer`. If `peer` is the volley target
    /// currently in flight, flags the race instead; the volley discards
    /// its own results when it ends.
    pub fn forget_ping_records(&self, peer: &PeerId) {
        {
            let mut state = self.prober.lock();
            state.queue.retain(|p| p.id() != *peer);
            if state.processing.as_ref().is_some_and(|p| p.id() == *peer) {
                state.race = true;
                return;
            }
        }
        self.matrix.forget(peer);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use veilnet_common::UidHistory;

    use super::*;
    use crate::dispatch::MessageHub;
    use crate::manager::{NetworkIdManager, NimConfig};
    use crate::runtime::ThreadExecutor;
    use crate::testing::{ManualTicker, MemoryPeer, StaticPeerTable};

    fn test_manager(peers: &[Arc<MemoryPeer>]) -> Arc<NetworkIdManager> {
        let table = Arc::new(StaticPeerTable::new());
        for p in peers {
            table.add(p.clone());
        }
        NetworkIdManager::new(
            NimConfig {
                enable_secret_pings: true,
                enable_secret_pinger: true,
                rng_seed: Some(7),
                ..NimConfig::default()
            },
            table,
            Arc::new(MessageHub::new()),
            Arc::new(ManualTicker::new()),
            Arc::new(ThreadExecutor::new()),
            Arc::new(UidHistory::default()),
        )
    }

    #[test]
    fn test_check_all_peers_fills_queue_without_duplicates() {
        let peers = [MemoryPeer::new(1, 0.1), MemoryPeer::new(2, 0.4)];
        let manager = test_manager(&peers);
        manager.check_all_peers();
        manager.check_all_peers();
        assert_eq!(manager.prober.lock().queue.len(), 2);
    }

    #[test]
    fn test_forget_removes_queued_target() {
        let peers = [MemoryPeer::new(1, 0.1), MemoryPeer::new(2, 0.4)];
        let manager = test_manager(&peers);
        manager.check_all_peers();
        manager.forget_ping_records(&PeerId(1));
        let state = manager.prober.lock();
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].id(), PeerId(2));
    }

    #[test]
    fn test_forget_of_inflight_target_flags_race() {
        let peers = [MemoryPeer::new(1, 0.1), MemoryPeer::new(2, 0.4)];
        let manager = test_manager(&peers);
        manager
            .matrix
            .with_record(&PeerId(1), &PeerId(2), |rec| rec.success(1, 8, 6));
        manager.prober.lock().processing = Some(peers[0].clone() as PeerRef);

        manager.forget_ping_records(&PeerId(1));

        // The race is flagged and the samples survive until the volley
        // itself discards them.
        assert!(manager.prober.lock().race);
        assert_eq!(
            manager
                .matrix
                .with_record(&PeerId(1), &PeerId(2), |rec| rec.success_count()),
            1
        );
    }

    #[test]
    fn test_forget_of_idle_target_drops_samples() {
        let peers = [MemoryPeer::new(1, 0.1), MemoryPeer::new(2, 0.4)];
        let manager = test_manager(&peers);
        manager
            .matrix
            .with_record(&PeerId(1), &PeerId(2), |rec| rec.success(1, 8, 6));

        manager.forget_ping_records(&PeerId(1));

        assert!(!manager.prober.lock().race);
        assert_eq!(
            manager
                .matrix
                .with_record(&PeerId(1), &PeerId(2), |rec| rec.success_count()),
            0
        );
    }

    #[test]
    fn test_connected_snapshot_skips_disconnected() {
        let peers = [MemoryPeer::new(1, 0.1), MemoryPeer::new(2, 0.4)];
        peers[1].set_connected(false);
        let manager = test_manager(&peers);
        let snapshot = manager.connected_peers_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), PeerId(1));
    }
}
