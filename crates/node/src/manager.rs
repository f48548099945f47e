//! The network-id manager facade.
//!
//! [`NetworkIdManager`] owns all probe and grouping state and wires the
//! external collaborators together. The surrounding node:
//!
//! - routes inbound `StoreSecret` / `SecretPing` messages into
//!   [`NetworkIdManager::handle_message`] and reply-class messages into the
//!   configured [`MessageWait`] implementation;
//! - calls [`NetworkIdManager::on_peer_disconnected`] from its peer table;
//! - calls [`NetworkIdManager::on_peer_changed_network_id`] when a
//!   neighbour announces a new network id;
//! - reads [`NetworkIdManager::our_network_id`] wherever the local node
//!   needs its current label (stale reads are fine).
//!
//! Both protocol directions are off by default and must be enabled
//! explicitly through [`NimConfig`].

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::constants::{
    BETWEEN_PING_SLEEP, MIN_PINGS_FOR_STARTUP, NO_NETWORKID, STARTUP_DELAY,
};
use crate::dispatch::MessageWait;
use crate::groups::PeerNetworkGroup;
use crate::peer::{PeerId, PeerTable};
use crate::prober::ProberState;
use crate::reckoning::ReckonDiagnostics;
use crate::runtime::{CompletedTracker, Executor, Ticker};
use crate::sample_matrix::SampleMatrix;
use crate::secret_store::SecretStore;

/// Construction-time settings for the manager.
///
/// The probe protocol ships dark: a node neither answers nor sends secret
/// pings until both sides are switched on.
#[derive(Clone)]
pub struct NimConfig {
    /// Answer inbound secret pings instead of rejecting them all.
    pub enable_secret_pings: bool,
    /// Schedule the periodic prober.
    pub enable_secret_pinger: bool,
    /// The node's HTL ceiling.
    pub max_htl: i16,
    /// Politeness sleep between two probes of one volley.
    pub probe_spacing: Duration,
    /// Fixed RNG seed for deterministic tests; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for NimConfig {
    fn default() -> Self {
        Self {
            enable_secret_pings: false,
            enable_secret_pinger: false,
            max_htl: 10,
            probe_spacing: BETWEEN_PING_SLEEP,
            rng_seed: None,
        }
    }
}

/// Partitions directly-connected neighbours into network groups by probing
/// pairwise reachability, and publishes the consensus id of the group the
/// local node belongs to.
pub struct NetworkIdManager {
    /// Handle to ourselves for the jobs queued on the ticker and executor.
    /// Upgrades fail only during teardown, and the jobs just bail then.
    pub(crate) self_ref: Weak<NetworkIdManager>,
    pub(crate) config: NimConfig,
    pub(crate) peers: Arc<dyn PeerTable>,
    pub(crate) waiter: Arc<dyn MessageWait>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) completed: Arc<dyn CompletedTracker>,

    pub(crate) rng: Mutex<StdRng>,
    pub(crate) secrets: SecretStore,
    pub(crate) matrix: SampleMatrix,
    pub(crate) prober: Mutex<ProberState>,

    pub(crate) secret_ping_successes: AtomicU64,
    pub(crate) total_secret_ping_attempts: AtomicU64,

    /// Serialises reckoning against reactive relabeling. The flag inside
    /// is "a reckon is in transition": the reactive path bails while set.
    pub(crate) transition_gate: Mutex<bool>,
    /// Priority-ordered groups, most-connected first. Replaced wholesale
    /// by each reckon.
    pub(crate) registry: RwLock<Vec<Arc<PeerNetworkGroup>>>,
    /// Label of the group the local node declared itself in, or the
    /// sentinel before the first reckon. Read lock-free by callers.
    pub(crate) our_network_id: AtomicI32,
    pub(crate) reckon_diag: Mutex<ReckonDiagnostics>,
}

impl NetworkIdManager {
    pub fn new(
        config: NimConfig,
        peers: Arc<dyn PeerTable>,
        waiter: Arc<dyn MessageWait>,
        ticker: Arc<dyn Ticker>,
        executor: Arc<dyn Executor>,
        completed: Arc<dyn CompletedTracker>,
    ) -> Arc<Self> {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let max_htl = config.max_htl;
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            peers,
            waiter,
            ticker,
            executor,
            completed,
            rng: Mutex::new(rng),
            secrets: SecretStore::new(),
            matrix: SampleMatrix::new(max_htl),
            prober: Mutex::new(ProberState::new()),
            secret_ping_successes: AtomicU64::new(0),
            total_secret_ping_attempts: AtomicU64::new(0),
            transition_gate: Mutex::new(false),
            registry: RwLock::new(Vec::new()),
            our_network_id: AtomicI32::new(NO_NETWORKID),
            reckon_diag: Mutex::new(ReckonDiagnostics::default()),
        })
    }

    /// Schedules the startup probe drain, if the prober is enabled.
    ///
    /// After the startup delay the work queue is seeded with every
    /// connected peer and reckoning stays suppressed until each has been
    /// probed a minimum number of times.
    pub fn start(&self) {
        if !self.config.enable_secret_pinger {
            return;
        }
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        self.ticker.queue_timed_job(
            Box::new(move || {
                manager.check_all_peers();
                let checks =
                    manager.peers.quick_count_connected() * MIN_PINGS_FOR_STARTUP;
                manager.prober.lock().startup_checks = checks;
                info!("past startup delay, {checks} startup probe volleys to drain");
                manager.schedule_tick(Duration::ZERO);
            }),
            STARTUP_DELAY,
        );
    }

    /// The network id of the group the local node believes it belongs to,
    /// or the sentinel before the first reckon. May lag a concurrent
    /// reckon by one store.
    #[must_use]
    pub fn our_network_id(&self) -> i32 {
        self.our_network_id.load(Ordering::Acquire)
    }

    /// Snapshot of the current groups, highest priority first.
    #[must_use]
    pub fn network_groups(&self) -> Vec<Arc<PeerNetworkGroup>> {
        self.registry.read().clone()
    }

    /// Successful probes since startup.
    #[must_use]
    pub fn secret_ping_successes(&self) -> u64 {
        self.secret_ping_successes.load(Ordering::Relaxed)
    }

    /// All probe attempts since startup.
    #[must_use]
    pub fn total_secret_ping_attempts(&self) -> u64 {
        self.total_secret_ping_attempts.load(Ordering::Relaxed)
    }

    /// Drops all per-peer state for a disconnected neighbour: its lodged
    /// secret and its probe samples (both as target and as via).
    pub fn on_peer_disconnected(&self, peer: &PeerId) {
        self.secrets.on_disconnect(peer);
        self.forget_ping_records(peer);
    }
}
