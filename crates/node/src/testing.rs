//! In-memory collaborator implementations for testing.
//!
//! Mirrors the production seams with deterministic fakes: [`MemoryPeer`]
//! for neighbours, [`StaticPeerTable`] for the routing oracle,
//! [`ManualTicker`] for hand-driven scheduling, and [`InlineExecutor`] for
//! synchronous dispatch. Used by this crate's own unit and integration
//! tests; exported because downstream crates integrating the manager need
//! the same fakes.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use veilnet_proto::Message;

use crate::peer::{PeerGone, PeerId, PeerNode, PeerRef, PeerTable};
use crate::runtime::{Executor, Job, Ticker};

type SendHook = Box<dyn Fn(&Message) + Send + Sync>;

/// In-memory neighbour.
///
/// Records every message sent to it; an optional hook observes sends so a
/// test can script the peer's reply (typically by delivering into a
/// `MessageHub`).
pub struct MemoryPeer {
    id: PeerId,
    location: f64,
    connected: AtomicBool,
    routable: AtomicBool,
    provided_network_id: AtomicI32,
    assigned_network_id: AtomicI32,
    htl_step: i16,
    outbox: Mutex<Vec<Message>>,
    on_send: Mutex<Option<SendHook>>,
}

impl MemoryPeer {
    pub fn new(id: u64, location: f64) -> Arc<Self> {
        Self::with_htl_step(id, location, 1)
    }

    /// A peer whose link decrements HTL by `step` per hop.
    pub fn with_htl_step(id: u64, location: f64, step: i16) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId(id),
            location,
            connected: AtomicBool::new(true),
            routable: AtomicBool::new(true),
            provided_network_id: AtomicI32::new(0),
            assigned_network_id: AtomicI32::new(0),
            htl_step: step,
            outbox: Mutex::new(Vec::new()),
            on_send: Mutex::new(None),
        })
    }

    /// Installs a hook invoked after each successful send to this peer.
    pub fn set_on_send(&self, hook: impl Fn(&Message) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Box::new(hook));
    }

    /// Everything sent to this peer so far.
    pub fn sent(&self) -> Vec<Message> {
        self.outbox.lock().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.routable.store(connected, Ordering::SeqCst);
    }

    pub fn set_provided_network_id(&self, id: i32) {
        self.provided_network_id.store(id, Ordering::SeqCst);
    }

    pub fn assigned_network_id(&self) -> i32 {
        self.assigned_network_id.load(Ordering::SeqCst)
    }

    fn deliver(&self, msg: Message) -> Result<(), PeerGone> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PeerGone);
        }
        self.outbox.lock().push(msg.clone());
        if let Some(hook) = self.on_send.lock().as_ref() {
            hook(&msg);
        }
        Ok(())
    }
}

impl PeerNode for MemoryPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn location(&self) -> f64 {
        self.location
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_routable(&self) -> bool {
        self.routable.load(Ordering::SeqCst)
    }

    fn decrement_htl(&self, htl: i16) -> i16 {
        htl - self.htl_step
    }

    fn send_async(&self, msg: Message) -> Result<(), PeerGone> {
        self.deliver(msg)
    }

    fn send_sync(&self, msg: Message) -> Result<(), PeerGone> {
        self.deliver(msg)
    }

    fn provided_network_id(&self) -> i32 {
        self.provided_network_id.load(Ordering::SeqCst)
    }

    fn set_assigned_network_id(&self, id: i32) {
        self.assigned_network_id.store(id, Ordering::SeqCst);
    }
}

/// Routing oracle over a fixed peer set.
///
/// `closer_peer` ranks connected peers by circular distance to the target
/// location, which makes "routing order" deterministic in tests.
/// `random_peer` returns the first eligible peer in insertion order; tests
/// that care which peer opens a random-prefix hop arrange insertion order
/// accordingly.
#[derive(Default)]
pub struct StaticPeerTable {
    peers: RwLock<Vec<Arc<MemoryPeer>>>,
}

impl StaticPeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: Arc<MemoryPeer>) {
        self.peers.write().push(peer);
    }

    fn ring_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).abs();
        d.min(1.0 - d)
    }
}

impl PeerTable for StaticPeerTable {
    fn closer_peer(
        &self,
        source: Option<&PeerId>,
        exclude: &HashSet<PeerId>,
        target_location: f64,
    ) -> Option<PeerRef> {
        let peers = self.peers.read();
        peers
            .iter()
            .filter(|p| p.is_connected())
            .filter(|p| Some(&p.id()) != source)
            .filter(|p| !exclude.contains(&p.id()))
            .min_by(|a, b| {
                let da = Self::ring_distance(a.location(), target_location);
                let db = Self::ring_distance(b.location(), target_location);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.clone() as PeerRef)
    }

    fn random_peer(&self, exclude_source: &PeerId) -> Option<PeerRef> {
        let peers = self.peers.read();
        peers
            .iter()
            .find(|p| p.is_connected() && p.id() != *exclude_source)
            .map(|p| p.clone() as PeerRef)
    }

    fn quick_count_connected(&self) -> usize {
        self.peers.read().iter().filter(|p| p.is_connected()).count()
    }
}

/// Ticker that queues jobs until the test fires them.
#[derive(Default)]
pub struct ManualTicker {
    jobs: Mutex<VecDeque<(Duration, Job)>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to fire.
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Delay the next job was queued with, if any.
    pub fn next_delay(&self) -> Option<Duration> {
        self.jobs.lock().front().map(|(d, _)| *d)
    }

    /// Fires the oldest queued job. Returns `false` if none was queued.
    pub fn run_next(&self) -> bool {
        let job = self.jobs.lock().pop_front();
        match job {
            Some((_, job)) => {
                job();
                true
            }
            None => false,
        }
    }
}

impl Ticker for ManualTicker {
    fn queue_timed_job(&self, job: Job, delay: Duration) {
        self.jobs.lock().push_back((delay, job));
    }
}

/// Executor that runs jobs on the calling thread.
///
/// Only usable when the test scripts every downstream reply through send
/// hooks, so the handler never actually blocks.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, _name: &str, job: Job) {
        job();
    }
}
