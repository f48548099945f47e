//! Peer handle and routing-table seams.
//!
//! The manager never owns its neighbours: peers are opaque handles owned by
//! the node's peer table, consumed here through two traits. [`PeerNode`] is
//! one directly-connected neighbour; [`PeerTable`] is the routing oracle
//! that enumerates and ranks them. Both are implemented by the surrounding
//! node in production and by in-memory fakes in tests.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use veilnet_proto::Message;

/// Stable identity of a directly-connected neighbour.
///
/// Identity-keyed maps use this instead of holding the handle itself, so
/// that record lifetimes are decoupled from handle lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{:016x}", self.0)
    }
}

/// The peer on the other end of a send has disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("peer is not connected")]
pub struct PeerGone;

/// One directly-connected neighbour, as seen by the network-id manager.
///
/// Implementations must be cheap to clone through [`PeerRef`] and safe to
/// call from any thread. Sends are fire-and-forget at this layer; delivery
/// guarantees live in the transport below.
pub trait PeerNode: Send + Sync {
    /// Stable identity of this peer.
    fn id(&self) -> PeerId;

    /// The peer's ring location in `[0.0, 1.0)`.
    fn location(&self) -> f64;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Whether requests may currently be routed through this peer.
    fn is_routable(&self) -> bool;

    /// Applies this link's HTL policy to an incoming budget, returning the
    /// budget to forward with.
    fn decrement_htl(&self, htl: i16) -> i16;

    /// Queues a message without waiting for transmission.
    fn send_async(&self, msg: Message) -> Result<(), PeerGone>;

    /// Sends a message, returning once it is handed to the transport.
    fn send_sync(&self, msg: Message) -> Result<(), PeerGone>;

    /// The network id this peer most recently announced, or the
    /// no-network-id sentinel.
    fn provided_network_id(&self) -> i32;

    /// Records the network id we assigned to this peer's group.
    fn set_assigned_network_id(&self, id: i32);
}

/// Shared handle to a neighbour.
pub type PeerRef = Arc<dyn PeerNode>;

/// Routing-table oracle over all directly-connected peers.
pub trait PeerTable: Send + Sync {
    /// The connected peer closest to `target_location`, excluding `source`
    /// and everything in `exclude`. Repeated calls with an accumulating
    /// exclusion set walk all connected peers in routing order.
    fn closer_peer(
        &self,
        source: Option<&PeerId>,
        exclude: &HashSet<PeerId>,
        target_location: f64,
    ) -> Option<PeerRef>;

    /// A uniformly random connected peer other than `exclude_source`.
    fn random_peer(&self, exclude_source: &PeerId) -> Option<PeerRef>;

    /// Cheap count of currently connected peers.
    fn quick_count_connected(&self) -> usize;
}
