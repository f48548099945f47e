//! # Veilnet Node Crate: Network-ID Manager
//!
//! Partitions a node's directly-connected neighbours into *network groups*
//! by measuring pairwise reachability with HTL-bounded secret pings, and
//! publishes a consensus integer label (the *network id*) for the group
//! the local node believes it belongs to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       NetworkIdManager                           │
//! │                                                                  │
//! │  inbound msgs ──▶ protocol ──▶ SecretStore (uid ↔ peer ↔ secret) │
//! │                      │                                           │
//! │                      ▼ forward / answer                          │
//! │  ticker ────▶ prober volleys ──▶ SampleMatrix (target→via)       │
//! │                      │                │                          │
//! │                      ▼ every N        ▼ averages                 │
//! │               reckoning ─────▶ group registry ──▶ our network id │
//! │                      ▲                                           │
//! │  peer announces id ──┘ (reactive relabel, anti-thrash)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Collaborators
//!
//! Everything outside the manager is consumed through traits and supplied
//! by the surrounding node:
//!
//! | Seam | Trait | Standard impl |
//! |------|-------|---------------|
//! | neighbour handle | [`PeerNode`] | node's peer objects |
//! | routing oracle | [`PeerTable`] | node's peer table |
//! | filtered waits | [`MessageWait`] | [`MessageHub`] |
//! | periodic work | [`Ticker`] | node's ticker |
//! | inbound dispatch | [`Executor`] | [`ThreadExecutor`] |
//! | uid dedupe | [`CompletedTracker`] | `veilnet_common::UidHistory` |
//!
//! # Key Invariants
//!
//! 1. **Single prober**: at most one probe volley is in flight; a
//!    re-entrant tick is a logged no-op.
//! 2. **Errors are samples**: every probe failure produces exactly one
//!    failure sample on the relevant pair; nothing poisons the node.
//! 3. **No lock across a wait**: blocking waits and sleeps happen outside
//!    every manager lock.
//! 4. **Off by default**: both protocol directions are disabled until
//!    explicitly enabled in [`NimConfig`].
//!
//! State is fully volatile; any transient anomaly during one round is
//! corrected by the next.

pub mod constants;
pub mod dispatch;
pub mod groups;
pub mod manager;
pub mod peer;
pub mod ping_record;
pub mod prober;
pub mod protocol;
pub mod reckoning;
pub mod runtime;
pub mod sample_matrix;
pub mod secret_store;
pub mod testing;

pub use dispatch::{MessageFilter, MessageHub, MessageWait, WaitError};
pub use groups::PeerNetworkGroup;
pub use manager::{NetworkIdManager, NimConfig};
pub use peer::{PeerGone, PeerId, PeerNode, PeerRef, PeerTable};
pub use ping_record::PingRecord;
pub use runtime::{CompletedTracker, Executor, Job, ThreadExecutor, Ticker};
pub use sample_matrix::SampleMatrix;
pub use secret_store::{SecretStore, StoredSecret};
