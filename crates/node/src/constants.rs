//! Process-local tunables for the network-id manager.
//!
//! These are constants, not configuration: they encode protocol behavior
//! that every node must share for probe results to be comparable.

use std::time::Duration;

/// How long to wait for an `Accepted` after sending `StoreSecret`.
pub const ACCEPTED_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a `SecretPong` or `RejectedLoop` after forwarding
/// or launching a `SecretPing`.
pub const SECRETPONG_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay before the first probe work after startup.
pub const STARTUP_DELAY: Duration = Duration::from_secs(20);

/// Tick interval while the work queue is non-empty, and the window inside
/// which a group counts as recently assigned (anti-thrash).
pub const BETWEEN_PEERS: Duration = Duration::from_secs(2);

/// Tick interval once every connected peer has been probed (steady state).
pub const LONG_PERIOD: Duration = Duration::from_secs(120);

/// Politeness sleep between two probes of the same volley.
pub const BETWEEN_PING_SLEEP: Duration = Duration::from_millis(200);

/// Lowest HTL the adaptive sampler will ever pick.
pub const MIN_HTL: i16 = 3;

/// Sentinel meaning "no network id assigned / advertised yet".
pub const NO_NETWORKID: i32 = 0;

/// Probes per connected peer to drain before the first reckoning.
pub const MIN_PINGS_FOR_STARTUP: usize = 3;

/// Sample count below which the adaptive sampler refuses to experiment.
pub const COMFORT_LEVEL: u64 = 20;

/// Probe volleys between two network-id reckonings.
pub const PING_VOLLEYS_PER_NETWORK_RECOMPUTE: u32 = 5;

/// Cluster admission threshold as a fraction of the seed's own setwise
/// connectivity. 1.0 disables grace entirely.
pub const MAGIC_LINEAR_GRACE: f64 = 0.8;

/// Setwise connectivity below which clustering falls open and lumps every
/// remaining peer into one group. This is what groups all peers with the
/// probe protocol disabled into a single last bucket.
pub const FALL_OPEN_MARK: f64 = 0.2;

/// Mutual ping average above which a lone leftover peer is merged into a
/// lone-seed cluster rather than split off.
pub const DREGS_MERGE_MARK: f64 = 0.25;

/// Decay horizon for every probe running average.
pub const SAMPLE_HORIZON: u64 = 200;
