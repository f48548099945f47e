//! # Veilnet Proto Crate
//!
//! Wire message schema for the reachability-probe protocol spoken between
//! directly-connected overlay neighbours.
//!
//! The schema is a stable contract: variants and field sets must not be
//! changed incompatibly once deployed. Transport framing (encryption,
//! packet layout, retransmission) lives below this crate; peers exchange
//! these messages as typed values.

pub mod messages;

pub use messages::{Message, MessageKind};
