//! Probe protocol messages.
//!
//! Six messages implement the secret-ping reachability probe and network-id
//! announcement flow:
//!
//! | Message | Forwarded? | Meaning |
//! |---------|------------|---------|
//! | `StoreSecret` | never | Lodge a nonce at a neighbour ahead of a probe. |
//! | `Accepted` | never | Ack for `StoreSecret`. |
//! | `SecretPing` | yes | Probe routed toward the holder of the nonce. |
//! | `SecretPong` | relayed upstream | Probe succeeded; carries the nonce back. |
//! | `RejectedLoop` | relayed upstream | Path too short, loop, or no route. |
//! | `NetworkId` | never | Peer announces the network id it believes in. |

use serde::{Deserialize, Serialize};

/// One peer-to-peer protocol message.
///
/// INVARIANTS:
/// - `uid` identifies a probe transaction end to end; every message of one
///   transaction carries the same `uid`.
/// - `htl` and `dawn_htl` are only meaningful on `SecretPing` and are
///   rewritten hop by hop; all other fields are immutable in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Lodge `secret` under `uid` at the receiving peer. Never forwarded;
    /// an alert that a third party may come asking for the secret.
    StoreSecret { uid: u64, secret: u64 },

    /// Acknowledges a `StoreSecret` with the same `uid`.
    Accepted { uid: u64 },

    /// Forwardable probe. Routed randomly while `htl > dawn_htl`, then
    /// greedily toward `target_location`.
    SecretPing {
        uid: u64,
        /// Ring location of the intended recipient.
        target_location: f64,
        /// Hops-to-live; decremented per link.
        htl: i16,
        /// HTL value at which deterministic routing takes over.
        dawn_htl: i16,
        /// Hop counter, incremented per forward.
        counter: i32,
    },

    /// Success reply: the recipient held `secret` under `uid`.
    SecretPong { uid: u64, counter: i32, secret: u64 },

    /// Negative reply: loop, exhausted routes, or a path still inside its
    /// random prefix. A normal outcome, not an error.
    RejectedLoop { uid: u64 },

    /// The sending peer announces the network id it believes it belongs to.
    NetworkId { id: i32 },
}

/// Discriminant of a [`Message`], used by filtered waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    StoreSecret,
    Accepted,
    SecretPing,
    SecretPong,
    RejectedLoop,
    NetworkId,
}

impl Message {
    /// The message's kind discriminant.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StoreSecret { .. } => MessageKind::StoreSecret,
            Message::Accepted { .. } => MessageKind::Accepted,
            Message::SecretPing { .. } => MessageKind::SecretPing,
            Message::SecretPong { .. } => MessageKind::SecretPong,
            Message::RejectedLoop { .. } => MessageKind::RejectedLoop,
            Message::NetworkId { .. } => MessageKind::NetworkId,
        }
    }

    /// The transaction UID, if this message kind carries one.
    /// `NetworkId` announcements are not part of a probe transaction.
    #[must_use]
    pub fn uid(&self) -> Option<u64> {
        match self {
            Message::StoreSecret { uid, .. }
            | Message::Accepted { uid }
            | Message::SecretPing { uid, .. }
            | Message::SecretPong { uid, .. }
            | Message::RejectedLoop { uid } => Some(*uid),
            Message::NetworkId { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            Message::StoreSecret { uid: 1, secret: 2 }.kind(),
            MessageKind::StoreSecret
        );
        assert_eq!(Message::Accepted { uid: 1 }.kind(), MessageKind::Accepted);
        assert_eq!(
            Message::SecretPong { uid: 1, counter: 0, secret: 2 }.kind(),
            MessageKind::SecretPong
        );
        assert_eq!(Message::NetworkId { id: 9 }.kind(), MessageKind::NetworkId);
    }

    #[test]
    fn test_uid_present_on_probe_messages() {
        let ping = Message::SecretPing {
            uid: 77,
            target_location: 0.5,
            htl: 6,
            dawn_htl: 4,
            counter: 0,
        };
        assert_eq!(ping.uid(), Some(77));
        assert_eq!(Message::RejectedLoop { uid: 3 }.uid(), Some(3));
    }

    #[test]
    fn test_uid_absent_on_network_id() {
        assert_eq!(Message::NetworkId { id: 42 }.uid(), None);
    }
}
