//! Server side of the secret-ping protocol.
//!
//! Two inbound messages are handled here. `StoreSecret` lodges a nonce from
//! a direct neighbour and is never forwarded. `SecretPing` either resolves
//! against a lodged nonce (we are the intended recipient) or is forwarded
//! hop by hop: a random step while the HTL is above its dawn value, then
//! greedy routing toward the target location, with loop rejection and a
//! bounded retry walk over the candidate set.
//!
//! Handlers are idempotent against replayed UIDs via the shared
//! recently-completed set. Every forward waits synchronously for the
//! downstream verdict, so ping handling runs on the executor, never on the
//! transport thread.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use veilnet_proto::{Message, MessageKind};

use crate::constants::SECRETPONG_TIMEOUT;
use crate::dispatch::{MessageFilter, WaitError};
use crate::manager::NetworkIdManager;
use crate::peer::{PeerId, PeerRef};

/// Terminal failures of one inbound ping transaction. Loop rejections and
/// timeouts are not errors; they end the transaction normally.
#[derive(Debug, Error)]
pub(crate) enum SecretPingError {
    /// The upstream requester disconnected mid-forward; nobody is left to
    /// answer.
    #[error("source disconnected while forwarding")]
    SourceGone,
}

impl NetworkIdManager {
    /// Entry point for inbound probe messages from a direct neighbour.
    ///
    /// Returns `true` if the message was consumed. Reply-class messages
    /// (`Accepted`, `SecretPong`, `RejectedLoop`) are not consumed here;
    /// the transport routes them into the message-wait hub instead.
    pub fn handle_message(&self, source: &PeerRef, msg: Message) -> bool {
        match msg {
            Message::StoreSecret { uid, secret } => self.handle_store_secret(source, uid, secret),
            Message::SecretPing {
                uid,
                target_location,
                htl,
                dawn_htl,
                counter,
            } => self.handle_secret_ping(source, uid, target_location, htl, dawn_htl, counter),
            _ => false,
        }
    }

    /// Lodges the secret carried by a `StoreSecret` from `source`.
    ///
    /// Never forwarded: the message is only an alert that a third party
    /// may come asking for the secret. Acks best-effort.
    pub fn handle_store_secret(&self, source: &PeerRef, uid: u64, secret: u64) -> bool {
        debug!("storing secret uid={uid} for {}", source.id());
        self.secrets.put(source.id(), uid, secret);
        if source.send_async(Message::Accepted { uid }).is_err() {
            error!("{} disconnected before store-secret ack", source.id());
        }
        true
    }

    /// Dispatches an inbound `SecretPing` onto the executor.
    pub fn handle_secret_ping(
        &self,
        source: &PeerRef,
        uid: u64,
        target_location: f64,
        htl: i16,
        dawn_htl: i16,
        counter: i32,
    ) -> bool {
        let Some(manager) = self.self_ref.upgrade() else {
            return false;
        };
        let source = Arc::clone(source);
        let name = format!("secret-ping-{uid:016x}");
        self.executor.execute(
            &name,
            Box::new(move || {
                if let Err(e) =
                    manager.answer_secret_ping(&source, uid, target_location, htl, dawn_htl, counter)
                {
                    info!("secret ping uid={uid}: {e}");
                }
            }),
        );
        true
    }

    /// Answers or forwards one inbound ping. Exactly one upstream reply is
    /// sent unless the source itself goes away or a downstream wait times
    /// out.
    fn answer_secret_ping(
        &self,
        source: &PeerRef,
        uid: u64,
        target_location: f64,
        htl: i16,
        dawn_htl: i16,
        counter: i32,
    ) -> Result<(), SecretPingError> {
        if !self.config.enable_secret_pings || self.completed.recently_completed(uid) {
            debug!("recently completed or disabled, rejecting uid={uid}");
            return self.reject_loop(source, uid);
        }

        if let Some(stored) = self.secrets.by_uid(uid) {
            // The ping has reached its intended recipient. Do not mark the
            // uid completed: we may reject it from one path as too short
            // and still accept it from a longer one.
            if htl > dawn_htl {
                debug!("path still in random prefix (htl {htl} > dawn {dawn_htl}), rejecting uid={uid}");
                return self.reject_loop(source, uid);
            }
            debug!("answering uid={uid} with secret lodged by {}", stored.peer);
            if source
                .send_async(Message::SecretPong {
                    uid,
                    counter: counter + 1,
                    secret: stored.secret,
                })
                .is_err()
            {
                return Err(SecretPingError::SourceGone);
            }
            return Ok(());
        }

        // Not for us. Mark completed now so loops are rejected without
        // keeping the uid locked, then forward.
        self.completed.completed(uid);
        self.forward_secret_ping(source, uid, target_location, htl, dawn_htl, counter)
    }

    /// The forwarding walk: pick a next hop, relay, await its verdict,
    /// and either relay a pong upstream or move on to the next candidate.
    fn forward_secret_ping(
        &self,
        source: &PeerRef,
        uid: u64,
        target_location: f64,
        mut htl: i16,
        dawn_htl: i16,
        mut counter: i32,
    ) -> Result<(), SecretPingError> {
        let mut routed_to: HashSet<PeerId> = HashSet::new();
        loop {
            // One random hop opens the walk while the budget is still in
            // its random prefix; afterwards greedy routing takes over.
            let next = if htl > dawn_htl && routed_to.is_empty() {
                self.peers.random_peer(&source.id())
            } else {
                self.peers
                    .closer_peer(Some(&source.id()), &routed_to, target_location)
            };

            let Some(next) = next else {
                // Exhausted every candidate without an answer.
                return self.reject_loop(source, uid);
            };

            htl = next.decrement_htl(htl);
            if htl <= 0 {
                return self.reject_loop(source, uid);
            }

            if !source.is_connected() {
                return Err(SecretPingError::SourceGone);
            }

            counter += 1;
            routed_to.insert(next.id());
            if next
                .send_async(Message::SecretPing {
                    uid,
                    target_location,
                    htl,
                    dawn_htl,
                    counter,
                })
                .is_err()
            {
                info!("{} disconnected before secret-ping forward", next.id());
                continue;
            }

            let verdict = self.waiter.wait_for(
                MessageFilter::new(
                    next.id(),
                    uid,
                    &[MessageKind::SecretPong, MessageKind::RejectedLoop],
                ),
                SECRETPONG_TIMEOUT,
            );

            match verdict {
                Ok(Message::SecretPong {
                    counter: supplied,
                    secret,
                    ..
                }) => {
                    let counter = counter.max(supplied);
                    debug!(
                        "relaying secret pong uid={uid} counter={counter} from {} to {}",
                        next.id(),
                        source.id()
                    );
                    if source
                        .send_async(Message::SecretPong { uid, counter, secret })
                        .is_err()
                    {
                        return Err(SecretPingError::SourceGone);
                    }
                    return Ok(());
                }
                Ok(Message::RejectedLoop { .. }) => {
                    debug!("secret ping rejected by {}, trying next candidate", next.id());
                    continue;
                }
                Ok(other) => {
                    error!("unexpected message type in secret-ping wait: {:?}", other.kind());
                    return Ok(());
                }
                Err(WaitError::Disconnected) => {
                    info!("{} disconnected while awaited for a secret pong", next.id());
                    continue;
                }
                Err(WaitError::Timeout) => {
                    // No upstream reply on timeout; the requester's own
                    // timeout covers this path.
                    error!("fatal timeout waiting for secret pong from {}", next.id());
                    return Ok(());
                }
            }
        }
    }

    fn reject_loop(&self, source: &PeerRef, uid: u64) -> Result<(), SecretPingError> {
        if source.send_async(Message::RejectedLoop { uid }).is_err() {
            return Err(SecretPingError::SourceGone);
        }
        Ok(())
    }
}
