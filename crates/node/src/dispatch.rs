//! Blocking filtered message waits.
//!
//! Probe transactions are synchronous conversations: send, then block for
//! the matching reply or a timeout. [`MessageWait`] is the seam the manager
//! consumes; [`MessageHub`] is the standard implementation, a selector over
//! per-wait inboxes keyed by `(source, uid, kind set)`.
//!
//! Replies that arrive before the waiter registers are parked in a bounded
//! backlog and matched on registration, so callers never lose the race
//! between send and wait.
//!
//! No manager lock is ever held across `wait_for`; the hub owns its own
//! state exclusively.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use veilnet_proto::{Message, MessageKind};

use crate::peer::PeerId;

/// Messages parked while no matching wait is registered. Beyond this the
/// oldest are dropped; a dropped reply degrades to a probe timeout.
const BACKLOG_LIMIT: usize = 256;

/// What a blocking wait is willing to accept.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pub source: PeerId,
    pub uid: u64,
    pub kinds: Vec<MessageKind>,
}

impl MessageFilter {
    pub fn new(source: PeerId, uid: u64, kinds: &[MessageKind]) -> Self {
        Self {
            source,
            uid,
            kinds: kinds.to_vec(),
        }
    }

    fn matches(&self, source: PeerId, msg: &Message) -> bool {
        source == self.source && msg.uid() == Some(self.uid) && self.kinds.contains(&msg.kind())
    }
}

/// Why a wait ended without a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// Nothing matching arrived inside the timeout.
    #[error("timed out waiting for a matching message")]
    Timeout,
    /// The awaited source disconnected while we were waiting.
    #[error("peer disconnected while awaited")]
    Disconnected,
}

/// Blocking wait for one message matching a filter.
pub trait MessageWait: Send + Sync {
    fn wait_for(&self, filter: MessageFilter, timeout: Duration) -> Result<Message, WaitError>;
}

// ════════════════════════════════════════════════════════════════════════════
// MESSAGE HUB
// ════════════════════════════════════════════════════════════════════════════

struct PendingWait {
    id: u64,
    filter: MessageFilter,
    tx: mpsc::SyncSender<Result<Message, WaitError>>,
}

#[derive(Default)]
struct HubState {
    pending: Vec<PendingWait>,
    backlog: Vec<(PeerId, Message)>,
}

/// Standard [`MessageWait`] implementation.
///
/// The transport layer feeds every inbound reply-class message into
/// [`MessageHub::deliver`]; disconnects are announced through
/// [`MessageHub::peer_disconnected`] so blocked waiters fail fast instead
/// of running out their timeout.
#[derive(Default)]
pub struct MessageHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl MessageHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an inbound message to the first matching waiter, or parks it
    /// in the backlog. Returns `true` if a waiter consumed it.
    pub fn deliver(&self, source: PeerId, msg: Message) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state
            .pending
            .iter()
            .position(|w| w.filter.matches(source, &msg))
        {
            let waiter = state.pending.swap_remove(pos);
            // A full or dropped receiver means the waiter already timed out.
            let _ = waiter.tx.try_send(Ok(msg));
            return true;
        }
        state.backlog.push((source, msg));
        if state.backlog.len() > BACKLOG_LIMIT {
            let (from, dropped) = state.backlog.remove(0);
            debug!("message backlog full, dropping {:?} from {}", dropped.kind(), from);
        }
        false
    }

    /// Fails every wait blocked on `peer` with [`WaitError::Disconnected`]
    /// and clears its parked messages.
    pub fn peer_disconnected(&self, peer: PeerId) {
        let mut state = self.state.lock();
        let mut i = 0;
        while i < state.pending.len() {
            if state.pending[i].filter.source == peer {
                let waiter = state.pending.swap_remove(i);
                let _ = waiter.tx.try_send(Err(WaitError::Disconnected));
            } else {
                i += 1;
            }
        }
        state.backlog.retain(|(from, _)| *from != peer);
    }
}

impl MessageWait for MessageHub {
    fn wait_for(&self, filter: MessageFilter, timeout: Duration) -> Result<Message, WaitError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            // A matching reply may already be parked.
            if let Some(pos) = state
                .backlog
                .iter()
                .position(|(from, msg)| filter.matches(*from, msg))
            {
                let (_, msg) = state.backlog.remove(pos);
                return Ok(msg);
            }
            state.pending.push(PendingWait { id, filter, tx });
        }

        let outcome = rx
            .recv_timeout(timeout)
            .unwrap_or(Err(WaitError::Timeout));
        if outcome.is_err() {
            // Deregister so a late reply does not wake a dead slot.
            self.state.lock().pending.retain(|w| w.id != id);
        }
        outcome
    }
}
