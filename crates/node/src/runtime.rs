//! Scheduling and dispatch seams.
//!
//! The manager never spawns its own periodic machinery: a [`Ticker`] owned
//! by the surrounding node fires its probe ticks, and an [`Executor`]
//! dispatches inbound probe handling off the transport thread. The shared
//! recently-completed UID set is consumed through [`CompletedTracker`].

use std::time::Duration;

use tracing::error;
use veilnet_common::UidHistory;

/// A job handed to the ticker or executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Deferred-execution seam: runs `job` once, `delay` from now.
pub trait Ticker: Send + Sync {
    fn queue_timed_job(&self, job: Job, delay: Duration);
}

/// Worker-thread seam for inbound message handling.
pub trait Executor: Send + Sync {
    fn execute(&self, name: &str, job: Job);
}

/// Standard [`Executor`]: one named OS thread per job.
///
/// Inbound probe handling blocks on downstream replies for up to the pong
/// timeout, so jobs must not share a thread.
#[derive(Debug, Default)]
pub struct ThreadExecutor;

impl ThreadExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, name: &str, job: Job) {
        let spawned = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(job);
        if let Err(e) = spawned {
            error!("failed to spawn worker thread {name}: {e}");
        }
    }
}

/// Shared dedupe set of recently completed probe UIDs.
///
/// One probe transaction must be forwarded by a node at most once; a
/// replayed UID is answered with a loop rejection.
pub trait CompletedTracker: Send + Sync {
    fn recently_completed(&self, uid: u64) -> bool;
    fn completed(&self, uid: u64);
}

impl CompletedTracker for UidHistory {
    fn recently_completed(&self, uid: u64) -> bool {
        self.contains(uid)
    }

    fn completed(&self, uid: u64) {
        self.record(uid);
    }
}
