//! Vote-producing worker threads
//!
//! Each worker runs on its own OS thread for its whole life and talks to
//! the rest of the system only through the [`VoteLedger`](crate::ledger::VoteLedger)
//! and its [`WorkerHandle`]. Every blocking wait is bounded, and sleeps are
//! sliced so a stop request is seen within [`STOP_POLL_SLICE`].

pub mod chat;
pub mod detection;
pub mod handle;

pub use chat::{ChatContext, ChatSettings, ChatVoteWorker, TierWeights, VoteKeyMap, VoteWeigher};
pub use detection::{DetectionContext, DetectionSettings, DetectionWorker, PollOutcome};
pub use handle::{WorkerHandle, WorkerKind};

use crate::types::SourceRef;
use std::sync::RwLock;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside a worker
pub const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `total`, waking early on stop
///
/// Beats the heartbeat on every slice: a sleeping worker is idle, not
/// stalled. Returns true when stop was requested.
pub fn sleep_unless_stopped(handle: &WorkerHandle, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if handle.should_stop() {
            return true;
        }
        handle.beat();
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(STOP_POLL_SLICE.min(deadline - now));
    }
}

/// Join a thread, giving up after `timeout`
///
/// Returns the handle back when the thread is still running so the caller
/// can decide to abandon it.
pub fn join_with_timeout(thread: JoinHandle<()>, timeout: Duration) -> Result<(), JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            return Err(thread);
        }
        std::thread::sleep(STOP_POLL_SLICE);
    }
    // A worker that panicked has already logged; nothing left to do with it.
    let _ = thread.join();
    Ok(())
}

/// A camera's current source reference, updated by the control loop
#[derive(Debug, Default)]
pub struct SourceSlot(RwLock<Option<SourceRef>>);

impl SourceSlot {
    pub fn new(initial: Option<SourceRef>) -> Self {
        Self(RwLock::new(initial))
    }

    pub fn get(&self) -> Option<SourceRef> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the reference; returns true when it actually changed
    pub fn set(&self, source: SourceRef) -> bool {
        let mut slot = self.0.write().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref() == Some(&source) {
            return false;
        }
        *slot = Some(source);
        true
    }
}
