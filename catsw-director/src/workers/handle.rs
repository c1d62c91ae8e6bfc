//! Worker supervision record
//!
//! One handle per spawned worker thread. Field ownership is split so no
//! field has two writers: the control loop only writes the stop flag, the
//! worker writes everything else.

use crate::types::SceneId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What a worker produces votes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Detection(SceneId),
    Chat,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Detection(scene) => write!(f, "detection:{}", scene),
            WorkerKind::Chat => f.write_str("chat"),
        }
    }
}

/// Shared between one worker thread and the control loop
#[derive(Debug)]
pub struct WorkerHandle {
    kind: WorkerKind,
    /// Distinguishes successive incarnations of the same worker in logs
    instance: Uuid,
    epoch: Instant,

    /// Written by the control loop
    stop: AtomicBool,

    /// Written by the worker: milliseconds since `epoch`
    heartbeat_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    successes: AtomicU64,
    unhealthy: AtomicBool,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl WorkerHandle {
    /// Fresh handle; the heartbeat starts at creation time
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            instance: Uuid::new_v4(),
            epoch: Instant::now(),
            stop: AtomicBool::new(false),
            heartbeat_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            successes: AtomicU64::new(0),
            unhealthy: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Record progress now
    pub fn beat(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.heartbeat_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.epoch + Duration::from_millis(self.heartbeat_ms.load(Ordering::Relaxed))
    }

    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat())
    }

    /// Count one transient failure; returns the new consecutive count
    ///
    /// Reaching `threshold` marks the worker unhealthy. The worker keeps
    /// running; restarting it is the control loop's call.
    pub fn record_failure(&self, error: impl Into<String>, threshold: u32) -> u32 {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.into());
        if threshold > 0 && count >= threshold {
            self.unhealthy.store(true, Ordering::Relaxed);
        }
        count
    }

    /// Reset the failure run after a successful iteration
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.unhealthy.store(false, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Relaxed)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
