//! Per-camera presence detection worker
//!
//! Polls the latest frame of one camera, asks the detector whether a cat is
//! in it, and votes for the camera's own scene. Every failure is transient:
//! it is counted on the handle and the next iteration tries again.

use super::{sleep_unless_stopped, SourceSlot, WorkerHandle, WorkerKind};
use crate::collaborators::{Detector, FrameSource};
use crate::error::{Error, Result};
use crate::ledger::VoteLedger;
use crate::types::{SceneId, Vote};
use catsw_common::CatswConfig;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub poll_interval: Duration,
    pub frame_timeout: Duration,
    pub confidence_threshold: f64,
    pub presence_weight: f64,
    /// 0 records nothing on absence
    pub absence_weight: f64,
    pub failure_threshold: u32,
}

impl DetectionSettings {
    pub fn from_config(config: &CatswConfig) -> Self {
        let detection = &config.detection;
        Self {
            poll_interval: detection.poll_interval(),
            frame_timeout: detection.frame_timeout(),
            confidence_threshold: detection.confidence_threshold,
            presence_weight: detection.presence_weight,
            absence_weight: detection.absence_weight,
            failure_threshold: detection.failure_threshold,
        }
    }
}

/// Everything a detection worker needs; cloned for every (re)spawn
#[derive(Clone)]
pub struct DetectionContext {
    pub scene: SceneId,
    /// Shared with the control loop, which refreshes it from the sink
    pub slot: Arc<SourceSlot>,
    pub frames: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub ledger: Arc<VoteLedger>,
    pub settings: DetectionSettings,
}

/// Result of one polling iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// No source reference known yet
    NoSource,
    /// A vote of this weight was recorded
    Voted(f64),
    /// Detection ran but nothing was recorded
    NoVote,
    FrameFailed,
    DetectorFailed,
    /// Stop was requested before the vote could be recorded
    Stopped,
}

pub struct DetectionWorker {
    ctx: DetectionContext,
    handle: Arc<WorkerHandle>,
}

impl DetectionWorker {
    pub fn new(ctx: DetectionContext, handle: Arc<WorkerHandle>) -> Self {
        Self { ctx, handle }
    }

    /// Start a fresh worker thread with a fresh handle
    pub fn spawn(ctx: DetectionContext) -> Result<(Arc<WorkerHandle>, JoinHandle<()>)> {
        let kind = WorkerKind::Detection(ctx.scene.clone());
        let handle = Arc::new(WorkerHandle::new(kind.clone()));
        let worker = Self::new(ctx, Arc::clone(&handle));
        let thread = thread::Builder::new()
            .name(format!("detect-{}", worker.ctx.scene))
            .spawn(move || worker.run())
            .map_err(|source| Error::Spawn {
                worker: kind.to_string(),
                source,
            })?;
        Ok((handle, thread))
    }

    /// Poll at a fixed start-to-start period until stopped
    pub fn run(self) {
        info!(
            scene = %self.ctx.scene,
            instance = %self.handle.instance_id(),
            "Detection worker started"
        );

        while !self.handle.should_stop() {
            let started = Instant::now();
            self.handle.beat();
            let outcome = self.poll_once();
            debug!(scene = %self.ctx.scene, ?outcome, "Detection poll");

            let remaining = self.ctx.settings.poll_interval.saturating_sub(started.elapsed());
            if sleep_unless_stopped(&self.handle, remaining) {
                break;
            }
        }

        debug!(scene = %self.ctx.scene, "Detection worker exiting");
    }

    /// Run a single grab-detect-vote iteration
    pub fn poll_once(&self) -> PollOutcome {
        let Some(source) = self.ctx.slot.get() else {
            return PollOutcome::NoSource;
        };
        let threshold = self.ctx.settings.failure_threshold;

        let frame = match self
            .ctx
            .frames
            .latest_frame(&source, self.ctx.settings.frame_timeout)
        {
            Ok(frame) => frame,
            Err(e) => {
                let failures = self.handle.record_failure(e.to_string(), threshold);
                warn!(
                    scene = %self.ctx.scene,
                    "Frame grab failed ({} in a row): {}", failures, e
                );
                if failures == threshold {
                    warn!(scene = %self.ctx.scene, "Camera marked unhealthy");
                }
                return PollOutcome::FrameFailed;
            }
        };
        self.handle.beat();

        let detection = match self.ctx.detector.detect(&frame) {
            Ok(detection) => detection,
            Err(e) => {
                let failures = self.handle.record_failure(e.to_string(), threshold);
                warn!(
                    scene = %self.ctx.scene,
                    "Detection failed ({} in a row): {}", failures, e
                );
                return PollOutcome::DetectorFailed;
            }
        };
        self.handle.record_success();

        let settings = &self.ctx.settings;
        let weight = if detection.present && detection.confidence >= settings.confidence_threshold {
            settings.presence_weight
        } else {
            settings.absence_weight
        };
        if weight == 0.0 {
            return PollOutcome::NoVote;
        }

        // An abandoned worker must not vote after it was told to stop.
        if self.handle.should_stop() {
            return PollOutcome::Stopped;
        }
        self.ctx
            .ledger
            .record(Vote::detection(self.ctx.scene.clone(), weight, Instant::now()));
        PollOutcome::Voted(weight)
    }
}
