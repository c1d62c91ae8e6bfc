//! Control loop
//!
//! Owns the ledger, the selector, the sink and every worker. Lifecycle:
//!
//! ```text
//! Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! `Starting` spawns the workers, reads the live scene from the sink and
//! waits out the startup grace. Each `Running` cycle refreshes camera
//! sources, supervises the workers, decides and switches, then publishes
//! status. `Stopping` stops and joins every worker with a bounded wait.

pub mod status;

use crate::collaborators::{ChatConnector, Detector, FrameSource, SceneSink, SinkError};
use crate::error::{Error, Result};
use crate::ledger::{decay_policy, Tally, VoteLedger};
use crate::selector::{Decision, SceneSelector};
use crate::types::{SceneId, SourceRef};
use crate::workers::{
    join_with_timeout, ChatContext, ChatSettings, ChatVoteWorker,
    DetectionContext, DetectionSettings, DetectionWorker, SourceSlot, TierWeights, VoteKeyMap,
    WorkerHandle, WorkerKind, STOP_POLL_SLICE,
};
use catsw_common::config::SceneConfig;
use catsw_common::human_time::format_duration_opt;
use catsw_common::CatswConfig;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Control loop lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl LoopState {
    /// Upper-case label used in status text
    pub fn label(self) -> &'static str {
        match self {
            LoopState::Starting => "STARTING",
            LoopState::Running => "RUNNING",
            LoopState::Stopping => "STOPPING",
            LoopState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Currently live scene and when it went live
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    pub scene: Option<SceneId>,
    pub changed_at: Option<Instant>,
}

/// Builds the frame source for one camera
pub type FrameSourceFactory = Box<dyn Fn(&SceneConfig) -> Arc<dyn FrameSource> + Send>;

/// External collaborators handed to the control loop
pub struct Collaborators {
    pub sink: Box<dyn SceneSink>,
    pub frames: FrameSourceFactory,
    /// Required when detection is enabled
    pub detector: Option<Arc<dyn Detector>>,
    /// No chat worker is started without a connector
    pub chat: Option<Arc<dyn ChatConnector>>,
}

/// What happened during one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub decision: Decision,
    pub switched: bool,
    pub restarted: Vec<WorkerKind>,
    pub sources_updated: Vec<SceneId>,
    pub sink_errors: Vec<SinkError>,
}

enum WorkerSpec {
    Detection(DetectionContext),
    Chat(ChatContext),
}

impl WorkerSpec {
    fn spawn(&self) -> Result<(Arc<WorkerHandle>, JoinHandle<()>)> {
        match self {
            WorkerSpec::Detection(ctx) => DetectionWorker::spawn(ctx.clone()),
            WorkerSpec::Chat(ctx) => ChatVoteWorker::spawn(ctx.clone()),
        }
    }

    fn kind(&self) -> WorkerKind {
        match self {
            WorkerSpec::Detection(ctx) => WorkerKind::Detection(ctx.scene.clone()),
            WorkerSpec::Chat(_) => WorkerKind::Chat,
        }
    }
}

struct WorkerSlot {
    spec: WorkerSpec,
    /// `None` until first spawned
    handle: Option<Arc<WorkerHandle>>,
    thread: Option<JoinHandle<()>>,
    /// Previous incarnation that did not exit when told to stop
    abandoned: Option<JoinHandle<()>>,
    /// Restarted for being unhealthy and not yet succeeded since
    recovering: bool,
    /// Due for restart but held back by a still-running abandoned thread
    restart_deferred: bool,
}

impl WorkerSlot {
    fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            handle: None,
            thread: None,
            abandoned: None,
            recovering: false,
            restart_deferred: false,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let (handle, thread) = self.spec.spawn()?;
        debug!(worker = %handle.kind(), instance = %handle.instance_id(), "Worker spawned");
        self.handle = Some(handle);
        self.thread = Some(thread);
        Ok(())
    }

    fn request_stop(&self) {
        if let Some(handle) = &self.handle {
            handle.request_stop();
        }
    }

    /// Wait up to `timeout` for the current thread after its stop was
    /// requested; a thread that will not exit is kept as the abandoned one
    fn join(&mut self, timeout: Duration) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(thread) = join_with_timeout(thread, timeout) {
            warn!(
                "Worker {} did not stop within {:?}, abandoning its thread",
                self.spec.kind(),
                timeout
            );
            if self.abandoned.is_none() {
                self.abandoned = Some(thread);
            }
        }
    }

    /// Join the abandoned thread if it has finished; true when none is left
    fn reap_abandoned(&mut self) -> bool {
        match self.abandoned.take() {
            Some(thread) if thread.is_finished() => {
                let _ = thread.join();
                debug!("Abandoned thread of {} has exited", self.spec.kind());
                true
            }
            Some(thread) => {
                self.abandoned = Some(thread);
                false
            }
            None => true,
        }
    }

    /// Why this worker needs a restart at `now`, if it does
    fn restart_reason(&mut self, now: Instant, liveness: Duration) -> Option<String> {
        match &self.handle {
            None => Some("not running".to_string()),
            Some(handle) if handle.heartbeat_age(now) > liveness => Some(format!(
                "no heartbeat for {:?}",
                handle.heartbeat_age(now)
            )),
            Some(handle) if handle.is_unhealthy() => Some(format!(
                "unhealthy after {} failures ({})",
                handle.consecutive_failures(),
                handle.last_error().unwrap_or_default()
            )),
            Some(handle) => {
                if handle.successes() > 0 {
                    self.recovering = false;
                }
                self.restart_deferred = false;
                None
            }
        }
    }

    fn is_offline(&self) -> bool {
        match &self.handle {
            Some(handle) => {
                self.restart_deferred
                    || handle.is_unhealthy()
                    || (self.recovering && handle.successes() == 0)
            }
            None => true,
        }
    }
}

/// The director: workers, ledger, selector and sink under one cadence
pub struct ControlLoop {
    config: CatswConfig,
    state: LoopState,
    ledger: Arc<VoteLedger>,
    selector: SceneSelector,
    sink: Box<dyn SceneSink>,
    sources: HashMap<SceneId, Arc<SourceSlot>>,
    workers: Vec<WorkerSlot>,
    selection: SelectionState,
    cycle: u64,
    last_decision: Option<Decision>,
}

impl ControlLoop {
    /// Validate the configuration and wire up the collaborators
    ///
    /// Nothing is spawned until [`ControlLoop::start`].
    pub fn new(config: CatswConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(VoteLedger::with_decay(
            config.votes.ttl(),
            decay_policy(config.votes.decay),
        ));
        let selector = SceneSelector::from_config(&config)?;

        let detector = match (&collaborators.detector, config.detection.enabled) {
            (_, false) => None,
            (Some(detector), true) => Some(Arc::clone(detector)),
            (None, true) => {
                return Err(Error::InvalidState(
                    "detection is enabled but no detector was supplied".to_string(),
                ))
            }
        };

        let mut sources = HashMap::new();
        let mut workers = Vec::new();
        let detection = DetectionSettings::from_config(&config);
        for scene in &config.scenes {
            let id = SceneId::new(scene.id.clone());
            let slot = Arc::new(SourceSlot::new(scene.source.as_deref().map(SourceRef::from)));
            sources.insert(id.clone(), Arc::clone(&slot));

            if let Some(detector) = &detector {
                workers.push(WorkerSlot::new(WorkerSpec::Detection(DetectionContext {
                    scene: id,
                    slot,
                    frames: (collaborators.frames)(scene),
                    detector: Arc::clone(detector),
                    ledger: Arc::clone(&ledger),
                    settings: detection.clone(),
                })));
            }
        }

        if let Some(connector) = collaborators.chat {
            workers.push(WorkerSlot::new(WorkerSpec::Chat(ChatContext {
                connector,
                keys: Arc::new(VoteKeyMap::from_config(&config)),
                weigher: Arc::new(TierWeights::from_config(&config)),
                ledger: Arc::clone(&ledger),
                settings: ChatSettings::from_config(&config),
            })));
        }

        Ok(Self {
            config,
            state: LoopState::Starting,
            ledger,
            selector,
            sink: collaborators.sink,
            sources,
            workers,
            selection: SelectionState::default(),
            cycle: 0,
            last_decision: None,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn ledger(&self) -> &Arc<VoteLedger> {
        &self.ledger
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    /// Current handle of a worker, if it has been spawned
    pub fn worker_handle(&self, kind: &WorkerKind) -> Option<Arc<WorkerHandle>> {
        self.workers
            .iter()
            .find(|w| &w.spec.kind() == kind)
            .and_then(|w| w.handle.clone())
    }

    pub fn worker_handles(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.iter().filter_map(|w| w.handle.clone()).collect()
    }

    pub fn source_slot(&self, scene: &str) -> Option<Arc<SourceSlot>> {
        self.sources.get(scene).cloned()
    }

    /// Scenes currently excluded from winning a switch
    pub fn offline_scenes(&self) -> HashSet<SceneId> {
        if !self.config.director.skip_offline_scenes {
            return HashSet::new();
        }
        self.workers
            .iter()
            .filter(|w| w.is_offline())
            .filter_map(|w| match &w.spec {
                WorkerSpec::Detection(ctx) => Some(ctx.scene.clone()),
                WorkerSpec::Chat(_) => None,
            })
            .collect()
    }

    /// Spawn every worker, adopt the sink's live scene and wait out the
    /// startup grace
    ///
    /// A spawn failure stops whatever was already started and is returned.
    pub fn start(&mut self, stop: &AtomicBool) -> Result<()> {
        self.state = LoopState::Starting;
        info!(
            "Director starting: {} scenes, {} workers",
            self.config.scenes.len(),
            self.workers.len()
        );

        self.refresh_sources();

        for index in 0..self.workers.len() {
            if let Err(e) = self.workers[index].spawn() {
                error!("Startup aborted: {}", e);
                self.shutdown();
                return Err(e);
            }
        }

        match self.sink.current_scene() {
            Ok(Some(scene)) if self.config.scene(scene.as_str()).is_some() => {
                info!("Live scene at startup: {}", scene);
                self.selection = SelectionState {
                    scene: Some(scene),
                    changed_at: Some(Instant::now()),
                };
            }
            Ok(Some(scene)) => {
                info!("Live scene '{}' is not a configured scene, ignoring", scene);
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read live scene from sink: {}", e),
        }

        let grace = self.config.director.startup_grace();
        if !grace.is_zero() {
            debug!("Startup grace {:?}", grace);
            wait_unless_stopped(stop, grace);
        }

        self.state = LoopState::Running;
        Ok(())
    }

    /// One Running iteration at `now`
    pub fn run_cycle(&mut self, now: Instant) -> CycleReport {
        self.cycle += 1;
        let mut sink_errors = Vec::new();

        let sources_updated = match self.sink.scene_sources() {
            Ok(sources) => self.apply_sources(&sources),
            Err(e) => {
                warn!("Failed to read scene sources, keeping previous: {}", e);
                sink_errors.push(e);
                Vec::new()
            }
        };

        let restarted = self.supervise(now);

        let mut tally = self.ledger.snapshot(now);
        for scene in self.offline_scenes() {
            tally.mark_offline(scene);
        }

        let decision = self.selector.explain(
            &tally,
            self.selection.scene.as_ref(),
            self.selection.changed_at,
            now,
        );

        let mut switched = false;
        if self.selection.scene.as_ref() != Some(&decision.scene) {
            match self.sink.switch_to_scene(&decision.scene) {
                Ok(()) => {
                    info!(
                        "Switched to scene {} ({:?}, score {:.1} vs {:.1})",
                        decision.scene, decision.reason, decision.best_score, decision.incumbent_score
                    );
                    self.selection = SelectionState {
                        scene: Some(decision.scene.clone()),
                        changed_at: Some(now),
                    };
                    switched = true;
                }
                Err(e) => {
                    warn!("Switch to scene {} failed, will retry: {}", decision.scene, e);
                    sink_errors.push(e);
                }
            }
        }

        let status = self.render_status(&tally, now);
        if let Err(e) = self.sink.publish_status(&status) {
            debug!("Failed to publish status: {}", e);
        }

        debug!(
            cycle = self.cycle,
            scene = %decision.scene,
            reason = ?decision.reason,
            dwell = %format_duration_opt(
                self.selector.dwell_remaining(self.selection.changed_at, now)
            ),
            "Cycle complete"
        );

        self.last_decision = Some(decision.clone());
        CycleReport {
            cycle: self.cycle,
            decision,
            switched,
            restarted,
            sources_updated,
            sink_errors,
        }
    }

    /// Start, cycle at the configured cadence until `stop` is set, then shut
    /// down
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        self.start(stop)?;
        let interval = self.config.director.cycle_interval();

        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.run_cycle(started);
            wait_unless_stopped(stop, interval.saturating_sub(started.elapsed()));
        }

        self.shutdown();
        Ok(())
    }

    /// Stop and join every worker; idempotent
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopping;
        info!("Director stopping");

        for worker in &self.workers {
            worker.request_stop();
        }
        let deadline = Instant::now() + self.config.director.join_timeout();
        for worker in &mut self.workers {
            worker.join(deadline.saturating_duration_since(Instant::now()));
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.abandoned.take() {
                if join_with_timeout(thread, deadline.saturating_duration_since(Instant::now()))
                    .is_err()
                {
                    debug!("Leaving abandoned thread of {} behind", worker.spec.kind());
                }
            }
        }

        if let Err(e) = self.sink.publish_status(&status::render_stopped(chrono::Local::now())) {
            debug!("Failed to publish final status: {}", e);
        }
        self.state = LoopState::Stopped;
        info!("Director stopped");
    }

    /// Fill the source slots before the workers start polling
    fn refresh_sources(&mut self) {
        match self.sink.scene_sources() {
            Ok(sources) => {
                self.apply_sources(&sources);
            }
            Err(e) => warn!("Failed to read scene sources at startup: {}", e),
        }
    }

    fn apply_sources(&self, sources: &HashMap<SceneId, SourceRef>) -> Vec<SceneId> {
        let mut updated = Vec::new();
        for (scene, source) in sources {
            let Some(slot) = self.sources.get(scene) else {
                continue;
            };
            if slot.set(source.clone()) {
                info!("Source for scene {} is now {}", scene, source);
                updated.push(scene.clone());
            }
        }
        updated.sort();
        updated
    }

    /// Restart stalled, unhealthy or missing workers
    ///
    /// Every worker due for restart is told to stop first, then all are
    /// joined against one shared `join_timeout` deadline. A slot keeps at
    /// most one abandoned thread: while that one is still running, its
    /// restart is deferred and the scene stays offline.
    fn supervise(&mut self, now: Instant) -> Vec<WorkerKind> {
        let liveness = self.config.director.liveness_timeout();
        let mut due = Vec::new();

        for (index, worker) in self.workers.iter_mut().enumerate() {
            let Some(reason) = worker.restart_reason(now, liveness) else {
                continue;
            };
            let kind = worker.spec.kind();
            if !worker.reap_abandoned() {
                if !worker.restart_deferred {
                    warn!(
                        "Restart of {} deferred until its abandoned thread exits: {}",
                        kind, reason
                    );
                    worker.restart_deferred = true;
                }
                continue;
            }
            warn!("Restarting worker {}: {}", kind, reason);
            worker.request_stop();
            due.push(index);
        }
        if due.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + self.config.director.join_timeout();
        for &index in &due {
            self.workers[index].join(deadline.saturating_duration_since(Instant::now()));
        }

        let mut restarted = Vec::new();
        for index in due {
            let worker = &mut self.workers[index];
            let kind = worker.spec.kind();
            let was_unhealthy = worker.handle.as_ref().is_some_and(|h| h.is_unhealthy());
            match worker.spawn() {
                Ok(()) => {
                    worker.recovering = worker.recovering || was_unhealthy;
                    worker.restart_deferred = false;
                    restarted.push(kind);
                }
                Err(e) => {
                    error!("Respawn of {} failed, retrying next cycle: {}", kind, e);
                    worker.handle = None;
                }
            }
        }
        restarted
    }

    fn render_status(&self, tally: &Tally, now: Instant) -> String {
        let chat_connected = self
            .workers
            .iter()
            .find(|w| matches!(w.spec, WorkerSpec::Chat(_)))
            .map(|w| w.handle.as_ref().is_some_and(|h| h.is_connected()));
        status::render(&status::StatusView {
            state: self.state,
            scenes: &self.config.scenes,
            tally,
            live: self.selection.scene.as_ref(),
            dwell_remaining: self.selector.dwell_remaining(self.selection.changed_at, now),
            chat_connected,
            at: chrono::Local::now(),
        })
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.request_stop();
        }
    }
}

/// Sleep up to `total` in slices, returning early once `stop` is set
fn wait_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STOP_POLL_SLICE.min(deadline - now));
    }
}
