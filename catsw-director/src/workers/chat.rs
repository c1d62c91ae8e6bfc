//! Chat vote reader
//!
//! Turns audience messages naming a scene into weighted votes. The thread
//! lives as long as its handle: a lost session is re-established with
//! exponential backoff, never by exiting.

use super::{sleep_unless_stopped, WorkerHandle, WorkerKind};
use crate::collaborators::{ChatConnector, ChatPoll, ChatSession};
use crate::error::{Error, Result};
use crate::ledger::VoteLedger;
use crate::types::{ChatEvent, PrivilegeTier, SceneId, Vote};
use catsw_common::config::TierWeightsConfig;
use catsw_common::CatswConfig;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lowercased vote key, alias and id of every scene
#[derive(Debug, Clone, Default)]
pub struct VoteKeyMap {
    names: HashMap<String, SceneId>,
}

impl VoteKeyMap {
    pub fn from_config(config: &CatswConfig) -> Self {
        let mut names = HashMap::new();
        for scene in &config.scenes {
            let id = SceneId::new(scene.id.clone());
            // Ids go in first so an explicit key or alias never loses to them.
            names.insert(scene.id.trim().to_lowercase(), id.clone());
            for name in scene.vote_key.iter().chain(scene.aliases.iter()) {
                names.insert(name.trim().to_lowercase(), id.clone());
            }
        }
        Self { names }
    }

    /// Add one name for a scene
    pub fn insert(&mut self, name: &str, scene: SceneId) {
        self.names.insert(name.trim().to_lowercase(), scene);
    }

    /// Scene named by a chat message, if the whole message is a vote
    pub fn resolve(&self, text: &str) -> Option<&SceneId> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        self.names.get(&normalized)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Weight of one chat vote
pub trait VoteWeigher: Send + Sync {
    fn weight(&self, event: &ChatEvent, scene: &SceneId) -> f64;
}

/// Privilege-tier weight table with optional per-scene overrides
#[derive(Debug, Clone, Default)]
pub struct TierWeights {
    default: TierWeightsConfig,
    per_scene: HashMap<SceneId, TierWeightsConfig>,
    super_users: HashSet<String>,
}

impl TierWeights {
    pub fn new(default: TierWeightsConfig) -> Self {
        Self {
            default,
            per_scene: HashMap::new(),
            super_users: HashSet::new(),
        }
    }

    pub fn from_config(config: &CatswConfig) -> Self {
        let mut weights = Self::new(config.chat.weights);
        for scene in &config.scenes {
            if let Some(table) = scene.chat_weights {
                weights.per_scene.insert(SceneId::new(scene.id.clone()), table);
            }
        }
        weights.super_users = config.chat.super_users.iter().cloned().collect();
        weights
    }

    pub fn with_scene_override(mut self, scene: SceneId, table: TierWeightsConfig) -> Self {
        self.per_scene.insert(scene, table);
        self
    }

    pub fn with_super_user(mut self, sender_id: impl Into<String>) -> Self {
        self.super_users.insert(sender_id.into());
        self
    }

    fn table(&self, scene: &SceneId) -> &TierWeightsConfig {
        self.per_scene.get(scene).unwrap_or(&self.default)
    }
}

impl VoteWeigher for TierWeights {
    fn weight(&self, event: &ChatEvent, scene: &SceneId) -> f64 {
        let table = self.table(scene);
        let mut weight = table.base;
        match event.tier {
            PrivilegeTier::Viewer => {}
            PrivilegeTier::Follower { level } => weight += table.follower_level * f64::from(level),
            PrivilegeTier::SuperUser => weight += table.super_user_bonus,
        }
        if event.tier != PrivilegeTier::SuperUser && self.super_users.contains(&event.sender_id) {
            weight += table.super_user_bonus;
        }
        weight
    }
}

/// Tunables of the chat worker
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub event_timeout: Duration,
    /// `None` counts every message
    pub vote_window: Option<Duration>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub failure_threshold: u32,
}

impl ChatSettings {
    pub fn from_config(config: &CatswConfig) -> Self {
        let chat = &config.chat;
        Self {
            event_timeout: chat.event_timeout(),
            vote_window: chat
                .one_vote_per_window
                .then(|| chat.vote_window(&config.votes)),
            backoff_initial: chat.reconnect_backoff_initial(),
            backoff_max: chat.reconnect_backoff_max(),
            failure_threshold: chat.failure_threshold,
        }
    }
}

/// Everything a chat worker needs; cloned for every (re)spawn
#[derive(Clone)]
pub struct ChatContext {
    pub connector: Arc<dyn ChatConnector>,
    pub keys: Arc<VoteKeyMap>,
    pub weigher: Arc<dyn VoteWeigher>,
    pub ledger: Arc<VoteLedger>,
    pub settings: ChatSettings,
}

/// Chat vote worker state, owned by its thread
pub struct ChatVoteWorker {
    ctx: ChatContext,
    handle: Arc<WorkerHandle>,
    /// Sender id -> time of their last counted vote
    recent_voters: HashMap<String, Instant>,
}

impl ChatVoteWorker {
    pub fn new(ctx: ChatContext, handle: Arc<WorkerHandle>) -> Self {
        Self {
            ctx,
            handle,
            recent_voters: HashMap::new(),
        }
    }

    /// Start a fresh worker thread with a fresh handle
    pub fn spawn(ctx: ChatContext) -> Result<(Arc<WorkerHandle>, JoinHandle<()>)> {
        let handle = Arc::new(WorkerHandle::new(WorkerKind::Chat));
        let worker = Self::new(ctx, Arc::clone(&handle));
        let thread = thread::Builder::new()
            .name("chat-votes".to_string())
            .spawn(move || worker.run())
            .map_err(|source| Error::Spawn {
                worker: WorkerKind::Chat.to_string(),
                source,
            })?;
        Ok((handle, thread))
    }

    /// Connect, read and reconnect until stopped
    pub fn run(mut self) {
        info!(instance = %self.handle.instance_id(), "Chat vote worker started");
        let mut backoff = self.ctx.settings.backoff_initial;

        while !self.handle.should_stop() {
            self.handle.beat();
            let session = match self.ctx.connector.connect() {
                Ok(session) => session,
                Err(e) => {
                    let failures = self
                        .handle
                        .record_failure(e.to_string(), self.ctx.settings.failure_threshold);
                    warn!(
                        "Chat connect failed ({} in a row), retrying in {:?}: {}",
                        failures, backoff, e
                    );
                    if sleep_unless_stopped(&self.handle, backoff) {
                        break;
                    }
                    backoff = next_backoff(backoff, self.ctx.settings.backoff_max);
                    continue;
                }
            };

            info!("Chat session established");
            self.handle.set_connected(true);
            self.handle.record_success();

            let opened = Instant::now();
            let end = self.read_session(session);
            self.handle.set_connected(false);

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Lost { reason, delivered } => {
                    backoff = backoff_after_session(
                        backoff,
                        delivered,
                        opened.elapsed(),
                        &self.ctx.settings,
                    );
                    warn!("Chat session lost, reconnecting in {:?}: {}", backoff, reason);
                    if sleep_unless_stopped(&self.handle, backoff) {
                        break;
                    }
                    backoff = next_backoff(backoff, self.ctx.settings.backoff_max);
                }
            }
        }

        self.handle.set_connected(false);
        debug!(instance = %self.handle.instance_id(), "Chat vote worker exiting");
    }

    /// Pump one session until it ends or the worker is stopped
    fn read_session(&mut self, mut session: Box<dyn ChatSession>) -> SessionEnd {
        let mut delivered = false;
        loop {
            if self.handle.should_stop() {
                return SessionEnd::Stopped;
            }
            let poll = session.next_event(self.ctx.settings.event_timeout);
            self.handle.beat();
            match poll {
                ChatPoll::Event(event) => {
                    if self.handle.should_stop() {
                        return SessionEnd::Stopped;
                    }
                    delivered = true;
                    if let Some(vote) = self.handle_event(&event, Instant::now()) {
                        self.ctx.ledger.record(vote);
                    }
                }
                ChatPoll::Timeout => {}
                ChatPoll::Disconnected(reason) => return SessionEnd::Lost { reason, delivered },
            }
        }
    }

    /// Vote carried by one message, if any
    ///
    /// Messages that name no scene, and repeat votes inside the sender's
    /// window, yield nothing.
    pub fn handle_event(&mut self, event: &ChatEvent, now: Instant) -> Option<Vote> {
        let scene = self.ctx.keys.resolve(&event.text)?.clone();

        if let Some(window) = self.ctx.settings.vote_window {
            self.recent_voters
                .retain(|_, voted_at| now.saturating_duration_since(*voted_at) < window);
            if self.recent_voters.contains_key(&event.sender_id) {
                debug!(sender = %event.sender_id, "Ignoring repeat chat vote");
                return None;
            }
            self.recent_voters.insert(event.sender_id.clone(), now);
        }

        let weight = self.ctx.weigher.weight(event, &scene);
        debug!(sender = %event.sender_id, scene = %scene, weight, "Chat vote");
        Some(Vote::chat(scene, weight, now))
    }
}

enum SessionEnd {
    Stopped,
    Lost { reason: String, delivered: bool },
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Only a session that proved useful restarts the backoff; a relay that
/// accepts and drops at once keeps backing off
fn backoff_after_session(
    current: Duration,
    delivered: bool,
    lived: Duration,
    settings: &ChatSettings,
) -> Duration {
    if delivered || lived >= settings.backoff_max {
        settings.backoff_initial
    } else {
        current
    }
}
