//! Vote ledger
//!
//! The single structure shared by every vote producer and the control loop.
//! Each scene has its own lock, so a snapshot only ever contends with the
//! worker recording into the scene currently being summed.
//!
//! Expired votes are pruned lazily when a snapshot reads them; recording
//! never drops anything, so a snapshot taken for any `now` still sees every
//! vote inside its window.

use crate::types::{SceneId, Vote, VoteSource};
use catsw_common::config::DecayKind;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// How much a live vote still counts at a given age
///
/// Only consulted for votes younger than the TTL; anything at or past the
/// TTL contributes nothing regardless of policy.
pub trait DecayPolicy: Send + Sync + fmt::Debug {
    fn factor(&self, age: Duration, ttl: Duration) -> f64;
}

/// Full weight for the whole TTL
#[derive(Debug, Clone, Copy, Default)]
pub struct HardCutoff;

impl DecayPolicy for HardCutoff {
    fn factor(&self, _age: Duration, _ttl: Duration) -> f64 {
        1.0
    }
}

/// Weight falls linearly from 1 at age zero to 0 at the TTL
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDecay;

impl DecayPolicy for LinearDecay {
    fn factor(&self, age: Duration, ttl: Duration) -> f64 {
        if ttl.is_zero() {
            return 0.0;
        }
        (1.0 - age.as_secs_f64() / ttl.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Build the configured decay policy
pub fn decay_policy(kind: DecayKind) -> Arc<dyn DecayPolicy> {
    match kind {
        DecayKind::HardCutoff => Arc::new(HardCutoff),
        DecayKind::Linear => Arc::new(LinearDecay),
    }
}

/// Per-scene score split by where the votes came from
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceBreakdown {
    pub chat: f64,
    pub detection: f64,
}

impl SourceBreakdown {
    pub fn new(chat: f64, detection: f64) -> Self {
        Self { chat, detection }
    }

    pub fn total(&self) -> f64 {
        self.chat + self.detection
    }
}

/// Aggregated ledger state at one instant
#[derive(Debug, Clone)]
pub struct Tally {
    at: Instant,
    scores: HashMap<SceneId, SourceBreakdown>,
    offline: HashSet<SceneId>,
}

impl Tally {
    pub fn new(at: Instant) -> Self {
        Self {
            at,
            scores: HashMap::new(),
            offline: HashSet::new(),
        }
    }

    /// Build a tally from per-scene breakdowns scored elsewhere
    pub fn from_breakdowns<I, S>(at: Instant, scores: I) -> Self
    where
        I: IntoIterator<Item = (S, SourceBreakdown)>,
        S: Into<SceneId>,
    {
        let mut tally = Self::new(at);
        for (scene, breakdown) in scores {
            tally.scores.insert(scene.into(), breakdown);
        }
        tally
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// Aggregated score; unknown scenes score zero
    pub fn score(&self, scene: &str) -> f64 {
        self.scores.get(scene).map(SourceBreakdown::total).unwrap_or(0.0)
    }

    pub fn breakdown(&self, scene: &str) -> SourceBreakdown {
        self.scores.get(scene).copied().unwrap_or_default()
    }

    pub fn scenes(&self) -> impl Iterator<Item = &SceneId> {
        self.scores.keys()
    }

    pub fn mark_offline(&mut self, scene: SceneId) {
        self.offline.insert(scene);
    }

    pub fn is_offline(&self, scene: &str) -> bool {
        self.offline.contains(scene)
    }

    pub fn offline(&self) -> &HashSet<SceneId> {
        &self.offline
    }

    /// True when at least one scene has positive support
    pub fn has_positive(&self) -> bool {
        self.scores.values().any(|b| b.total() > 0.0)
    }
}

type SceneVotes = Arc<Mutex<VecDeque<Vote>>>;

/// Thread-safe store of recent votes per scene
#[derive(Debug)]
pub struct VoteLedger {
    ttl: Duration,
    decay: Arc<dyn DecayPolicy>,
    scenes: RwLock<HashMap<SceneId, SceneVotes>>,
}

impl VoteLedger {
    /// Create a ledger with hard-cutoff expiry
    pub fn new(ttl: Duration) -> Self {
        Self::with_decay(ttl, Arc::new(HardCutoff))
    }

    pub fn with_decay(ttl: Duration, decay: Arc<dyn DecayPolicy>) -> Self {
        Self {
            ttl,
            decay,
            scenes: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Append a vote under its target scene
    pub fn record(&self, vote: Vote) {
        let votes = self.scene_votes(&vote.scene);
        let mut votes = lock(&votes);
        votes.push_back(vote);
    }

    /// Decayed sum of live votes per known scene at `now`
    ///
    /// A vote counts when its timestamp lies in `(now - ttl, now]`. Votes at
    /// or before `now - ttl` are dropped from the ledger; votes stamped after
    /// `now` are kept but not counted.
    pub fn snapshot(&self, now: Instant) -> Tally {
        let entries: Vec<(SceneId, SceneVotes)> = {
            let scenes = self.scenes.read().unwrap_or_else(|e| e.into_inner());
            scenes
                .iter()
                .map(|(scene, votes)| (scene.clone(), Arc::clone(votes)))
                .collect()
        };

        let mut tally = Tally::new(now);
        for (scene, votes) in entries {
            let mut votes = lock(&votes);
            votes.retain(|vote| !self.is_expired(vote, now));

            let mut breakdown = SourceBreakdown::default();
            for vote in votes.iter().filter(|v| v.at <= now) {
                let age = now.duration_since(vote.at);
                let weighted = vote.weight * self.decay.factor(age, self.ttl);
                match vote.source {
                    VoteSource::Chat => breakdown.chat += weighted,
                    VoteSource::Detection(_) => breakdown.detection += weighted,
                }
            }
            tally.scores.insert(scene, breakdown);
        }
        tally
    }

    /// Number of votes currently held (live or not yet pruned)
    pub fn len(&self) -> usize {
        let scenes = self.scenes.read().unwrap_or_else(|e| e.into_inner());
        scenes.values().map(|votes| lock(votes).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every vote for one scene
    pub fn clear_scene(&self, scene: &str) {
        let votes = {
            let scenes = self.scenes.read().unwrap_or_else(|e| e.into_inner());
            scenes.get(scene).cloned()
        };
        if let Some(votes) = votes {
            lock(&votes).clear();
        }
    }

    fn is_expired(&self, vote: &Vote, now: Instant) -> bool {
        now.saturating_duration_since(vote.at) >= self.ttl && vote.at <= now
    }

    fn scene_votes(&self, scene: &SceneId) -> SceneVotes {
        {
            let scenes = self.scenes.read().unwrap_or_else(|e| e.into_inner());
            if let Some(votes) = scenes.get(scene) {
                return Arc::clone(votes);
            }
        }
        let mut scenes = self.scenes.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(scenes.entry(scene.clone()).or_default())
    }
}

/// Per-scene lock; a panicked writer leaves a consistent queue behind
fn lock(votes: &Mutex<VecDeque<Vote>>) -> std::sync::MutexGuard<'_, VecDeque<Vote>> {
    votes.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str) -> SceneId {
        SceneId::from(id)
    }

    #[test]
    fn test_unknown_scene_scores_zero() {
        let ledger = VoteLedger::new(Duration::from_secs(10));
        let tally = ledger.snapshot(Instant::now());
        assert_eq!(tally.score("nowhere"), 0.0);
        assert!(!tally.has_positive());
    }

    #[test]
    fn test_sums_live_votes_per_source() {
        let t0 = Instant::now();
        let ledger = VoteLedger::new(Duration::from_secs(10));
        ledger.record(Vote::chat(scene("a"), 2.0, t0));
        ledger.record(Vote::detection(scene("a"), 3.0, t0));
        ledger.record(Vote::chat(scene("b"), 1.0, t0));

        let tally = ledger.snapshot(t0 + Duration::from_secs(1));
        assert_eq!(tally.score("a"), 5.0);
        assert_eq!(tally.breakdown("a").chat, 2.0);
        assert_eq!(tally.breakdown("a").detection, 3.0);
        assert_eq!(tally.score("b"), 1.0);
    }

    #[test]
    fn test_vote_exactly_at_ttl_is_pruned() {
        let t0 = Instant::now();
        let ttl = Duration::from_secs(10);
        let ledger = VoteLedger::new(ttl);
        ledger.record(Vote::chat(scene("a"), 1.0, t0));

        assert_eq!(ledger.snapshot(t0 + ttl - Duration::from_millis(1)).score("a"), 1.0);
        assert_eq!(ledger.snapshot(t0 + ttl).score("a"), 0.0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_future_votes_are_kept_but_not_counted() {
        let t0 = Instant::now();
        let ledger = VoteLedger::new(Duration::from_secs(10));
        ledger.record(Vote::chat(scene("a"), 1.0, t0 + Duration::from_secs(5)));

        assert_eq!(ledger.snapshot(t0).score("a"), 0.0);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot(t0 + Duration::from_secs(6)).score("a"), 1.0);
    }

    #[test]
    fn test_linear_decay_halves_at_half_ttl() {
        let t0 = Instant::now();
        let ledger = VoteLedger::with_decay(Duration::from_secs(10), Arc::new(LinearDecay));
        ledger.record(Vote::chat(scene("a"), 4.0, t0));

        let score = ledger.snapshot(t0 + Duration::from_secs(5)).score("a");
        assert!((score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_breakdowns_keep_their_attribution() {
        let tally = Tally::from_breakdowns(
            Instant::now(),
            [("a", SourceBreakdown::new(1.0, 2.5)), ("b", SourceBreakdown::new(0.0, 4.0))],
        );
        assert_eq!(tally.score("a"), 3.5);
        assert_eq!(tally.breakdown("a").detection, 2.5);
        assert_eq!(tally.breakdown("b").chat, 0.0);
        assert_eq!(tally.breakdown("b").detection, 4.0);
    }

    #[test]
    fn test_clear_scene_only_touches_that_scene() {
        let t0 = Instant::now();
        let ledger = VoteLedger::new(Duration::from_secs(10));
        ledger.record(Vote::chat(scene("a"), 1.0, t0));
        ledger.record(Vote::chat(scene("b"), 1.0, t0));

        ledger.clear_scene("a");
        let tally = ledger.snapshot(t0);
        assert_eq!(tally.score("a"), 0.0);
        assert_eq!(tally.score("b"), 1.0);
    }
}
