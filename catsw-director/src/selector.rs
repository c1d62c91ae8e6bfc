//! Scene selection
//!
//! Pure decision function over a ledger [`Tally`]: pick the best-supported
//! scene, break ties deterministically, and hold the incumbent unless the
//! challenger clears the hysteresis margin or the incumbent has dwelt long
//! enough.

use crate::error::{Error, Result};
use crate::ledger::Tally;
use crate::types::SceneId;
use catsw_common::CatswConfig;
use std::time::{Duration, Instant};

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Nobody has positive support; previous (or idle) scene retained
    NoPositiveScore,
    /// Nothing was selected before; best candidate taken outright
    NoIncumbent,
    /// The incumbent is (one of) the best supported
    IncumbentLeads,
    /// A challenger leads but not by enough, and dwell time is not up
    HeldByHysteresis,
    /// Challenger leads by more than the margin
    MarginExceeded,
    /// Challenger leads and the incumbent's dwell time has elapsed
    DwellElapsed,
}

impl DecisionReason {
    /// True when the decision moves away from the incumbent
    pub fn is_switch(self) -> bool {
        matches!(
            self,
            DecisionReason::NoIncumbent | DecisionReason::MarginExceeded | DecisionReason::DwellElapsed
        )
    }
}

/// Full selector output, for logging and status text
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub scene: SceneId,
    pub reason: DecisionReason,
    /// Score of the best eligible candidate
    pub best_score: f64,
    /// Score of the previous scene (0 when there was none)
    pub incumbent_score: f64,
}

/// Hysteresis-based scene selector
#[derive(Debug, Clone)]
pub struct SceneSelector {
    /// Candidate scenes in tie-break priority order
    priority: Vec<SceneId>,
    default_scene: Option<SceneId>,
    margin: f64,
    min_dwell: Duration,
}

impl SceneSelector {
    /// Create a selector over `priority` (must not be empty)
    pub fn new(
        priority: Vec<SceneId>,
        default_scene: Option<SceneId>,
        margin: f64,
        min_dwell: Duration,
    ) -> Result<Self> {
        if priority.is_empty() {
            return Err(Error::InvalidState(
                "scene selector needs at least one candidate scene".to_string(),
            ));
        }
        Ok(Self {
            priority,
            default_scene,
            margin: margin.max(0.0),
            min_dwell,
        })
    }

    /// Selector for the configured scenes, in configuration order
    pub fn from_config(config: &CatswConfig) -> Result<Self> {
        let priority = config.scenes.iter().map(|s| SceneId::new(s.id.clone())).collect();
        let default_scene = config.director.default_scene.clone().map(SceneId::from);
        Self::new(
            priority,
            default_scene,
            config.selector.hysteresis_margin,
            config.selector.min_dwell(),
        )
    }

    pub fn candidates(&self) -> &[SceneId] {
        &self.priority
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn min_dwell(&self) -> Duration {
        self.min_dwell
    }

    /// Scene to show when nothing argues for any scene
    pub fn idle_scene(&self, previous: Option<&SceneId>) -> SceneId {
        previous
            .or(self.default_scene.as_ref())
            .unwrap_or(&self.priority[0])
            .clone()
    }

    /// Time left before the incumbent may be replaced without a margin lead
    pub fn dwell_remaining(&self, previous_change: Option<Instant>, now: Instant) -> Option<Duration> {
        let changed = previous_change?;
        let dwelt = now.saturating_duration_since(changed);
        self.min_dwell.checked_sub(dwelt).filter(|d| !d.is_zero())
    }

    /// Next scene to select
    pub fn decide(
        &self,
        snapshot: &Tally,
        previous: Option<&SceneId>,
        previous_change: Option<Instant>,
        now: Instant,
    ) -> SceneId {
        self.explain(snapshot, previous, previous_change, now).scene
    }

    /// Next scene to select, with the reasoning behind it
    pub fn explain(
        &self,
        snapshot: &Tally,
        previous: Option<&SceneId>,
        previous_change: Option<Instant>,
        now: Instant,
    ) -> Decision {
        let incumbent_score = previous.map(|p| snapshot.score(p.as_str())).unwrap_or(0.0);

        // Offline cameras may keep the air but cannot win it.
        let eligible = self
            .priority
            .iter()
            .filter(|scene| Some(*scene) == previous || !snapshot.is_offline(scene.as_str()));

        let mut best: Option<(&SceneId, f64)> = None;
        for scene in eligible {
            let score = snapshot.score(scene.as_str());
            best = match best {
                None => Some((scene, score)),
                Some((_, best_score)) if score > best_score => Some((scene, score)),
                Some((_, best_score)) if score == best_score && Some(scene) == previous => {
                    Some((scene, score))
                }
                keep => keep,
            };
        }

        let (best_scene, best_score) = match best {
            Some((scene, score)) if score > 0.0 => (scene, score),
            other => {
                return Decision {
                    scene: self.idle_scene(previous),
                    reason: DecisionReason::NoPositiveScore,
                    best_score: other.map(|(_, s)| s).unwrap_or(0.0),
                    incumbent_score,
                };
            }
        };

        let decision = |scene: &SceneId, reason| Decision {
            scene: scene.clone(),
            reason,
            best_score,
            incumbent_score,
        };

        let Some(previous) = previous else {
            return decision(best_scene, DecisionReason::NoIncumbent);
        };

        if best_scene == previous || best_score <= incumbent_score {
            return decision(previous, DecisionReason::IncumbentLeads);
        }

        if best_score > incumbent_score + self.margin {
            return decision(best_scene, DecisionReason::MarginExceeded);
        }

        let dwell_elapsed = previous_change
            .map(|changed| now.saturating_duration_since(changed) >= self.min_dwell)
            .unwrap_or(true);
        if dwell_elapsed {
            decision(best_scene, DecisionReason::DwellElapsed)
        } else {
            decision(previous, DecisionReason::HeldByHysteresis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SourceBreakdown;

    fn selector(margin: f64, dwell_secs: u64) -> SceneSelector {
        SceneSelector::new(
            vec![SceneId::from("a"), SceneId::from("b"), SceneId::from("c")],
            None,
            margin,
            Duration::from_secs(dwell_secs),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_priority_is_rejected() {
        assert!(SceneSelector::new(Vec::new(), None, 1.0, Duration::ZERO).is_err());
    }

    #[test]
    fn test_idle_prefers_previous_then_default_then_first() {
        let s = SceneSelector::new(
            vec![SceneId::from("a"), SceneId::from("b")],
            Some(SceneId::from("b")),
            1.0,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(s.idle_scene(Some(&SceneId::from("a"))), SceneId::from("a"));
        assert_eq!(s.idle_scene(None), SceneId::from("b"));
        assert_eq!(selector(1.0, 0).idle_scene(None), SceneId::from("a"));
    }

    #[test]
    fn test_offline_challenger_cannot_win() {
        let now = Instant::now();
        let mut tally = Tally::from_breakdowns(
            now,
            [("a", SourceBreakdown::new(1.0, 0.0)), ("b", SourceBreakdown::new(0.0, 50.0))],
        );
        tally.mark_offline(SceneId::from("b"));

        let d = selector(5.0, 0).explain(&tally, Some(&SceneId::from("a")), Some(now), now);
        assert_eq!(d.scene, SceneId::from("a"));
        assert_eq!(d.reason, DecisionReason::IncumbentLeads);
    }

    #[test]
    fn test_dwell_remaining_counts_down() {
        let now = Instant::now();
        let s = selector(5.0, 30);
        assert_eq!(
            s.dwell_remaining(Some(now), now + Duration::from_secs(10)),
            Some(Duration::from_secs(20))
        );
        assert_eq!(s.dwell_remaining(Some(now), now + Duration::from_secs(30)), None);
        assert_eq!(s.dwell_remaining(None, now), None);
    }

    #[test]
    fn test_negative_scores_only_retain_previous() {
        let now = Instant::now();
        let tally = Tally::from_breakdowns(
            now,
            [("a", SourceBreakdown::new(-2.0, 0.0)), ("b", SourceBreakdown::new(0.0, -1.0))],
        );
        let d = selector(0.0, 0).explain(&tally, Some(&SceneId::from("a")), None, now);
        assert_eq!(d.scene, SceneId::from("a"));
        assert_eq!(d.reason, DecisionReason::NoPositiveScore);
    }
}
