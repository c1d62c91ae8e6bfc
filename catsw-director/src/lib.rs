//! # catsw Scene Director (catsw-director)
//!
//! Picks which camera scene a live stream shows, driven by two vote
//! producers running on their own threads: audience chat votes and
//! per-camera cat presence detection.
//!
//! **Architecture:** workers record weighted, timestamped votes into a
//! shared [`ledger::VoteLedger`]; the [`control::ControlLoop`] snapshots it
//! once per cycle, asks the [`selector::SceneSelector`] for a decision and
//! tells the [`collaborators::SceneSink`] to switch.

pub mod adapters;
pub mod collaborators;
pub mod control;
pub mod error;
pub mod ledger;
pub mod selector;
pub mod types;
pub mod workers;

pub use control::{Collaborators, ControlLoop, CycleReport, LoopState, SelectionState};
pub use error::{Error, Result};
pub use ledger::{SourceBreakdown, Tally, VoteLedger};
pub use selector::{Decision, DecisionReason, SceneSelector};
pub use types::{ChatEvent, Detection, Frame, PrivilegeTier, SceneId, SourceRef, Vote, VoteSource};
