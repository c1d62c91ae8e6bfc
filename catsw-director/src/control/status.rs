//! Status text published through the sink
//!
//! One block of plain text: the loop state, the vote table, offline cameras
//! and the live scene with its remaining switch lock.

use super::LoopState;
use crate::ledger::Tally;
use crate::types::SceneId;
use catsw_common::config::SceneConfig;
use catsw_common::human_time::format_duration;
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::time::Duration;

/// Inputs of one status render
pub struct StatusView<'a> {
    pub state: LoopState,
    pub scenes: &'a [SceneConfig],
    pub tally: &'a Tally,
    pub live: Option<&'a SceneId>,
    pub dwell_remaining: Option<Duration>,
    /// `None` when no chat worker runs
    pub chat_connected: Option<bool>,
    pub at: DateTime<Local>,
}

pub fn render(view: &StatusView<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}] {}",
        view.state.label(),
        view.at.format("%Y-%m-%d %H:%M:%S")
    );

    let _ = writeln!(
        out,
        "{:<5} {:<16} {:>7} {:>7} {:>7}",
        "key", "scene", "chat", "ai", "total"
    );
    for scene in view.scenes {
        let breakdown = view.tally.breakdown(&scene.id);
        let marker = if view.live.map(SceneId::as_str) == Some(scene.id.as_str()) {
            " *"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:<5} {:<16} {:>7.1} {:>7.1} {:>7.1}{}",
            scene.vote_key.as_deref().unwrap_or("-"),
            scene.id,
            breakdown.chat,
            breakdown.detection,
            breakdown.total(),
            marker
        );
    }

    let mut offline: Vec<&str> = view.tally.offline().iter().map(SceneId::as_str).collect();
    if !offline.is_empty() {
        offline.sort_unstable();
        let _ = writeln!(out, "offline: {}", offline.join(", "));
    }

    match view.live {
        Some(live) => match view.dwell_remaining {
            Some(remaining) => {
                let _ = writeln!(out, "live: {} (locked {})", live, format_duration(remaining));
            }
            None => {
                let _ = writeln!(out, "live: {}", live);
            }
        },
        None => {
            let _ = writeln!(out, "live: -");
        }
    }

    if let Some(connected) = view.chat_connected {
        let _ = write!(out, "chat: {}", if connected { "connected" } else { "reconnecting" });
    }

    out.trim_end().to_string()
}

/// Final status once the loop has stopped
pub fn render_stopped(at: DateTime<Local>) -> String {
    format!(
        "[{}] {}\ndirector exited",
        LoopState::Stopped.label(),
        at.format("%Y-%m-%d %H:%M:%S")
    )
}
