//! Core value types shared by the ledger, workers and selector

use std::borrow::Borrow;
use std::fmt;
use std::time::Instant;

/// Stable identifier of a configured scene
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(String);

impl SceneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SceneId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SceneId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque camera source reference (an RTSP URL in practice)
///
/// Supplied by the sink and may change between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

/// Where a vote came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoteSource {
    /// Audience chat message
    Chat,
    /// Presence detection on the named camera
    Detection(SceneId),
}

impl fmt::Display for VoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteSource::Chat => f.write_str("chat"),
            VoteSource::Detection(camera) => write!(f, "detection:{}", camera),
        }
    }
}

/// A single weighted, timestamped signal supporting one scene
///
/// Positive weight supports activating the scene, negative weight argues
/// against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub scene: SceneId,
    pub weight: f64,
    pub at: Instant,
    pub source: VoteSource,
}

impl Vote {
    pub fn new(scene: SceneId, weight: f64, at: Instant, source: VoteSource) -> Self {
        Self {
            scene,
            weight,
            at,
            source,
        }
    }

    pub fn chat(scene: SceneId, weight: f64, at: Instant) -> Self {
        Self::new(scene, weight, at, VoteSource::Chat)
    }

    pub fn detection(scene: SceneId, weight: f64, at: Instant) -> Self {
        let source = VoteSource::Detection(scene.clone());
        Self::new(scene, weight, at, source)
    }
}

/// Latest frame grabbed from a camera
///
/// The core never looks inside; it is handed from the frame source to the
/// detector as-is.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            captured_at: Instant::now(),
        }
    }
}

/// Presence detector verdict for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub present: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
}

impl Detection {
    pub fn present(confidence: f64) -> Self {
        Self {
            present: true,
            confidence,
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            confidence: 0.0,
        }
    }
}

/// Sender privilege as reported by the chat transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegeTier {
    #[default]
    Viewer,
    /// Fan-club member; higher levels weigh more
    Follower { level: u32 },
    SuperUser,
}

/// One chat message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub sender_id: String,
    pub tier: PrivilegeTier,
    pub text: String,
}

impl ChatEvent {
    pub fn new(sender_id: impl Into<String>, tier: PrivilegeTier, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            tier,
            text: text.into(),
        }
    }
}
