//! Contracts for the external collaborators
//!
//! The director never talks to OBS, ffmpeg, a detector model or a chat
//! platform directly; it only sees these traits. Implementations for the
//! bundled binary live in [`crate::adapters`].

use crate::types::{ChatEvent, Detection, Frame, SceneId, SourceRef};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Output sink failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected request: {0}")]
    Rejected(String),
}

/// Frame grab failures (both transient from the worker's view)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("frame source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),

    #[error("detector gave no answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("chat connect failed: {0}")]
    Connect(String),
}

/// Scene-switching output (an OBS-compatible control interface)
pub trait SceneSink: Send {
    /// Current source reference of every scene the sink knows about
    fn scene_sources(&mut self) -> Result<HashMap<SceneId, SourceRef>, SinkError>;

    /// Make `scene` live
    fn switch_to_scene(&mut self, scene: &SceneId) -> Result<(), SinkError>;

    /// Scene live right now, if the sink can tell
    fn current_scene(&mut self) -> Result<Option<SceneId>, SinkError> {
        Ok(None)
    }

    /// Operator/viewer facing status text (vote table, countdown)
    fn publish_status(&mut self, _text: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Latest-frame grabber for a camera source
pub trait FrameSource: Send + Sync {
    /// Grab the most recent frame, giving up after `timeout`
    fn latest_frame(&self, source: &SourceRef, timeout: Duration) -> Result<Frame, FrameError>;
}

/// Cat presence detector
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Detection, DetectorError>;
}

/// Result of waiting for the next chat event
#[derive(Debug, Clone, PartialEq)]
pub enum ChatPoll {
    Event(ChatEvent),
    /// Nothing arrived within the timeout; the session is still usable
    Timeout,
    /// The session is gone and must be re-established
    Disconnected(String),
}

/// One live connection to the chat stream
pub trait ChatSession: Send {
    fn next_event(&mut self, timeout: Duration) -> ChatPoll;
}

/// Opens chat sessions; called again after every disconnect
pub trait ChatConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ChatSession>, ChatError>;
}
