//! In-memory collaborators for director integration tests
//!
//! Every fake records what it was asked so tests can assert on it, and
//! exposes knobs (shared through `Arc`) to change behaviour mid-test.

#![allow(dead_code)]

use catsw_common::CatswConfig;
use catsw_director::collaborators::{
    ChatConnector, ChatError, ChatPoll, ChatSession, Detector, DetectorError, FrameError,
    FrameSource, SceneSink, SinkError,
};
use catsw_director::{ChatEvent, Collaborators, Detection, Frame, SceneId, SourceRef};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Scenes `a`, `b`, `c` with instant startup and fast polling
pub fn test_config(extra: &str) -> CatswConfig {
    let toml = format!(
        r#"
        [director]
        startup_grace_ms = 0
        cycle_interval_ms = 20
        join_timeout_ms = 1000

        [detection]
        poll_interval_ms = 20
        frame_timeout_ms = 100

        {extra}

        [[scenes]]
        id = "a"
        vote_key = "1"
        source = "rtsp://cam-a"

        [[scenes]]
        id = "b"
        vote_key = "2"
        source = "rtsp://cam-b"

        [[scenes]]
        id = "c"
        vote_key = "3"
        source = "rtsp://cam-c"
        "#
    );
    CatswConfig::from_toml_str(&toml).unwrap()
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SinkState {
    pub sources: HashMap<SceneId, SourceRef>,
    pub current: Option<SceneId>,
    pub switches: Vec<SceneId>,
    pub statuses: Vec<String>,
    /// Switch calls still to fail
    pub fail_switches: usize,
    pub fail_sources: bool,
}

/// Sink whose state lives behind a shared mutex
#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<SinkState>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let sink = Self::new();
        {
            let mut state = sink.state();
            for (scene, source) in sources {
                state.sources.insert(SceneId::from(scene), SourceRef::from(source));
            }
        }
        sink
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.0.lock().unwrap()
    }

    pub fn switches(&self) -> Vec<SceneId> {
        self.state().switches.clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.state().statuses.last().cloned()
    }
}

impl SceneSink for RecordingSink {
    fn scene_sources(&mut self) -> Result<HashMap<SceneId, SourceRef>, SinkError> {
        let state = self.state();
        if state.fail_sources {
            return Err(SinkError::Unavailable("sources offline".to_string()));
        }
        Ok(state.sources.clone())
    }

    fn switch_to_scene(&mut self, scene: &SceneId) -> Result<(), SinkError> {
        let mut state = self.state();
        if state.fail_switches > 0 {
            state.fail_switches -= 1;
            return Err(SinkError::Unavailable("obs not reachable".to_string()));
        }
        state.switches.push(scene.clone());
        state.current = Some(scene.clone());
        Ok(())
    }

    fn current_scene(&mut self) -> Result<Option<SceneId>, SinkError> {
        Ok(self.state().current.clone())
    }

    fn publish_status(&mut self, text: &str) -> Result<(), SinkError> {
        self.state().statuses.push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frames and detection
// ---------------------------------------------------------------------------

/// Frame source whose frame payload is the requested source reference
#[derive(Default)]
pub struct ScriptedFrames {
    /// Sources that fail with a timeout
    pub failing: Mutex<Vec<String>>,
    /// Every source that was requested, in order
    pub requests: Mutex<Vec<String>>,
    /// When set, calls block until the flag is cleared
    pub stall: AtomicBool,
}

impl ScriptedFrames {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, source: &str) {
        self.failing.lock().unwrap().push(source.to_string());
    }

    pub fn recover_all(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl FrameSource for ScriptedFrames {
    fn latest_frame(&self, source: &SourceRef, timeout: Duration) -> Result<Frame, FrameError> {
        self.requests.lock().unwrap().push(source.to_string());
        while self.stall.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        if self.failing.lock().unwrap().iter().any(|s| s == source.as_str()) {
            return Err(FrameError::Timeout(timeout));
        }
        Ok(Frame::new(source.as_str().as_bytes().to_vec()))
    }
}

/// Detector answering per source (frame payload), absent by default
#[derive(Default)]
pub struct FixedDetector {
    verdicts: Mutex<HashMap<String, Result<Detection, DetectorError>>>,
    pub calls: AtomicUsize,
}

impl FixedDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, source: &str, verdict: Result<Detection, DetectorError>) {
        self.verdicts.lock().unwrap().insert(source.to_string(), verdict);
    }
}

impl Detector for FixedDetector {
    fn detect(&self, frame: &Frame) -> Result<Detection, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = String::from_utf8_lossy(&frame.data).into_owned();
        self.verdicts
            .lock()
            .unwrap()
            .get(&source)
            .cloned()
            .unwrap_or(Ok(Detection::absent()))
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// One scripted session: polls are served in order, then `Timeout` forever
pub struct ScriptedSession {
    polls: VecDeque<ChatPoll>,
}

impl ChatSession for ScriptedSession {
    fn next_event(&mut self, timeout: Duration) -> ChatPoll {
        match self.polls.pop_front() {
            Some(poll) => poll,
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(10)));
                ChatPoll::Timeout
            }
        }
    }
}

/// Connector handing out scripted sessions; a `None` entry fails the connect
#[derive(Default)]
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<Option<Vec<ChatPoll>>>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<Option<Vec<ChatPoll>>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ChatConnector for ScriptedConnector {
    fn connect(&self) -> Result<Box<dyn ChatSession>, ChatError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(Some(polls)) => Ok(Box::new(ScriptedSession { polls: polls.into() })),
            Some(None) => Err(ChatError::Connect("relay refused".to_string())),
            // Script exhausted: an idle session that never disconnects
            None => Ok(Box::new(ScriptedSession {
                polls: VecDeque::new(),
            })),
        }
    }
}

pub fn event(sender: &str, text: &str) -> ChatPoll {
    ChatPoll::Event(ChatEvent::new(
        sender,
        catsw_director::PrivilegeTier::Viewer,
        text,
    ))
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn collaborators(
    sink: &RecordingSink,
    frames: &Arc<ScriptedFrames>,
    detector: &Arc<FixedDetector>,
    chat: Option<Arc<ScriptedConnector>>,
) -> Collaborators {
    let frames = Arc::clone(frames);
    Collaborators {
        sink: Box::new(sink.clone()),
        frames: Box::new(move |_scene| Arc::clone(&frames) as Arc<dyn FrameSource>),
        detector: Some(Arc::clone(detector) as Arc<dyn Detector>),
        chat: chat.map(|c| c as Arc<dyn ChatConnector>),
    }
}
