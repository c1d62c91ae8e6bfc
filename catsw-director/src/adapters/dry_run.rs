//! Sink that only logs
//!
//! Reports the configured camera sources and remembers what it was asked
//! to do. Used by the bundled binary in place of a live OBS connection.

use crate::collaborators::{SceneSink, SinkError};
use crate::types::{SceneId, SourceRef};
use catsw_common::CatswConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Everything a [`DryRunSink`] has been asked to do
#[derive(Debug, Default, Clone)]
pub struct DryRunLog {
    pub switches: Vec<SceneId>,
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DryRunSink {
    sources: HashMap<SceneId, SourceRef>,
    live: Option<SceneId>,
    log: Arc<Mutex<DryRunLog>>,
}

impl DryRunSink {
    pub fn new(sources: HashMap<SceneId, SourceRef>) -> Self {
        Self {
            sources,
            live: None,
            log: Arc::default(),
        }
    }

    /// Sources taken from each scene's configured `source`
    pub fn from_config(config: &CatswConfig) -> Self {
        let sources = config
            .scenes
            .iter()
            .filter_map(|scene| {
                let source = scene.source.as_deref()?;
                Some((SceneId::new(scene.id.clone()), SourceRef::from(source)))
            })
            .collect();
        Self::new(sources)
    }

    /// Shared view of the log, readable after the sink has been handed off
    pub fn log(&self) -> Arc<Mutex<DryRunLog>> {
        Arc::clone(&self.log)
    }

    fn with_log(&self, f: impl FnOnce(&mut DryRunLog)) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log);
    }
}

impl SceneSink for DryRunSink {
    fn scene_sources(&mut self) -> Result<HashMap<SceneId, SourceRef>, SinkError> {
        Ok(self.sources.clone())
    }

    fn switch_to_scene(&mut self, scene: &SceneId) -> Result<(), SinkError> {
        info!("[dry-run] switch to scene {}", scene);
        self.live = Some(scene.clone());
        self.with_log(|log| log.switches.push(scene.clone()));
        Ok(())
    }

    fn current_scene(&mut self) -> Result<Option<SceneId>, SinkError> {
        Ok(self.live.clone())
    }

    fn publish_status(&mut self, text: &str) -> Result<(), SinkError> {
        debug!("[dry-run] status:\n{}", text);
        self.with_log(|log| log.last_status = Some(text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_switches_and_status() {
        let config = CatswConfig::from_toml_str(
            r#"
            [[scenes]]
            id = "balcony"
            source = "rtsp://cam1/live"

            [[scenes]]
            id = "kitchen"
            "#,
        )
        .unwrap();
        let mut sink = DryRunSink::from_config(&config);
        let log = sink.log();

        let sources = sink.scene_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.get("balcony"), Some(&SourceRef::from("rtsp://cam1/live")));

        sink.switch_to_scene(&SceneId::from("kitchen")).unwrap();
        sink.publish_status("hello").unwrap();

        assert_eq!(sink.current_scene().unwrap(), Some(SceneId::from("kitchen")));
        let log = log.lock().unwrap();
        assert_eq!(log.switches, vec![SceneId::from("kitchen")]);
        assert_eq!(log.last_status.as_deref(), Some("hello"));
    }
}
