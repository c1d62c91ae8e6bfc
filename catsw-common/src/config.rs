//! Configuration model, loading and config file resolution
//!
//! One TOML file describes the scenes and every tunable of the director.
//! Every field carries a built-in default so that a partial (or missing)
//! file never terminates startup; [`CatswConfig::validate`] is what decides
//! whether the result is usable.
//!
//! Durations are configured in milliseconds (`*_ms` keys) and exposed as
//! [`Duration`] through accessor methods.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CATSW_CONFIG";

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatswConfig {
    #[serde(default)]
    pub director: DirectorConfig,

    #[serde(default)]
    pub votes: VotesConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub adapters: AdaptersConfig,

    /// Candidate scenes, in priority order (first wins exact ties)
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
}

/// Control loop cadence and supervision
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorConfig {
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Wait before the first decision so the ledger is not empty
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,

    /// Heartbeat age after which a worker is restarted
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Scene used when nothing was selected before and nobody votes
    #[serde(default)]
    pub default_scene: Option<String>,

    /// Cameras whose detection worker is unhealthy cannot win a switch
    #[serde(default = "default_true")]
    pub skip_offline_scenes: bool,
}

/// Vote ledger retention
#[derive(Debug, Clone, Deserialize)]
pub struct VotesConfig {
    #[serde(default = "default_vote_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default)]
    pub decay: DecayKind,
}

/// How a vote loses influence over its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecayKind {
    /// Full weight until the TTL, nothing after
    #[default]
    HardCutoff,
    /// Weight falls linearly to zero at the TTL
    Linear,
}

/// Scene selection hysteresis
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    /// Score lead a challenger needs to switch before the dwell time is up
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,

    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,
}

/// Per-camera detection workers
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_presence_weight")]
    pub presence_weight: f64,

    /// Weight recorded when no cat is seen; 0 records nothing
    #[serde(default)]
    pub absence_weight: f64,

    /// Consecutive transient failures before the worker is unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// Chat vote reader
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `host:port` of the JSON-lines chat relay
    #[serde(default)]
    pub addr: Option<String>,

    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,

    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub weights: TierWeightsConfig,

    /// Sender ids that always receive the super-user bonus
    #[serde(default)]
    pub super_users: Vec<String>,

    /// Count at most one vote per sender per window
    #[serde(default = "default_true")]
    pub one_vote_per_window: bool,

    /// Window for `one_vote_per_window`; defaults to the vote TTL
    #[serde(default)]
    pub vote_window_ms: Option<u64>,

    #[serde(default = "default_backoff_initial_ms")]
    pub reconnect_backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,

    /// Consecutive failed connects before the worker is unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// Weight table mapping sender privilege to vote weight
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierWeightsConfig {
    #[serde(default = "default_base_weight")]
    pub base: f64,

    /// Added once per follower (fan medal) level
    #[serde(default = "default_follower_level_weight")]
    pub follower_level: f64,

    #[serde(default = "default_super_user_bonus")]
    pub super_user_bonus: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Settings for the bundled collaborator adapters
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptersConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Program (and arguments) that reads a PNG frame on stdin and prints
    /// `{"present": bool, "confidence": f64}`
    #[serde(default)]
    pub detector_command: Vec<String>,
}

/// One candidate camera viewpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    pub id: String,

    /// Single-letter chat shortcut
    #[serde(default)]
    pub vote_key: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,

    /// Source used until the sink reports one
    #[serde(default)]
    pub source: Option<String>,

    /// Frame rotation in degrees (0 or 180)
    #[serde(default)]
    pub rotation: u16,

    /// Overrides `chat.weights` for votes naming this scene
    #[serde(default)]
    pub chat_weights: Option<TierWeightsConfig>,
}

fn default_true() -> bool {
    true
}

fn default_cycle_interval_ms() -> u64 {
    1_000
}

fn default_startup_grace_ms() -> u64 {
    5_000
}

fn default_liveness_timeout_ms() -> u64 {
    60_000
}

fn default_join_timeout_ms() -> u64 {
    5_000
}

fn default_vote_ttl_ms() -> u64 {
    30_000
}

fn default_hysteresis_margin() -> f64 {
    5.0
}

fn default_min_dwell_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_frame_timeout_ms() -> u64 {
    5_000
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_presence_weight() -> f64 {
    3.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_event_timeout_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_base_weight() -> f64 {
    1.0
}

fn default_follower_level_weight() -> f64 {
    1.0
}

fn default_super_user_bonus() -> f64 {
    10.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            default_scene: None,
            skip_offline_scenes: true,
        }
    }
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_vote_ttl_ms(),
            decay: DecayKind::default(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            hysteresis_margin: default_hysteresis_margin(),
            min_dwell_ms: default_min_dwell_ms(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            frame_timeout_ms: default_frame_timeout_ms(),
            confidence_threshold: default_confidence_threshold(),
            presence_weight: default_presence_weight(),
            absence_weight: 0.0,
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: None,
            event_timeout_ms: default_event_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            weights: TierWeightsConfig::default(),
            super_users: Vec::new(),
            one_vote_per_window: true,
            vote_window_ms: None,
            reconnect_backoff_initial_ms: default_backoff_initial_ms(),
            reconnect_backoff_max_ms: default_backoff_max_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for TierWeightsConfig {
    fn default() -> Self {
        Self {
            base: default_base_weight(),
            follower_level: default_follower_level_weight(),
            super_user_bonus: default_super_user_bonus(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            detector_command: Vec::new(),
        }
    }
}

impl DirectorConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl VotesConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl SelectorConfig {
    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }
}

impl DetectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl ChatConfig {
    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_initial_ms)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    /// Dedupe window, falling back to the vote TTL
    pub fn vote_window(&self, votes: &VotesConfig) -> Duration {
        self.vote_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| votes.ttl())
    }
}

impl CatswConfig {
    /// Parse a TOML document (no validation)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a config file (no validation)
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Scene configuration by id
    pub fn scene(&self, id: &str) -> Option<&SceneConfig> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// Check the configuration is usable by the director
    ///
    /// Everything reported here is a startup-fatal misconfiguration.
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            return Err(Error::Config("No scenes configured".to_string()));
        }

        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for scene in &self.scenes {
            if scene.id.trim().is_empty() {
                return Err(Error::Config("Scene id must not be empty".to_string()));
            }
            if !ids.insert(scene.id.as_str()) {
                return Err(Error::Config(format!("Duplicate scene id '{}'", scene.id)));
            }
            if scene.rotation != 0 && scene.rotation != 180 {
                return Err(Error::Config(format!(
                    "Scene '{}': rotation must be 0 or 180, got {}",
                    scene.id, scene.rotation
                )));
            }
            let vote_names = scene.vote_key.iter().chain(scene.aliases.iter());
            for name in vote_names {
                let normalized = name.trim().to_lowercase();
                if normalized.is_empty() {
                    return Err(Error::Config(format!(
                        "Scene '{}': empty vote key or alias",
                        scene.id
                    )));
                }
                if !keys.insert(normalized) {
                    return Err(Error::Config(format!(
                        "Scene '{}': vote key or alias '{}' is already used",
                        scene.id, name
                    )));
                }
            }
        }

        if let Some(default_scene) = &self.director.default_scene {
            if self.scene(default_scene).is_none() {
                return Err(Error::Config(format!(
                    "Default scene '{}' is not a configured scene",
                    default_scene
                )));
            }
        }

        if self.votes.ttl_ms == 0 {
            return Err(Error::Config("votes.ttl_ms must be positive".to_string()));
        }
        if self.director.cycle_interval_ms == 0 {
            return Err(Error::Config(
                "director.cycle_interval_ms must be positive".to_string(),
            ));
        }
        self.validate_liveness()?;
        if self.detection.poll_interval_ms == 0 {
            return Err(Error::Config(
                "detection.poll_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.selector.hysteresis_margin >= 0.0) {
            return Err(Error::Config(
                "selector.hysteresis_margin must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(Error::Config(
                "detection.confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.chat.enabled && self.chat.addr.is_none() {
            return Err(Error::Config(
                "chat.enabled requires chat.addr".to_string(),
            ));
        }
        if self.chat.reconnect_backoff_initial_ms > self.chat.reconnect_backoff_max_ms {
            return Err(Error::Config(
                "chat.reconnect_backoff_initial_ms exceeds reconnect_backoff_max_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Workers heartbeat between blocking calls, so liveness must outlast
    /// the longest single call or healthy workers get restarted
    fn validate_liveness(&self) -> Result<()> {
        let liveness = self.director.liveness_timeout_ms;
        if liveness == 0 {
            return Err(Error::Config(
                "director.liveness_timeout_ms must be positive".to_string(),
            ));
        }

        let mut bounds = Vec::new();
        if self.detection.enabled {
            bounds.push(("detection.frame_timeout_ms", self.detection.frame_timeout_ms));
        }
        if self.chat.enabled {
            bounds.push(("chat.event_timeout_ms", self.chat.event_timeout_ms));
            bounds.push(("chat.connect_timeout_ms", self.chat.connect_timeout_ms));
        }
        for (name, bound) in bounds {
            if liveness <= bound {
                return Err(Error::Config(format!(
                    "director.liveness_timeout_ms ({}) must exceed {} ({})",
                    liveness, name, bound
                )));
            }
        }
        Ok(())
    }
}

/// Config file resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CATSW_CONFIG` environment variable
/// 3. User config: `~/.config/catsw/config.toml`
/// 4. System config: `/etc/catsw/config.toml` (Linux only)
///
/// Returns `None` when nothing exists at any of the locations.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("catsw").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/catsw/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve, load and validate the configuration
///
/// A missing file is not an error by itself: built-in defaults are used
/// with a warning, and validation decides whether that is enough.
pub fn load_config(cli_arg: Option<&Path>) -> Result<CatswConfig> {
    let config = match resolve_config_path(cli_arg) {
        Some(path) => CatswConfig::load_file(&path)?,
        None => {
            warn!("No config file found, using built-in defaults");
            CatswConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}
