use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::DEFAULT_MEMORY_CAPACITY;
use crate::types::AgentConfig;

/// Top-level configuration loaded from `~/.fleetwork/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Agents created at daemon boot when no snapshot restored them.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl Config {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.persistence.validate()?;
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Validation("agent name must not be empty".into()));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate agent name in config: `{}`",
                    agent.name
                )));
            }
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        data_dir().join("config.toml")
    }
}

/// `~/.fleetwork`, or `./.fleetwork` when no home directory is known.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetwork")
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_service_name() -> String {
    "fleetwork".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// Knobs for the execution loops, the skill scheduler and the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Restart agents whose loop ended in ERROR.
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    /// Upper bound on an idle wait, so time-based skills fire on schedule.
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    #[serde(default = "default_task_history_limit")]
    pub task_history_limit: usize,
    /// Multiplier applied to every skill's experience on each loop pass.
    #[serde(default = "default_experience_decay")]
    pub experience_decay: f64,
    #[serde(default = "default_experience_reward")]
    pub experience_reward: f64,
    #[serde(default = "default_experience_penalty")]
    pub experience_penalty: f64,
    #[serde(default = "default_periodic_tolerance_ms")]
    pub periodic_tolerance_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_restart: false,
            restart_delay_ms: default_restart_delay_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            idle_tick_ms: default_idle_tick_ms(),
            task_history_limit: default_task_history_limit(),
            experience_decay: default_experience_decay(),
            experience_reward: default_experience_reward(),
            experience_penalty: default_experience_penalty(),
            periodic_tolerance_ms: default_periodic_tolerance_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.experience_decay > 0.0 && self.experience_decay <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "runtime.experience_decay must be in (0, 1], got {}",
                self.experience_decay
            )));
        }
        if self.experience_penalty <= self.experience_reward {
            return Err(ConfigError::Validation(
                "runtime.experience_penalty must exceed runtime.experience_reward".into(),
            ));
        }
        if self.idle_tick_ms == 0 {
            return Err(ConfigError::Validation(
                "runtime.idle_tick_ms must be greater than zero".into(),
            ));
        }
        if self.stop_timeout_secs == 0 || self.start_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "runtime start/stop timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    pub fn periodic_tolerance(&self) -> Duration {
        Duration::from_millis(self.periodic_tolerance_ms)
    }
}

fn default_restart_delay_ms() -> u64 {
    1000
}
fn default_stop_timeout_secs() -> u64 {
    10
}
fn default_start_timeout_secs() -> u64 {
    5
}
fn default_idle_tick_ms() -> u64 {
    1000
}
fn default_task_history_limit() -> usize {
    100
}
fn default_experience_decay() -> f64 {
    0.995
}
fn default_experience_reward() -> f64 {
    1.0
}
fn default_experience_penalty() -> f64 {
    2.0
}
fn default_periodic_tolerance_ms() -> u64 {
    50
}

/// Default component names used when an agent config does not pick one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsConfig {
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default = "default_queue_type")]
    pub queue_type: String,
    #[serde(default = "default_llm_type")]
    pub llm_type: String,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            memory_type: default_memory_type(),
            queue_type: default_queue_type(),
            llm_type: default_llm_type(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

fn default_memory_type() -> String {
    "lru".into()
}
fn default_queue_type() -> String {
    "priority".into()
}
fn default_llm_type() -> String {
    "echo".into()
}
fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Snapshot file; `~` expands to the home directory.
    #[serde(default = "default_snapshot_path")]
    pub path: String,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_snapshot_path(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "persistence.snapshot_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// The snapshot path with a leading `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_snapshot_path() -> String {
    "~/.fleetwork/agents.json".into()
}
fn default_snapshot_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_stale_after_secs() -> u64 {
    300
}
