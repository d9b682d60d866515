//! Scout configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScoutError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl ScoutConfig {
    /// Load config from `SCOUT_CONFIG` or the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SCOUT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScoutError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ScoutError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ScoutError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path (~/.scout/config.toml).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Scout home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scout")
    }
}

/// What to do with an `at:` schedule whose instant has already passed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastOneOffPolicy {
    /// Refuse the schedule with a parse error.
    #[default]
    Reject,
    /// Arm it for the next tick so it runs once.
    FireImmediately,
}

/// What to do on startup with a one-off whose fire time passed while the process was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedOneOffPolicy {
    #[default]
    FireOnce,
    Skip,
}

/// How deleting a task treats a run that is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    #[default]
    Abort,
    Await,
}

/// Scheduler / coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_run_secs")]
    pub max_run_secs: u64,
    #[serde(default)]
    pub past_one_off: PastOneOffPolicy,
    #[serde(default)]
    pub missed_one_off: MissedOneOffPolicy,
    #[serde(default)]
    pub on_delete_running: DeletePolicy,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_persist_max_retries")]
    pub persist_max_retries: u32,
}

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_max_run_secs() -> u64 { 3600 }
fn default_event_capacity() -> usize { 256 }
fn default_persist_max_retries() -> u32 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_run_secs: default_max_run_secs(),
            past_one_off: PastOneOffPolicy::default(),
            missed_one_off: MissedOneOffPolicy::default(),
            on_delete_running: DeletePolicy::default(),
            event_capacity: default_event_capacity(),
            persist_max_retries: default_persist_max_retries(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_backend() -> String { "sqlite".into() }
fn default_storage_path() -> String { "~/.scout/scheduler.db".into() }

impl StorageConfig {
    /// Storage path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

/// Run-history retention. `None` disables that rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub max_runs_per_task: Option<usize>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: Option<u32>,
}

fn default_max_age_days() -> Option<u32> { Some(30) }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_runs_per_task: None,
            max_age_days: default_max_age_days(),
        }
    }
}

/// HTTP/WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8001 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// External task runner endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,
}

fn default_runner_timeout() -> u64 { 300 }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_runner_timeout(),
        }
    }
}
