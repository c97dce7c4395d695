use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::store::MetricRetention;
use crate::supervisor::RestartSettings;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: Config = serde_saphyr::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reconciler.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.supervisor.call_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.call_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.metrics.max_samples_per_process == 0 {
            return Err(ConfigError::Invalid(
                "metrics.max_samples_per_process must be at least 1".to_string(),
            ));
        }
        if let Some(root) = self.policy.allowed_roots.iter().find(|r| !r.is_absolute()) {
            return Err(ConfigError::Invalid(format!(
                "policy.allowed_roots entries must be absolute: {}",
                root.display()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_keep_alive_interval() -> u64 {
    15
}

// ============================================================================
// SupervisorConfig
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    #[default]
    Pm2,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub kind: SupervisorKind,
    #[serde(default = "default_pm2_bin")]
    pub pm2_bin: String,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_min_uptime")]
    pub min_uptime_seconds: u64,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kind: SupervisorKind::default(),
            pm2_bin: default_pm2_bin(),
            call_timeout_seconds: default_call_timeout(),
            max_restarts: default_max_restarts(),
            min_uptime_seconds: default_min_uptime(),
            restart_delay_ms: default_restart_delay(),
        }
    }
}

impl SupervisorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn restart_settings(&self) -> RestartSettings {
        RestartSettings {
            max_restarts: self.max_restarts,
            min_uptime: Duration::from_secs(self.min_uptime_seconds),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }
}

fn default_pm2_bin() -> String {
    "pm2".to_string()
}

fn default_call_timeout() -> u64 {
    10
}

fn default_max_restarts() -> u32 {
    10
}

fn default_min_uptime() -> u64 {
    10
}

fn default_restart_delay() -> u64 {
    4000
}

// ============================================================================
// ReconcilerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_interval() -> u64 {
    3
}

// ============================================================================
// StoreConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".botkeeper/processes")
}

// ============================================================================
// MetricsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_max_samples")]
    pub max_samples_per_process: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            max_samples_per_process: default_max_samples(),
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> MetricRetention {
        MetricRetention {
            max_age: chrono::Duration::hours(i64::from(self.retention_hours)),
            max_samples: self.max_samples_per_process,
        }
    }
}

fn default_retention_hours() -> u32 {
    168
}

fn default_max_samples() -> usize {
    10_000
}

// ============================================================================
// PolicyConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    /// Reject every mutating request (demo deployments).
    #[serde(default)]
    pub read_only: bool,
    /// Directories executables must live under. Empty permits any absolute path.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
