//! Process supervisor capability.
//!
//! The management plane never spawns bot processes itself. It drives an
//! external supervisor daemon through the narrow [`Supervisor`] trait:
//!
//! - [`Pm2Supervisor`]: shells out to the `pm2` CLI
//! - [`MemorySupervisor`]: in-process fake for tests and read-only demos
//! - [`TimedSupervisor`]: wraps any supervisor with a per-call timeout
//!
//! All call sites hold an `Arc<dyn Supervisor>`.

pub mod memory;
pub mod pm2;
pub mod timed;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::env::parse_env_lossy;
use crate::model::{LiveState, ProcessDefinition, ProcessStatus};

pub use memory::MemorySupervisor;
pub use pm2::Pm2Supervisor;
pub use timed::TimedSupervisor;

// ============================================================================
// Supervisor trait
// ============================================================================

/// Capability set of an external process-control daemon.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch a process. Fails with `ScriptNotFound` if the executable is missing.
    async fn start(&self, spec: &StartSpec) -> Result<StartHandle, SupervisorError>;

    /// Stop a process, keeping it registered with the daemon.
    async fn stop(&self, name: &str) -> Result<(), SupervisorError>;

    async fn restart(&self, name: &str) -> Result<(), SupervisorError>;

    /// Stop and unregister a process.
    async fn delete(&self, name: &str) -> Result<(), SupervisorError>;

    /// Describe one process. Fails with `NotFound` if the daemon has no record.
    async fn describe(&self, name: &str) -> Result<SupervisorProcess, SupervisorError>;

    /// List every process the daemon knows about.
    async fn list(&self) -> Result<Vec<SupervisorProcess>, SupervisorError>;

    /// Short adapter name for logs.
    fn kind(&self) -> &'static str;
}

// ============================================================================
// SupervisorError
// ============================================================================

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("invalid environment: {0}")]
    InvalidEnv(String),

    #[error("process is not running: {0}")]
    NotRunning(String),

    #[error("process not found in supervisor: {0}")]
    NotFound(String),

    #[error("supervisor rejected operation: {0}")]
    Rejected(String),

    #[error("supervisor unreachable: {0}")]
    Unreachable(String),

    #[error("supervisor {op} timed out after {}s", .after.as_secs())]
    Timeout { op: &'static str, after: Duration },

    #[error("unexpected supervisor output: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Start parameters
// ============================================================================

/// Supervisor-side crash restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub autorestart: bool,
    pub max_restarts: u32,
    pub min_uptime: Duration,
    pub restart_delay: Duration,
}

impl RestartPolicy {
    /// Policy for processes that must not be restarted by the daemon.
    pub fn disabled() -> Self {
        Self {
            autorestart: false,
            max_restarts: 0,
            min_uptime: Duration::ZERO,
            restart_delay: Duration::ZERO,
        }
    }
}

/// Bounds applied when a definition asks for auto-restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSettings {
    pub max_restarts: u32,
    pub min_uptime: Duration,
    pub restart_delay: Duration,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            min_uptime: Duration::from_secs(10),
            restart_delay: Duration::from_millis(4000),
        }
    }
}

impl RestartSettings {
    pub fn policy(&self, auto_restart: bool) -> RestartPolicy {
        if !auto_restart {
            return RestartPolicy::disabled();
        }
        RestartPolicy {
            autorestart: true,
            max_restarts: self.max_restarts,
            min_uptime: self.min_uptime,
            restart_delay: self.restart_delay,
        }
    }
}

/// Everything a supervisor needs to launch one process.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub name: String,
    pub script: PathBuf,
    pub interpreter: &'static str,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub restart: RestartPolicy,
}

impl StartSpec {
    /// Build a start spec from a definition. An unparseable environment
    /// degrades to an empty one.
    pub fn from_definition(def: &ProcessDefinition, settings: &RestartSettings) -> Self {
        let cwd = def
            .script_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            name: def.supervisor_name.clone(),
            script: def.script_path.clone(),
            interpreter: def.kind.interpreter(),
            cwd,
            env: parse_env_lossy(&def.env_vars, &def.supervisor_name),
            restart: settings.policy(def.auto_restart),
        }
    }
}

/// Returned by a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct StartHandle {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

// ============================================================================
// SupervisorProcess
// ============================================================================

/// A process as reported by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorProcess {
    pub name: String,
    /// Raw daemon status (`online`, `stopping`, `stopped`, `errored`, ...).
    pub status: String,
    /// Epoch milliseconds of the last start.
    pub uptime_ms: Option<i64>,
    pub cpu: f64,
    pub memory: u64,
    pub restarts: u32,
    pub out_log_path: Option<PathBuf>,
    pub err_log_path: Option<PathBuf>,
}

impl SupervisorProcess {
    pub fn live_state(&self) -> LiveState {
        LiveState {
            status: ProcessStatus::from_supervisor(&self.status),
            uptime: self.uptime_ms.unwrap_or(0),
            cpu: self.cpu.max(0.0),
            memory: self.memory,
            restarts: self.restarts,
        }
    }
}

/// Precondition shared by adapters: the executable must exist as a file.
pub async fn ensure_script_exists(path: &Path) -> Result<(), SupervisorError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(SupervisorError::ScriptNotFound(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessId, RuntimeKind};
    use chrono::Utc;

    fn definition(auto_restart: bool, env: &str) -> ProcessDefinition {
        let now = Utc::now();
        ProcessDefinition {
            id: ProcessId::from("p1"),
            name: "Echo".to_string(),
            kind: RuntimeKind::ScriptedPy,
            script_path: PathBuf::from("/srv/bots/echo/main.py"),
            supervisor_name: "bot-echo-1".to_string(),
            env_vars: env.to_string(),
            auto_restart,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn start_spec_uses_script_dir_and_interpreter() {
        let spec = StartSpec::from_definition(
            &definition(true, r#"{"TOKEN":"x"}"#),
            &RestartSettings::default(),
        );
        assert_eq!(spec.cwd, PathBuf::from("/srv/bots/echo"));
        assert_eq!(spec.interpreter, "python3");
        assert_eq!(spec.env["TOKEN"], "x");
        assert!(spec.restart.autorestart);
        assert_eq!(spec.restart.max_restarts, 10);
    }

    #[test]
    fn disabled_auto_restart_has_no_backoff() {
        let spec = StartSpec::from_definition(&definition(false, "{}"), &RestartSettings::default());
        assert_eq!(spec.restart, RestartPolicy::disabled());
        assert_eq!(spec.restart.max_restarts, 0);
        assert_eq!(spec.restart.restart_delay, Duration::ZERO);
    }

    #[test]
    fn bad_env_degrades_to_empty() {
        let spec = StartSpec::from_definition(&definition(true, "{oops"), &RestartSettings::default());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn live_state_maps_status() {
        let proc = SupervisorProcess {
            name: "bot-echo-1".to_string(),
            status: "stopped".to_string(),
            uptime_ms: None,
            cpu: -1.0,
            memory: 10,
            restarts: 2,
            out_log_path: None,
            err_log_path: None,
        };
        let live = proc.live_state();
        assert_eq!(live.status, ProcessStatus::Offline);
        assert_eq!(live.uptime, 0);
        assert_eq!(live.cpu, 0.0);
        assert_eq!(live.restarts, 2);
    }

    #[tokio::test]
    async fn ensure_script_exists_checks_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("bot.js");
        assert!(matches!(
            ensure_script_exists(&script).await,
            Err(SupervisorError::ScriptNotFound(_))
        ));
        std::fs::write(&script, "").unwrap();
        assert!(ensure_script_exists(&script).await.is_ok());
        assert!(ensure_script_exists(dir.path()).await.is_err());
    }
}
