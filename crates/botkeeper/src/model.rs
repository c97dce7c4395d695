//! Domain types for managed processes, their history and live status.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ProcessId
// ============================================================================

/// Opaque, never-reused identifier of a process definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Generate a fresh identifier (lowercase ULID).
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// RuntimeKind
// ============================================================================

/// How a process's executable is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    #[serde(rename = "scripted-js", alias = "nodejs")]
    ScriptedJs,
    #[serde(rename = "scripted-py", alias = "python")]
    ScriptedPy,
}

impl RuntimeKind {
    /// Interpreter binary handed to the supervisor.
    pub fn interpreter(&self) -> &'static str {
        match self {
            RuntimeKind::ScriptedJs => "node",
            RuntimeKind::ScriptedPy => "python3",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::ScriptedJs => "scripted-js",
            RuntimeKind::ScriptedPy => "scripted-py",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scripted-js" | "nodejs" => Ok(RuntimeKind::ScriptedJs),
            "scripted-py" | "python" => Ok(RuntimeKind::ScriptedPy),
            other => Err(format!(
                "unknown runtime kind '{}' (expected scripted-js or scripted-py)",
                other
            )),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProcessDefinition
// ============================================================================

/// A registered process definition.
///
/// `supervisor_name` is assigned once at creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: ProcessId,
    pub name: String,
    pub kind: RuntimeKind,
    pub script_path: PathBuf,
    pub supervisor_name: String,
    /// Serialized JSON object of environment variables.
    pub env_vars: String,
    pub auto_restart: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// ActionRecord
// ============================================================================

/// Kind of lifecycle action recorded in a process's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Created,
    Updated,
    Start,
    Stop,
    Restart,
    StartFailed,
    StopFailed,
    RestartFailed,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Created => "created",
            ActionKind::Updated => "updated",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
            ActionKind::StartFailed => "start_failed",
            ActionKind::StopFailed => "stop_failed",
            ActionKind::RestartFailed => "restart_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ActionKind::StartFailed | ActionKind::StopFailed | ActionKind::RestartFailed
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a process's append-only action history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: u64,
    pub process_id: ProcessId,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// MetricSample
// ============================================================================

/// A point-in-time resource sample of a running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: u64,
    pub process_id: ProcessId,
    /// CPU usage in percent.
    pub cpu: f64,
    /// Resident memory in bytes.
    pub memory: u64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Live status
// ============================================================================

/// Run state as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Online,
    #[default]
    Offline,
    Stopping,
    Errored,
}

impl ProcessStatus {
    /// Map a supervisor-reported status string onto the client-facing set.
    pub fn from_supervisor(status: &str) -> Self {
        match status {
            "online" => ProcessStatus::Online,
            "stopping" | "launching" | "waiting restart" => ProcessStatus::Stopping,
            "errored" => ProcessStatus::Errored,
            _ => ProcessStatus::Offline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Online => "online",
            ProcessStatus::Offline => "offline",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of a process as reported by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub status: ProcessStatus,
    /// Epoch milliseconds at which the process last came online (0 if unknown).
    pub uptime: i64,
    pub cpu: f64,
    pub memory: u64,
    pub restarts: u32,
}

impl LiveState {
    /// State used when the supervisor has no record of a process.
    pub fn offline() -> Self {
        Self::default()
    }
}

/// A definition merged with its live state. The only shape sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedStatus {
    #[serde(flatten)]
    pub definition: ProcessDefinition,
    #[serde(flatten)]
    pub live: LiveState,
}

impl UnifiedStatus {
    pub fn new(definition: ProcessDefinition, live: Option<LiveState>) -> Self {
        Self {
            definition,
            live: live.unwrap_or_else(LiveState::offline),
        }
    }

    pub fn is_online(&self) -> bool {
        self.live.status == ProcessStatus::Online
    }
}
