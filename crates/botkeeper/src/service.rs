//! Process management surface.
//!
//! [`ProcessService`] is what the HTTP layer talks to. Reads merge registry
//! data with live supervisor state; lifecycle commands are serialized per
//! process and report an explicit list of [`Effect`]s that the service then
//! applies (currently only history records).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::env::read_dotenv_for;
use crate::history::ActionLog;
use crate::logs::{LogTail, tail_pair};
use crate::metrics::MetricsStore;
use crate::model::{
    ActionKind, ActionRecord, MetricSample, ProcessDefinition, ProcessId, ProcessStatus,
    UnifiedStatus,
};
use crate::reconciler::merge_status;
use crate::registry::{NewProcess, ProcessPatch, ProcessRegistry, RegistryError};
use crate::store::StorageError;
use crate::supervisor::{RestartSettings, StartSpec, Supervisor, SupervisorError};
use crate::sync::KeyedLocks;
use crate::validation::{ValidationError, validate_dotenv_source};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("process not found: {0}")]
    NotFound(ProcessId),

    #[error(transparent)]
    Supervisor(SupervisorError),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Invalid(msg) => ServiceError::Validation(msg),
            ValidationError::ForbiddenPath(msg) => {
                ServiceError::Filesystem(format!("forbidden path: {}", msg))
            }
        }
    }
}

impl From<SupervisorError> for ServiceError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::ScriptNotFound(path) => {
                ServiceError::Filesystem(format!("script not found: {}", path.display()))
            }
            other => ServiceError::Supervisor(other),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(name) => ServiceError::Conflict(name),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Validation(v) => v.into(),
            RegistryError::NotFound(id) => ServiceError::NotFound(id),
            RegistryError::Conflict(name) => ServiceError::Conflict(name),
            RegistryError::Storage(s) => ServiceError::Storage(s),
        }
    }
}

// ============================================================================
// Command outcomes
// ============================================================================

/// Side effect requested by a lifecycle command.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RecordAction {
        process: ProcessId,
        kind: ActionKind,
        error: Option<String>,
    },
}

/// Result of a lifecycle command.
///
/// `error` is set when the command failed after the process was resolved;
/// its effects (the failure record) are applied either way.
#[derive(Debug)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    pub error: Option<ServiceError>,
    pub effects: Vec<Effect>,
}

impl CommandOutcome {
    fn succeeded(message: String, effects: Vec<Effect>) -> Self {
        Self {
            success: true,
            message,
            error: None,
            effects,
        }
    }

    fn failed(message: String, error: ServiceError, effects: Vec<Effect>) -> Self {
        Self {
            success: false,
            message,
            error: Some(error),
            effects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Start,
    Stop,
    Restart,
}

impl Lifecycle {
    fn verb(self) -> &'static str {
        match self {
            Lifecycle::Start => "start",
            Lifecycle::Stop => "stop",
            Lifecycle::Restart => "restart",
        }
    }

    fn done(self) -> &'static str {
        match self {
            Lifecycle::Start => "started",
            Lifecycle::Stop => "stopped",
            Lifecycle::Restart => "restarted",
        }
    }

    fn record(self, failed: bool) -> ActionKind {
        match (self, failed) {
            (Lifecycle::Start, false) => ActionKind::Start,
            (Lifecycle::Start, true) => ActionKind::StartFailed,
            (Lifecycle::Stop, false) => ActionKind::Stop,
            (Lifecycle::Stop, true) => ActionKind::StopFailed,
            (Lifecycle::Restart, false) => ActionKind::Restart,
            (Lifecycle::Restart, true) => ActionKind::RestartFailed,
        }
    }
}

// ============================================================================
// Read models
// ============================================================================

/// Totals across all registered processes. CPU and memory are summed over
/// online processes only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    #[serde(rename = "total_bots")]
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub total_cpu: f64,
    pub total_memory: u64,
}

impl AggregateStats {
    pub fn from_statuses(statuses: &[UnifiedStatus]) -> Self {
        let mut stats = AggregateStats {
            total: statuses.len(),
            ..Default::default()
        };
        for status in statuses.iter().filter(|s| s.is_online()) {
            stats.online += 1;
            stats.total_cpu += status.live.cpu;
            stats.total_memory += status.live.memory;
        }
        stats.offline = stats.total - stats.online;
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DotenvImport {
    pub env_vars: BTreeMap<String, String>,
    pub found: bool,
    pub message: String,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct ProcessService {
    registry: ProcessRegistry,
    history: ActionLog,
    metrics: MetricsStore,
    supervisor: Arc<dyn Supervisor>,
    restart: RestartSettings,
    locks: KeyedLocks,
}

impl ProcessService {
    pub fn new(
        registry: ProcessRegistry,
        history: ActionLog,
        metrics: MetricsStore,
        supervisor: Arc<dyn Supervisor>,
        restart: RestartSettings,
    ) -> Self {
        Self {
            registry,
            history,
            metrics,
            supervisor,
            restart,
            locks: KeyedLocks::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Every definition with its live state, newest first. An unreachable
    /// supervisor reports everything offline.
    pub async fn list_with_status(&self) -> Vec<UnifiedStatus> {
        let processes = match self.supervisor.list().await {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "Supervisor list failed, reporting processes offline");
                Vec::new()
            }
        };
        merge_status(self.registry.list(), &processes)
    }

    pub async fn get_one_with_status(&self, id: &ProcessId) -> Result<UnifiedStatus, ServiceError> {
        let definition = self.registry.require(id)?;
        let live = match self.supervisor.describe(&definition.supervisor_name).await {
            Ok(process) => Some(process.live_state()),
            Err(SupervisorError::NotFound(_)) => None,
            Err(e) => {
                warn!(process = %id, error = %e, "Supervisor describe failed, reporting offline");
                None
            }
        };
        Ok(UnifiedStatus::new(definition, live))
    }

    pub fn history(&self, id: &ProcessId, limit: usize) -> Result<Vec<ActionRecord>, ServiceError> {
        self.history
            .query(id, limit)
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    pub fn metrics(
        &self,
        id: &ProcessId,
        hours: u32,
        limit: usize,
    ) -> Result<Vec<MetricSample>, ServiceError> {
        self.metrics
            .query(id, hours, limit)
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    /// Counts and summed usage from one supervisor poll round.
    pub async fn aggregate_stats(&self) -> Result<AggregateStats, ServiceError> {
        let processes = self.supervisor.list().await?;
        let statuses = merge_status(self.registry.list(), &processes);
        Ok(AggregateStats::from_statuses(&statuses))
    }

    /// Last `lines` lines of the stdout and stderr logs the supervisor reports.
    pub async fn logs_tail(&self, id: &ProcessId, lines: usize) -> Result<LogTail, ServiceError> {
        let definition = self.registry.require(id)?;
        let process = self.supervisor.describe(&definition.supervisor_name).await?;
        tail_pair(
            process.out_log_path.as_deref(),
            process.err_log_path.as_deref(),
            lines,
        )
        .await
        .map_err(|e| ServiceError::Filesystem(format!("failed to read logs: {}", e)))
    }

    /// Read the `.env` file next to `script_path`, which must sit under the
    /// permitted roots like any executable.
    pub async fn env_from_dotenv(&self, script_path: &str) -> Result<DotenvImport, ServiceError> {
        let path: PathBuf = validate_dotenv_source(script_path, self.registry.allowed_roots())
            .map_err(|e| match e {
                ValidationError::ForbiddenPath(msg) => ServiceError::Forbidden(msg),
                other => other.into(),
            })?;

        match read_dotenv_for(&path).await {
            Ok(Some(env_vars)) => {
                debug!(keys = env_vars.len(), "Read .env file");
                let message = format!("Loaded {} variables from .env", env_vars.len());
                Ok(DotenvImport {
                    env_vars,
                    found: true,
                    message,
                })
            }
            Ok(None) => Ok(DotenvImport {
                env_vars: BTreeMap::new(),
                found: false,
                message: ".env file not found".to_string(),
            }),
            Err(e) => Err(ServiceError::Filesystem(format!(
                "failed to read .env: {}",
                e
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Definition commands
    // ------------------------------------------------------------------------

    pub async fn create(&self, fields: NewProcess) -> Result<ProcessDefinition, ServiceError> {
        Ok(self.registry.create(fields).await?)
    }

    pub async fn update(
        &self,
        id: &ProcessId,
        patch: ProcessPatch,
    ) -> Result<ProcessDefinition, ServiceError> {
        let (_guard, _) = self.acquire(id).await?;

        let updated = self.registry.update(id, patch).await?;
        self.history.append(id, ActionKind::Updated, None).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: &ProcessId) -> Result<CommandOutcome, ServiceError> {
        let (guard, _) = self.acquire(id).await?;
        let removed = self.registry.delete(id).await;
        drop(guard);
        self.locks.remove(id.as_str());
        let removed = removed?;

        Ok(CommandOutcome::succeeded(
            format!("Process \"{}\" deleted", removed.name),
            Vec::new(),
        ))
    }

    // ------------------------------------------------------------------------
    // Lifecycle commands
    // ------------------------------------------------------------------------

    pub async fn start(&self, id: &ProcessId) -> Result<CommandOutcome, ServiceError> {
        self.lifecycle(id, Lifecycle::Start).await
    }

    pub async fn stop(&self, id: &ProcessId) -> Result<CommandOutcome, ServiceError> {
        self.lifecycle(id, Lifecycle::Stop).await
    }

    pub async fn restart(&self, id: &ProcessId) -> Result<CommandOutcome, ServiceError> {
        self.lifecycle(id, Lifecycle::Restart).await
    }

    /// Resolve, run under the process lock, then apply the effects.
    ///
    /// `Err` is only returned when the process can not be resolved; command
    /// failures come back as an unsuccessful [`CommandOutcome`].
    async fn lifecycle(
        &self,
        id: &ProcessId,
        command: Lifecycle,
    ) -> Result<CommandOutcome, ServiceError> {
        let (_guard, definition) = self.acquire(id).await?;
        let outcome = self.execute(&definition, command).await;
        self.apply(&outcome.effects).await;

        match &outcome.error {
            None => info!(process = %id, command = command.verb(), "Lifecycle command succeeded"),
            Some(e) => warn!(process = %id, command = command.verb(), error = %e, "Lifecycle command failed"),
        }
        Ok(outcome)
    }

    /// Take the per-process lock for an existing definition.
    ///
    /// Unknown ids never get a lock entry. A definition deleted while we
    /// waited releases its entry again.
    async fn acquire(
        &self,
        id: &ProcessId,
    ) -> Result<(OwnedMutexGuard<()>, ProcessDefinition), ServiceError> {
        self.registry.require(id)?;
        let guard = self.locks.get(id.as_str()).lock_owned().await;
        match self.registry.require(id) {
            Ok(definition) => Ok((guard, definition)),
            Err(e) => {
                drop(guard);
                self.locks.remove(id.as_str());
                Err(e.into())
            }
        }
    }

    async fn execute(&self, def: &ProcessDefinition, command: Lifecycle) -> CommandOutcome {
        if command == Lifecycle::Start && self.is_online(def).await {
            return CommandOutcome::succeeded(
                format!("Process \"{}\" is already running", def.name),
                Vec::new(),
            );
        }

        let result = match command {
            Lifecycle::Start => {
                let spec = StartSpec::from_definition(def, &self.restart);
                self.supervisor.start(&spec).await.map(|_| ())
            }
            Lifecycle::Stop => self.supervisor.stop(&def.supervisor_name).await,
            Lifecycle::Restart => self.supervisor.restart(&def.supervisor_name).await,
        };

        match result {
            Ok(()) => CommandOutcome::succeeded(
                format!("Process \"{}\" {}", def.name, command.done()),
                vec![Effect::RecordAction {
                    process: def.id.clone(),
                    kind: command.record(false),
                    error: None,
                }],
            ),
            Err(e) => {
                let error = ServiceError::from(e);
                let detail = error.to_string();
                CommandOutcome::failed(
                    format!("Failed to {} process \"{}\"", command.verb(), def.name),
                    error,
                    vec![Effect::RecordAction {
                        process: def.id.clone(),
                        kind: command.record(true),
                        error: Some(detail),
                    }],
                )
            }
        }
    }

    async fn is_online(&self, def: &ProcessDefinition) -> bool {
        match self.supervisor.describe(&def.supervisor_name).await {
            Ok(process) => process.live_state().status == ProcessStatus::Online,
            Err(_) => false,
        }
    }

    async fn apply(&self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::RecordAction {
                    process,
                    kind,
                    error,
                } => {
                    self.history.append(process, *kind, error.clone()).await;
                }
            }
        }
    }
}
