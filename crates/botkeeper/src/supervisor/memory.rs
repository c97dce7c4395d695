//! In-memory supervisor.
//!
//! Keeps a table of "processes" without spawning anything. Used by tests and by
//! read-only demo deployments where no real daemon is available.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{StartHandle, StartSpec, Supervisor, SupervisorError, SupervisorProcess};
use super::ensure_script_exists;

/// CPU percent reported for a freshly started process.
const DEFAULT_CPU: f64 = 0.5;
/// Memory reported for a freshly started process (32 MiB).
const DEFAULT_MEMORY: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
struct MemoryProcess {
    status: String,
    started_at_ms: i64,
    restarts: u32,
    cpu: f64,
    memory: u64,
    out_log_path: Option<PathBuf>,
    err_log_path: Option<PathBuf>,
}

impl MemoryProcess {
    fn to_supervisor_process(&self, name: &str) -> SupervisorProcess {
        SupervisorProcess {
            name: name.to_string(),
            status: self.status.clone(),
            uptime_ms: Some(self.started_at_ms),
            cpu: self.cpu,
            memory: self.memory,
            restarts: self.restarts,
            out_log_path: self.out_log_path.clone(),
            err_log_path: self.err_log_path.clone(),
        }
    }
}

/// Supervisor that only tracks state in memory.
#[derive(Debug, Default)]
pub struct MemorySupervisor {
    processes: DashMap<String, MemoryProcess>,
    unreachable: AtomicBool,
    starts: AtomicUsize,
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the daemon connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Override the resource usage reported for `name`.
    pub fn set_usage(&self, name: &str, cpu: f64, memory: u64) {
        if let Some(mut p) = self.processes.get_mut(name) {
            p.cpu = cpu;
            p.memory = memory;
        }
    }

    /// Point `name` at log files, as a daemon would after launching it.
    pub fn set_log_paths(&self, name: &str, out: PathBuf, err: PathBuf) {
        if let Some(mut p) = self.processes.get_mut(name) {
            p.out_log_path = Some(out);
            p.err_log_path = Some(err);
        }
    }

    /// Mark `name` as crashed.
    pub fn crash(&self, name: &str) {
        if let Some(mut p) = self.processes.get_mut(name) {
            p.status = "errored".to_string();
            p.cpu = 0.0;
            p.memory = 0;
        }
    }

    /// Register `name` as already online without launching anything.
    pub fn adopt(&self, name: &str, cpu: f64, memory: u64) {
        self.processes.insert(
            name.to_string(),
            MemoryProcess {
                status: "online".to_string(),
                started_at_ms: Utc::now().timestamp_millis(),
                restarts: 0,
                cpu,
                memory,
                out_log_path: None,
                err_log_path: None,
            },
        );
    }

    /// Number of successful start calls so far.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    fn check_reachable(&self) -> Result<(), SupervisorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SupervisorError::Unreachable(
                "in-memory supervisor disconnected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Supervisor for MemorySupervisor {
    async fn start(&self, spec: &StartSpec) -> Result<StartHandle, SupervisorError> {
        self.check_reachable()?;
        ensure_script_exists(&spec.script).await?;

        let now = Utc::now().timestamp_millis();
        let mut entry = self
            .processes
            .entry(spec.name.clone())
            .or_insert_with(|| MemoryProcess {
                status: "stopped".to_string(),
                started_at_ms: now,
                restarts: 0,
                cpu: 0.0,
                memory: 0,
                out_log_path: None,
                err_log_path: None,
            });
        if entry.status == "online" {
            return Err(SupervisorError::Rejected(format!(
                "{} is already launched",
                spec.name
            )));
        }
        entry.status = "online".to_string();
        entry.started_at_ms = now;
        entry.cpu = DEFAULT_CPU;
        entry.memory = DEFAULT_MEMORY;
        drop(entry);

        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(StartHandle {
            name: spec.name.clone(),
            pid: None,
        })
    }

    async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        self.check_reachable()?;
        let mut entry = self
            .processes
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;
        if entry.status != "online" {
            return Err(SupervisorError::NotRunning(name.to_string()));
        }
        entry.status = "stopped".to_string();
        entry.cpu = 0.0;
        entry.memory = 0;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.check_reachable()?;
        let mut entry = self
            .processes
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        entry.status = "online".to_string();
        entry.started_at_ms = Utc::now().timestamp_millis();
        entry.restarts += 1;
        entry.cpu = DEFAULT_CPU;
        entry.memory = DEFAULT_MEMORY;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.check_reachable()?;
        self.processes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    async fn describe(&self, name: &str) -> Result<SupervisorProcess, SupervisorError> {
        self.check_reachable()?;
        self.processes
            .get(name)
            .map(|p| p.to_supervisor_process(name))
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<SupervisorProcess>, SupervisorError> {
        self.check_reachable()?;
        Ok(self
            .processes
            .iter()
            .map(|p| p.value().to_supervisor_process(p.key()))
            .collect())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
