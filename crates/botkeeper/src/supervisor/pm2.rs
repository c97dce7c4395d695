//! pm2 adapter.
//!
//! All operations shell out to the `pm2` CLI via `tokio::process::Command`.
//! The daemon is the source of truth; nothing is cached here.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{StartHandle, StartSpec, Supervisor, SupervisorError, SupervisorProcess};
use super::ensure_script_exists;

/// Supervisor backed by a local pm2 daemon.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    bin: String,
}

impl Pm2Supervisor {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Make sure the daemon is up, spawning it if needed (`pm2 ping`).
    pub async fn connect(&self) -> Result<(), SupervisorError> {
        let output = self.run(&["ping"]).await?;
        if !output.status.success() {
            return Err(SupervisorError::Unreachable(stderr_of(&output)));
        }
        info!(bin = %self.bin, "pm2 daemon reachable");
        Ok(())
    }

    /// Run the CLI to completion. The child is killed if the call is
    /// dropped, e.g. by [`super::TimedSupervisor`].
    async fn run(&self, args: &[&str]) -> Result<Output, SupervisorError> {
        debug!(bin = %self.bin, ?args, "Running pm2");
        Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unreachable(format!("failed to run {}: {}", self.bin, e)))
    }

    /// Run a per-name command, mapping "not found" output onto `missing`.
    async fn run_named(
        &self,
        verb: &str,
        name: &str,
        missing: fn(String) -> SupervisorError,
    ) -> Result<(), SupervisorError> {
        let output = self.run(&[verb, name]).await?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_of(&output);
        if message.to_lowercase().contains("not found") {
            return Err(missing(name.to_string()));
        }
        Err(SupervisorError::Rejected(format!("pm2 {} {}: {}", verb, name, message)))
    }
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn start(&self, spec: &StartSpec) -> Result<StartHandle, SupervisorError> {
        ensure_script_exists(&spec.script).await?;

        let script = spec.script.to_string_lossy();
        let cwd = spec.cwd.to_string_lossy();
        let mut args: Vec<String> = vec![
            "start".to_string(),
            script.to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--interpreter".to_string(),
            spec.interpreter.to_string(),
            "--cwd".to_string(),
            cwd.to_string(),
        ];
        if spec.restart.autorestart {
            args.extend([
                "--max-restarts".to_string(),
                spec.restart.max_restarts.to_string(),
                "--min-uptime".to_string(),
                spec.restart.min_uptime.as_millis().to_string(),
                "--restart-delay".to_string(),
                spec.restart.restart_delay.as_millis().to_string(),
            ]);
        } else {
            args.push("--no-autorestart".to_string());
        }

        // pm2 captures the environment of the invoking CLI process.
        let output = Command::new(&self.bin)
            .args(&args)
            .envs(&spec.env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unreachable(format!("failed to run {}: {}", self.bin, e)))?;

        if !output.status.success() {
            return Err(SupervisorError::Rejected(format!(
                "pm2 start {}: {}",
                spec.name,
                stderr_of(&output)
            )));
        }

        info!(process = %spec.name, env_keys = spec.env.len(), "Started via pm2");
        Ok(StartHandle {
            name: spec.name.clone(),
            pid: None,
        })
    }

    async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        self.run_named("stop", name, SupervisorError::NotRunning).await
    }

    async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.run_named("restart", name, SupervisorError::NotFound).await
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.run_named("delete", name, SupervisorError::NotFound).await
    }

    async fn describe(&self, name: &str) -> Result<SupervisorProcess, SupervisorError> {
        self.list()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<SupervisorProcess>, SupervisorError> {
        let output = self.run(&["jlist"]).await?;
        if !output.status.success() {
            return Err(SupervisorError::Unreachable(stderr_of(&output)));
        }
        parse_jlist(&String::from_utf8_lossy(&output.stdout))
    }

    fn kind(&self) -> &'static str {
        "pm2"
    }
}

// ============================================================================
// jlist parsing
// ============================================================================

#[derive(Deserialize)]
struct JlistEntry {
    name: String,
    pm2_env: JlistEnv,
    #[serde(default)]
    monit: Option<JlistMonit>,
}

#[derive(Deserialize)]
struct JlistEnv {
    status: String,
    #[serde(default)]
    pm_uptime: Option<i64>,
    #[serde(default)]
    restart_time: Option<u32>,
    #[serde(default)]
    pm_out_log_path: Option<PathBuf>,
    #[serde(default)]
    pm_err_log_path: Option<PathBuf>,
}

#[derive(Default, Deserialize)]
struct JlistMonit {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: u64,
}

/// Parse `pm2 jlist` output.
///
/// pm2 may print banner lines (some of them starting with `[PM2]`) before the
/// JSON array, so the first line-leading `[` that parses as an array wins.
/// Entries that do not match the expected shape are skipped.
pub(crate) fn parse_jlist(stdout: &str) -> Result<Vec<SupervisorProcess>, SupervisorError> {
    let mut last_error = None;
    let mut entries = None;
    for (idx, _) in stdout.match_indices('[') {
        if idx > 0 && !stdout[..idx].ends_with('\n') {
            continue;
        }
        match serde_json::from_str::<Vec<Value>>(stdout[idx..].trim_end()) {
            Ok(parsed) => {
                entries = Some(parsed);
                break;
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    let entries = entries.ok_or_else(|| {
        SupervisorError::Protocol(format!(
            "no JSON array in pm2 jlist output{}",
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        ))
    })?;

    let mut processes = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<JlistEntry>(entry) {
            Ok(e) => {
                let monit = e.monit.unwrap_or_default();
                processes.push(SupervisorProcess {
                    name: e.name,
                    status: e.pm2_env.status,
                    uptime_ms: e.pm2_env.pm_uptime,
                    cpu: monit.cpu,
                    memory: monit.memory,
                    restarts: e.pm2_env.restart_time.unwrap_or(0),
                    out_log_path: e.pm2_env.pm_out_log_path,
                    err_log_path: e.pm2_env.pm_err_log_path,
                });
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed pm2 process entry");
            }
        }
    }
    Ok(processes)
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.to_string()
    }
}
