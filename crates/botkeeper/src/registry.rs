//! Authoritative registry of process definitions.
//!
//! The registry validates input, assigns supervisor names and owns the
//! lifecycle of definitions in the [`Store`]. Deleting a definition also
//! removes its supervisor process (best-effort) and everything the record
//! owns.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::env::validate_env_json;
use crate::model::{ActionKind, ProcessDefinition, ProcessId, RuntimeKind};
use crate::store::{StorageError, Store};
use crate::supervisor::Supervisor;
use crate::validation::{ValidationError, validate_name, validate_script_path};

/// Attempts at finding a free supervisor name before giving up.
const NAME_ATTEMPTS: i64 = 3;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("process not found: {0}")]
    NotFound(ProcessId),

    #[error("supervisor name already registered: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for RegistryError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(name) => RegistryError::Conflict(name),
            other => RegistryError::Storage(other),
        }
    }
}

// ============================================================================
// Input shapes
// ============================================================================

/// Fields for a new definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProcess {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub script_path: String,
    /// JSON object, or a string holding one.
    #[serde(default)]
    pub env_vars: Option<Value>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
}

/// Partial update. Absent fields are left unchanged; identity fields are not
/// part of the shape and therefore ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub script_path: Option<String>,
    #[serde(default)]
    pub env_vars: Option<Value>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
}

/// Normalize an env payload into its stored JSON string form.
fn env_to_string(value: Value) -> Result<String, ValidationError> {
    let raw = match value {
        Value::Null => return Ok("{}".to_string()),
        Value::String(s) if s.trim().is_empty() => return Ok("{}".to_string()),
        Value::String(s) => s,
        other @ Value::Object(_) => other.to_string(),
        _ => {
            return Err(ValidationError::Invalid(
                "env_vars must be a JSON object".to_string(),
            ));
        }
    };
    validate_env_json(&raw)?;
    Ok(raw)
}

/// `bot-<slug>-<millis>`; whitespace runs in the lowercased name become `-`.
pub fn supervisor_name_for(name: &str, at: DateTime<Utc>) -> String {
    let slug = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("bot-{}-{}", slug, at.timestamp_millis())
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Clone)]
pub struct ProcessRegistry {
    store: Store,
    supervisor: Arc<dyn Supervisor>,
    allowed_roots: Arc<Vec<PathBuf>>,
}

impl ProcessRegistry {
    pub fn new(store: Store, supervisor: Arc<dyn Supervisor>, allowed_roots: Vec<PathBuf>) -> Self {
        Self {
            store,
            supervisor,
            allowed_roots: Arc::new(allowed_roots),
        }
    }

    pub fn get(&self, id: &ProcessId) -> Option<ProcessDefinition> {
        self.store.get(id)
    }

    /// Directories executables and `.env` sources must live under.
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn require(&self, id: &ProcessId) -> Result<ProcessDefinition, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    pub fn get_by_supervisor_name(&self, name: &str) -> Option<ProcessDefinition> {
        self.store.get_by_supervisor_name(name)
    }

    /// All definitions, newest first.
    pub fn list(&self) -> Vec<ProcessDefinition> {
        self.store.list()
    }

    /// Validate and register a new definition. The record starts with one
    /// `created` history entry.
    pub async fn create(&self, fields: NewProcess) -> Result<ProcessDefinition, RegistryError> {
        if fields.name.trim().is_empty()
            || fields.kind.trim().is_empty()
            || fields.script_path.trim().is_empty()
        {
            return Err(ValidationError::Invalid(
                "name, type and script_path are required".to_string(),
            )
            .into());
        }
        let name = validate_name(&fields.name)?;
        let kind: RuntimeKind = fields
            .kind
            .trim()
            .parse()
            .map_err(ValidationError::Invalid)?;
        let script_path = validate_script_path(&fields.script_path, &self.allowed_roots)?;
        let env_vars = env_to_string(fields.env_vars.unwrap_or(Value::Null))?;

        let now = Utc::now();
        let mut attempt = 0;
        loop {
            let at = now + chrono::Duration::milliseconds(attempt);
            let definition = ProcessDefinition {
                id: ProcessId::generate(),
                name: name.clone(),
                kind,
                script_path: script_path.clone(),
                supervisor_name: supervisor_name_for(&name, at),
                env_vars: env_vars.clone(),
                auto_restart: fields.auto_restart.unwrap_or(true),
                created_at: now,
                updated_at: now,
            };

            match self
                .store
                .insert(definition.clone(), ActionKind::Created)
                .await
            {
                Ok(_) => {
                    info!(
                        process = %definition.id,
                        supervisor_name = %definition.supervisor_name,
                        kind = %definition.kind,
                        "Process registered"
                    );
                    return Ok(definition);
                }
                Err(StorageError::Conflict(taken)) if attempt + 1 < NAME_ATTEMPTS => {
                    debug!(supervisor_name = %taken, "Supervisor name taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply the provided fields. Returns the updated definition.
    pub async fn update(
        &self,
        id: &ProcessId,
        patch: ProcessPatch,
    ) -> Result<ProcessDefinition, RegistryError> {
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let script_path = patch
            .script_path
            .as_deref()
            .map(|p| validate_script_path(p, &self.allowed_roots))
            .transpose()?;
        let env_vars = patch.env_vars.map(env_to_string).transpose()?;
        let auto_restart = patch.auto_restart;

        let updated = self
            .store
            .update(id, |def| {
                if let Some(name) = name {
                    def.name = name;
                }
                if let Some(path) = script_path {
                    def.script_path = path;
                }
                if let Some(env) = env_vars {
                    def.env_vars = env;
                }
                if let Some(flag) = auto_restart {
                    def.auto_restart = flag;
                }
                def.updated_at = Utc::now();
            })
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        debug!(process = %id, "Process definition updated");
        Ok(updated)
    }

    /// Remove the supervisor process (errors are logged and swallowed), then
    /// the definition together with its history and samples.
    pub async fn delete(&self, id: &ProcessId) -> Result<ProcessDefinition, RegistryError> {
        let definition = self.require(id)?;

        if let Err(e) = self.supervisor.delete(&definition.supervisor_name).await {
            warn!(
                process = %id,
                supervisor_name = %definition.supervisor_name,
                error = %e,
                "Supervisor delete failed, removing definition anyway"
            );
        }

        let removed = self
            .store
            .remove(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        info!(process = %id, "Process deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetricRetention;
    use crate::supervisor::MemorySupervisor;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> (ProcessRegistry, Arc<MemorySupervisor>) {
        let supervisor = Arc::new(MemorySupervisor::new());
        let store = Store::in_memory(MetricRetention::default());
        (
            ProcessRegistry::new(store, supervisor.clone(), Vec::new()),
            supervisor,
        )
    }

    fn echo() -> NewProcess {
        NewProcess {
            name: "Echo".to_string(),
            kind: "scripted-py".to_string(),
            script_path: "/srv/bots/echo.py".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn supervisor_name_slugs_whitespace() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(supervisor_name_for("Echo", at), "bot-echo-1700000000123");
        assert_eq!(
            supervisor_name_for("My  Chat Bot", at),
            "bot-my-chat-bot-1700000000123"
        );
    }

    #[test]
    fn env_accepts_object_or_string() {
        assert_eq!(env_to_string(json!({"A": "1"})).unwrap(), r#"{"A":"1"}"#);
        assert_eq!(env_to_string(json!(r#"{"B":"2"}"#)).unwrap(), r#"{"B":"2"}"#);
        assert_eq!(env_to_string(Value::Null).unwrap(), "{}");
        assert!(env_to_string(json!([1, 2])).is_err());
        assert!(env_to_string(json!("not json")).is_err());
    }

    #[tokio::test]
    async fn create_assigns_identity_and_defaults() {
        let (registry, _) = registry();
        let def = registry.create(echo()).await.unwrap();

        assert!(def.supervisor_name.starts_with("bot-echo-"));
        assert_eq!(def.kind, RuntimeKind::ScriptedPy);
        assert_eq!(def.env_vars, "{}");
        assert!(def.auto_restart);
        assert_eq!(registry.get_by_supervisor_name(&def.supervisor_name), Some(def.clone()));
    }

    #[tokio::test]
    async fn create_accepts_legacy_kind() {
        let (registry, _) = registry();
        let def = registry
            .create(NewProcess {
                kind: "nodejs".to_string(),
                script_path: "/srv/bots/echo.js".to_string(),
                ..echo()
            })
            .await
            .unwrap();
        assert_eq!(def.kind, RuntimeKind::ScriptedJs);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (registry, _) = registry();

        let missing = registry
            .create(NewProcess {
                script_path: String::new(),
                ..echo()
            })
            .await;
        assert!(matches!(missing, Err(RegistryError::Validation(_))));

        let bad_kind = registry
            .create(NewProcess {
                kind: "ruby".to_string(),
                ..echo()
            })
            .await;
        assert!(matches!(bad_kind, Err(RegistryError::Validation(_))));

        let traversal = registry
            .create(NewProcess {
                script_path: "/srv/../etc/passwd".to_string(),
                ..echo()
            })
            .await;
        assert!(matches!(
            traversal,
            Err(RegistryError::Validation(ValidationError::ForbiddenPath(_)))
        ));

        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn create_enforces_allowed_roots() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let registry = ProcessRegistry::new(
            Store::in_memory(MetricRetention::default()),
            supervisor,
            vec![PathBuf::from("/srv/bots")],
        );

        assert!(registry.create(echo()).await.is_ok());
        let outside = registry
            .create(NewProcess {
                script_path: "/opt/other/echo.py".to_string(),
                ..echo()
            })
            .await;
        assert!(matches!(
            outside,
            Err(RegistryError::Validation(ValidationError::ForbiddenPath(_)))
        ));
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_supervisor_names() {
        let (registry, _) = registry();
        let a = registry.create(echo()).await.unwrap();
        let b = registry.create(echo()).await.unwrap();
        assert_ne!(a.supervisor_name, b.supervisor_name);
    }

    #[tokio::test]
    async fn update_applies_only_given_fields() {
        let (registry, _) = registry();
        let def = registry.create(echo()).await.unwrap();

        let updated = registry
            .update(
                &def.id,
                ProcessPatch {
                    auto_restart: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Echo");
        assert!(!updated.auto_restart);
        assert_eq!(updated.supervisor_name, def.supervisor_name);
        assert!(updated.updated_at >= def.updated_at);
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let (registry, _) = registry();
        let result = registry
            .update(&ProcessId::from("missing"), ProcessPatch::default())
            .await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_swallows_supervisor_errors() {
        let (registry, supervisor) = registry();
        let def = registry.create(echo()).await.unwrap();

        // Never started, so the supervisor reports NotFound.
        assert!(!supervisor.contains(&def.supervisor_name));
        registry.delete(&def.id).await.unwrap();
        assert!(registry.get(&def.id).is_none());

        let again = registry.delete(&def.id).await;
        assert!(matches!(again, Err(RegistryError::NotFound(_))));
    }
}
