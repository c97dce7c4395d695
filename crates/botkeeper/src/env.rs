//! Environment variable handling for managed processes.
//!
//! Definitions store their environment as a serialized JSON object. Values are
//! never logged; only keys and parse errors are.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::validation::ValidationError;

/// Parse a serialized environment mapping.
///
/// Scalar non-string values are stringified; nested values are rejected.
pub fn parse_env_vars(raw: &str) -> Result<BTreeMap<String, String>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let Value::Object(map) = value else {
        return Err("environment must be a JSON object".to_string());
    };

    let mut env = BTreeMap::new();
    for (key, value) in map {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => {
                return Err(format!("environment variable '{}' must be a scalar", key));
            }
        };
        env.insert(key, value);
    }
    Ok(env)
}

/// Parse a serialized environment, degrading to an empty mapping on error.
pub fn parse_env_lossy(raw: &str, supervisor_name: &str) -> BTreeMap<String, String> {
    match parse_env_vars(raw) {
        Ok(env) => env,
        Err(e) => {
            warn!(process = %supervisor_name, error = %e, "Invalid environment, starting with empty env");
            BTreeMap::new()
        }
    }
}

/// Reject environment payloads that would not parse at start time.
pub fn validate_env_json(raw: &str) -> Result<(), ValidationError> {
    parse_env_vars(raw)
        .map(|_| ())
        .map_err(|e| ValidationError::Invalid(format!("invalid environment JSON: {}", e)))
}

/// Parse `KEY=VALUE` lines from dotenv content.
///
/// Blank lines and `#` comments are skipped; one layer of matching single or
/// double quotes around the value is removed.
pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = strip_matching_quotes(value);
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

fn strip_matching_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read the `.env` file next to `script_path`. Returns `None` if absent.
pub async fn read_dotenv_for(
    script_path: &Path,
) -> std::io::Result<Option<BTreeMap<String, String>>> {
    let dir = script_path.parent().unwrap_or(Path::new("/"));
    let env_path = dir.join(".env");
    match tokio::fs::read_to_string(&env_path).await {
        Ok(content) => Ok(Some(parse_dotenv(&content))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
