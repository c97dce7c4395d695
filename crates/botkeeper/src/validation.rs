//! Input validation for process definitions.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Maximum display name length in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Path prefixes never readable through the dotenv import.
const FORBIDDEN_PREFIXES: &[&str] = &["/etc", "/root"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}")]
    Invalid(String),

    #[error("forbidden path: {0}")]
    ForbiddenPath(String),
}

/// Validate and normalize a display name.
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ValidationError::Invalid(format!(
            "name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_')
    {
        return Err(ValidationError::Invalid(
            "name may only contain letters, digits, spaces, dashes and underscores".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Validate an executable path against traversal and the permitted roots.
///
/// An empty `roots` slice permits any absolute path.
pub fn validate_script_path(path: &str, roots: &[PathBuf]) -> Result<PathBuf, ValidationError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ValidationError::Invalid("script path is required".to_string()));
    }
    let path = PathBuf::from(path);
    if !path.is_absolute() {
        return Err(ValidationError::Invalid(format!(
            "script path must be absolute: {}",
            path.display()
        )));
    }
    if has_parent_component(&path) {
        return Err(ValidationError::ForbiddenPath(format!(
            "path traversal in {}",
            path.display()
        )));
    }
    if !roots.is_empty() && !roots.iter().any(|root| path.starts_with(root)) {
        return Err(ValidationError::ForbiddenPath(format!(
            "{} is outside the permitted roots",
            path.display()
        )));
    }
    Ok(path)
}

/// Validate a path whose neighbouring `.env` file may be read.
///
/// Same rules as [`validate_script_path`], and system directories stay off
/// limits even when no roots are configured.
pub fn validate_dotenv_source(path: &str, roots: &[PathBuf]) -> Result<PathBuf, ValidationError> {
    let path = validate_script_path(path, roots)?;
    if FORBIDDEN_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Err(ValidationError::ForbiddenPath(path.display().to_string()));
    }
    Ok(path)
}

fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_trimmed() {
        assert_eq!(validate_name("  Echo Bot ").unwrap(), "Echo Bot");
    }

    #[test]
    fn name_rejects_empty_and_long() {
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"a".repeat(101)).is_err());
        assert!(validate_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn name_rejects_bad_chars() {
        assert!(validate_name("bot;rm -rf").is_err());
        assert!(validate_name("my_bot-2").is_ok());
    }

    #[test]
    fn script_path_rejects_traversal() {
        let err = validate_script_path("/srv/bots/../../etc/passwd", &[]).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenPath(_)));
    }

    #[test]
    fn script_path_requires_absolute() {
        let err = validate_script_path("bots/echo.js", &[]).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(_)));
    }

    #[test]
    fn script_path_respects_roots() {
        let roots = vec![PathBuf::from("/srv/bots")];
        assert!(validate_script_path("/srv/bots/echo/index.js", &roots).is_ok());
        let err = validate_script_path("/opt/other.js", &roots).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenPath(_)));
    }

    #[test]
    fn dotenv_source_forbids_system_dirs() {
        assert!(validate_dotenv_source("/etc/app/index.js", &[]).is_err());
        assert!(validate_dotenv_source("/root/bot.js", &[]).is_err());
        assert!(validate_dotenv_source("/srv/../etc/x", &[]).is_err());
        assert!(validate_dotenv_source("/srv/bots/bot.js", &[]).is_ok());
    }

    #[test]
    fn dotenv_source_requires_absolute_path_within_roots() {
        let roots = vec![PathBuf::from("/srv/bots")];
        assert!(matches!(
            validate_dotenv_source("bot.js", &roots),
            Err(ValidationError::Invalid(_))
        ));
        assert!(matches!(
            validate_dotenv_source("/opt/app/bot.js", &roots),
            Err(ValidationError::ForbiddenPath(_))
        ));
        assert!(validate_dotenv_source("/srv/bots/echo/bot.js", &roots).is_ok());
    }
}
