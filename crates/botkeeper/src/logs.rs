//! Pass-through reads of supervisor-managed log files.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

/// Largest tail accepted from clients.
pub const MAX_TAIL_LINES: usize = 1000;
pub const DEFAULT_TAIL_LINES: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogTail {
    pub stdout: String,
    pub stderr: String,
}

/// The last `lines` lines of `content`.
///
/// A trailing newline does not count as an extra empty line.
pub fn last_lines(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Tail one log file. A missing path or missing file yields an empty string.
pub async fn tail_file(path: Option<&Path>, lines: usize) -> std::io::Result<String> {
    let Some(path) = path else {
        return Ok(String::new());
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(last_lines(&String::from_utf8_lossy(&bytes), lines)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

pub async fn tail_pair(
    out: Option<&Path>,
    err: Option<&Path>,
    lines: usize,
) -> std::io::Result<LogTail> {
    let (stdout, stderr) = tokio::try_join!(tail_file(out, lines), tail_file(err, lines))?;
    Ok(LogTail { stdout, stderr })
}
