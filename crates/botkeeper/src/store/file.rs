//! On-disk layout of the store.
//!
//! Each definition lives in `<dir>/<id>.json` together with its action
//! history. Writes go through a temp file, fsync and rename so a crash never
//! leaves a half-written record behind.

use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::error::{StorageError, StorageResult};
use crate::model::{ActionRecord, ProcessDefinition, ProcessId};

/// Persisted form of one process record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct RecordDocument {
    pub schema_version: String,
    pub definition: ProcessDefinition,
    #[serde(default)]
    pub history: Vec<ActionRecord>,
}

impl RecordDocument {
    pub const SCHEMA_VERSION: &'static str = "1";

    pub fn new(definition: ProcessDefinition, history: Vec<ActionRecord>) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            definition,
            history,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.schema_version == Self::SCHEMA_VERSION
    }
}

pub(super) fn record_path(dir: &Path, id: &ProcessId) -> PathBuf {
    dir.join(format!("{}.json", id))
}

/// Replace `final_path` with `data` in one step.
///
/// The bytes land in a synced sibling temp file (`<name>.<ulid>.tmp`) that is
/// then renamed over the target. A failed write or rename removes the temp
/// file again; one that survives a crash is swept by [`load_records`].
pub(super) async fn atomic_write_file(final_path: &Path, data: &[u8]) -> StorageResult<()> {
    let temp_path = temp_path_for(final_path);
    if let Err(e) = write_synced(&temp_path, data).await {
        discard(&temp_path).await;
        return Err(StorageError::file_io(&temp_path, e));
    }
    if let Err(e) = fs::rename(&temp_path, final_path).await {
        discard(&temp_path).await;
        return Err(StorageError::file_io(final_path, e));
    }
    Ok(())
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("record"));
    name.push(format!(".{}.tmp", ulid::Ulid::new()));
    final_path.with_file_name(name)
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove temp file");
    }
}

pub(super) async fn write_record(dir: &Path, doc: &RecordDocument) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(doc)?;
    atomic_write_file(&record_path(dir, &doc.definition.id), &json).await
}

/// Remove a record file. A missing file is not an error.
pub(super) async fn remove_record(dir: &Path, id: &ProcessId) -> StorageResult<()> {
    let path = record_path(dir, id);
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::file_io(&path, e)),
    }
}

/// Load every readable record from `dir`. Unreadable or incompatible files are
/// skipped with a warning; leftover temp files are removed.
pub(super) async fn load_records(dir: &Path) -> StorageResult<Vec<RecordDocument>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::file_io(dir, e)),
    };

    let mut docs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::file_io(dir, e))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".tmp") {
            let _ = fs::remove_file(&path).await;
            continue;
        }
        if !name.ends_with(".json") {
            continue;
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read process record");
                continue;
            }
        };
        match serde_json::from_str::<RecordDocument>(&content) {
            Ok(doc) if doc.is_compatible() => docs.push(doc),
            Ok(doc) => {
                warn!(path = %path.display(), schema = %doc.schema_version, "Skipping incompatible process record");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse process record");
            }
        }
    }
    Ok(docs)
}
