//! Record store for process definitions and their owned children.
//!
//! Each definition is held together with its action history and metric
//! samples in one [`ProcessRecord`], so removing a definition takes its
//! children with it in a single map operation. Records live in a sharded
//! `DashMap`; there is no store-wide lock.
//!
//! Definitions and history are persisted per record (see [`file`]). Metric
//! samples are memory-resident and bounded by [`MetricRetention`].

pub mod error;
mod file;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

pub use error::{StorageError, StorageResult};

use crate::model::{ActionKind, ActionRecord, MetricSample, ProcessDefinition, ProcessId};
use crate::sync::KeyedLocks;
use file::RecordDocument;

/// Bounds applied to each process's metric series on every append.
#[derive(Debug, Clone, Copy)]
pub struct MetricRetention {
    pub max_age: Duration,
    pub max_samples: usize,
}

impl Default for MetricRetention {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(168),
            max_samples: 10_000,
        }
    }
}

#[derive(Debug)]
struct ProcessRecord {
    definition: ProcessDefinition,
    history: Vec<ActionRecord>,
    metrics: VecDeque<MetricSample>,
}

impl ProcessRecord {
    fn document(&self) -> RecordDocument {
        RecordDocument::new(self.definition.clone(), self.history.clone())
    }
}

/// Shared handle to the record store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    dir: Option<PathBuf>,
    records: Arc<DashMap<ProcessId, ProcessRecord>>,
    supervisor_names: Arc<DashMap<String, ProcessId>>,
    write_locks: KeyedLocks,
    next_action_id: Arc<AtomicU64>,
    next_metric_id: Arc<AtomicU64>,
    retention: MetricRetention,
}

impl Store {
    /// A store that never touches disk.
    pub fn in_memory(retention: MetricRetention) -> Self {
        Self {
            dir: None,
            records: Arc::new(DashMap::new()),
            supervisor_names: Arc::new(DashMap::new()),
            write_locks: KeyedLocks::new(),
            next_action_id: Arc::new(AtomicU64::new(1)),
            next_metric_id: Arc::new(AtomicU64::new(1)),
            retention,
        }
    }

    /// Open a file-backed store rooted at `dir` and recover its records.
    pub async fn open(dir: impl Into<PathBuf>, retention: MetricRetention) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;

        let store = Self {
            dir: Some(dir),
            ..Self::in_memory(retention)
        };
        store.recover().await?;
        Ok(store)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    async fn recover(&self) -> StorageResult<usize> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(0);
        };

        let docs = file::load_records(dir).await?;
        let mut max_action_id = 0;
        let mut recovered = 0;
        for doc in docs {
            max_action_id = doc
                .history
                .iter()
                .map(|a| a.id)
                .fold(max_action_id, u64::max);
            let id = doc.definition.id.clone();
            self.supervisor_names
                .insert(doc.definition.supervisor_name.clone(), id.clone());
            self.records.insert(
                id,
                ProcessRecord {
                    definition: doc.definition,
                    history: doc.history,
                    metrics: VecDeque::new(),
                },
            );
            recovered += 1;
        }
        self.next_action_id
            .store(max_action_id + 1, Ordering::SeqCst);

        info!(recovered, dir = %dir.display(), "Recovered process records");
        Ok(recovered)
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Insert a new definition along with its first history entry.
    ///
    /// Fails with [`StorageError::Conflict`] when the supervisor name is taken.
    pub async fn insert(
        &self,
        definition: ProcessDefinition,
        first_action: ActionKind,
    ) -> StorageResult<ActionRecord> {
        let id = definition.id.clone();
        let guard = self.write_locks.get(id.as_str()).lock_owned().await;

        match self.supervisor_names.entry(definition.supervisor_name.clone()) {
            Entry::Occupied(_) => {
                drop(guard);
                self.write_locks.remove(id.as_str());
                return Err(StorageError::Conflict(definition.supervisor_name));
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }

        let action = self.new_action(&id, first_action, None);
        self.records.insert(
            id.clone(),
            ProcessRecord {
                definition,
                history: vec![action.clone()],
                metrics: VecDeque::new(),
            },
        );

        if let Err(e) = self.persist_locked(&id).await {
            // Roll back so memory never holds what disk refused.
            if let Some((_, record)) = self.records.remove(&id) {
                self.supervisor_names.remove(&record.definition.supervisor_name);
            }
            return Err(e);
        }
        Ok(action)
    }

    pub fn get(&self, id: &ProcessId) -> Option<ProcessDefinition> {
        self.records.get(id).map(|r| r.definition.clone())
    }

    pub fn get_by_supervisor_name(&self, name: &str) -> Option<ProcessDefinition> {
        let id = self.supervisor_names.get(name)?.value().clone();
        self.get(&id)
    }

    pub fn contains(&self, id: &ProcessId) -> bool {
        self.records.contains_key(id)
    }

    /// All definitions, newest first.
    pub fn list(&self) -> Vec<ProcessDefinition> {
        let mut defs: Vec<_> = self
            .records
            .iter()
            .map(|r| r.definition.clone())
            .collect();
        defs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        defs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply `apply` to the stored definition and persist it.
    ///
    /// Returns `None` when the record does not exist.
    pub async fn update<F>(
        &self,
        id: &ProcessId,
        apply: F,
    ) -> StorageResult<Option<ProcessDefinition>>
    where
        F: FnOnce(&mut ProcessDefinition),
    {
        let Some(_guard) = self.lock_existing(id).await else {
            return Ok(None);
        };

        let (previous, updated) = {
            let Some(mut record) = self.records.get_mut(id) else {
                return Ok(None);
            };
            let previous = record.definition.clone();
            apply(&mut record.definition);
            // Identity fields never change through an update.
            record.definition.id = previous.id.clone();
            record.definition.supervisor_name = previous.supervisor_name.clone();
            record.definition.created_at = previous.created_at;
            (previous, record.definition.clone())
        };

        if let Err(e) = self.persist_locked(id).await {
            if let Some(mut record) = self.records.get_mut(id) {
                record.definition = previous;
            }
            return Err(e);
        }
        Ok(Some(updated))
    }

    /// Remove a definition and everything it owns.
    ///
    /// The on-disk record goes first; the in-memory record (definition,
    /// history and samples together) is removed last as the commit point.
    pub async fn remove(&self, id: &ProcessId) -> StorageResult<Option<ProcessDefinition>> {
        let Some(guard) = self.lock_existing(id).await else {
            return Ok(None);
        };
        if let Some(dir) = self.dir.as_deref() {
            file::remove_record(dir, id).await?;
        }
        let removed = self.records.remove(id).map(|(_, record)| {
            self.supervisor_names
                .remove(&record.definition.supervisor_name);
            debug!(
                process = %id,
                actions = record.history.len(),
                samples = record.metrics.len(),
                "Removed process record"
            );
            record.definition
        });
        drop(guard);
        self.write_locks.remove(id.as_str());
        Ok(removed)
    }

    // ========================================================================
    // Action history
    // ========================================================================

    /// Append an action to a record's history and persist it.
    ///
    /// Returns `None` when the record does not exist.
    pub async fn append_action(
        &self,
        id: &ProcessId,
        kind: ActionKind,
        error_message: Option<String>,
    ) -> StorageResult<Option<ActionRecord>> {
        let Some(_guard) = self.lock_existing(id).await else {
            return Ok(None);
        };

        let action = {
            let Some(mut record) = self.records.get_mut(id) else {
                return Ok(None);
            };
            let action = self.new_action(id, kind, error_message);
            record.history.push(action.clone());
            action
        };

        if let Err(e) = self.persist_locked(id).await {
            if let Some(mut record) = self.records.get_mut(id) {
                record.history.retain(|a| a.id != action.id);
            }
            return Err(e);
        }
        Ok(Some(action))
    }

    /// Up to `limit` most recent actions, newest first.
    pub fn actions(&self, id: &ProcessId, limit: usize) -> Option<Vec<ActionRecord>> {
        let record = self.records.get(id)?;
        let mut actions: Vec<_> = record.history.clone();
        drop(record);
        actions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        actions.truncate(limit);
        Some(actions)
    }

    /// Take the write lock of an existing record. Missing records never
    /// leave a lock entry behind.
    async fn lock_existing(&self, id: &ProcessId) -> Option<OwnedMutexGuard<()>> {
        if !self.records.contains_key(id) {
            return None;
        }
        let guard = self.write_locks.get(id.as_str()).lock_owned().await;
        if self.records.contains_key(id) {
            return Some(guard);
        }
        drop(guard);
        self.write_locks.remove(id.as_str());
        None
    }

    fn new_action(
        &self,
        id: &ProcessId,
        action: ActionKind,
        error_message: Option<String>,
    ) -> ActionRecord {
        ActionRecord {
            id: self.next_action_id.fetch_add(1, Ordering::SeqCst),
            process_id: id.clone(),
            action,
            error_message,
            timestamp: Utc::now(),
        }
    }

    // ========================================================================
    // Metric samples
    // ========================================================================

    /// Append a sample and prune the series to the retention bounds.
    ///
    /// Returns `None` when the record does not exist.
    pub fn append_metric(
        &self,
        id: &ProcessId,
        cpu: f64,
        memory: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<MetricSample> {
        let mut record = self.records.get_mut(id)?;
        let sample = MetricSample {
            id: self.next_metric_id.fetch_add(1, Ordering::SeqCst),
            process_id: id.clone(),
            cpu: cpu.max(0.0),
            memory,
            timestamp,
        };
        record.metrics.push_back(sample.clone());

        let cutoff = Utc::now() - self.retention.max_age;
        while record
            .metrics
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            record.metrics.pop_front();
        }
        while record.metrics.len() > self.retention.max_samples {
            record.metrics.pop_front();
        }
        Some(sample)
    }

    /// Samples at or after `since`, ascending by time, at most `limit` of the
    /// most recent ones.
    pub fn metrics(
        &self,
        id: &ProcessId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Option<Vec<MetricSample>> {
        let record = self.records.get(id)?;
        let mut samples: Vec<_> = record
            .metrics
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect();
        drop(record);
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if samples.len() > limit {
            samples.drain(..samples.len() - limit);
        }
        Some(samples)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the current state of a record. Caller must hold its write lock.
    async fn persist_locked(&self, id: &ProcessId) -> StorageResult<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(());
        };
        let Some(doc) = self.records.get(id).map(|r| r.document()) else {
            return Ok(());
        };
        file::write_record(dir, &doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuntimeKind;
    use tempfile::TempDir;

    fn definition(name: &str, supervisor_name: &str) -> ProcessDefinition {
        let now = Utc::now();
        ProcessDefinition {
            id: ProcessId::generate(),
            name: name.to_string(),
            kind: RuntimeKind::ScriptedPy,
            script_path: PathBuf::from("/srv/bots/echo.py"),
            supervisor_name: supervisor_name.to_string(),
            env_vars: "{}".to_string(),
            auto_restart: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_records_first_action() {
        let store = Store::in_memory(MetricRetention::default());
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();

        let action = store.insert(def, ActionKind::Created).await.unwrap();
        assert_eq!(action.action, ActionKind::Created);

        let history = store.actions(&id, 50).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(store.get_by_supervisor_name("bot-echo-1").unwrap().id, id);
    }

    #[tokio::test]
    async fn duplicate_supervisor_name_conflicts() {
        let store = Store::in_memory(MetricRetention::default());
        store
            .insert(definition("A", "bot-a-1"), ActionKind::Created)
            .await
            .unwrap();

        let err = store
            .insert(definition("A again", "bot-a-1"), ActionKind::Created)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(name) if name == "bot-a-1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.write_locks.len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_identity_fields() {
        let store = Store::in_memory(MetricRetention::default());
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();

        let updated = store
            .update(&id, |d| {
                d.name = "Renamed".to_string();
                d.supervisor_name = "bot-other".to_string();
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.supervisor_name, "bot-echo-1");
    }

    #[tokio::test]
    async fn update_missing_returns_none() {
        let store = Store::in_memory(MetricRetention::default());
        let result = store.update(&ProcessId::from("nope"), |_| {}).await.unwrap();
        assert!(result.is_none());
        assert!(store.write_locks.is_empty());
    }

    #[tokio::test]
    async fn remove_takes_children_with_it() {
        let store = Store::in_memory(MetricRetention::default());
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();
        store
            .append_action(&id, ActionKind::Start, None)
            .await
            .unwrap();
        store.append_metric(&id, 1.0, 1024, Utc::now()).unwrap();

        assert!(store.remove(&id).await.unwrap().is_some());
        assert!(store.get(&id).is_none());
        assert!(store.actions(&id, 50).is_none());
        assert!(store.metrics(&id, Utc::now() - Duration::hours(1), 10).is_none());
        assert!(store.get_by_supervisor_name("bot-echo-1").is_none());
        assert!(store.remove(&id).await.unwrap().is_none());
        assert!(store.write_locks.is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = Store::in_memory(MetricRetention::default());
        let mut older = definition("Old", "bot-old-1");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = definition("New", "bot-new-1");
        store.insert(older, ActionKind::Created).await.unwrap();
        store.insert(newer, ActionKind::Created).await.unwrap();

        let names: Vec<_> = store.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["New", "Old"]);
    }

    #[tokio::test]
    async fn actions_newest_first_and_limited() {
        let store = Store::in_memory(MetricRetention::default());
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();
        store.append_action(&id, ActionKind::Start, None).await.unwrap();
        store.append_action(&id, ActionKind::Stop, None).await.unwrap();

        let history = store.actions(&id, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, ActionKind::Stop);
        assert_eq!(history[1].action, ActionKind::Start);
        assert!(history[0].id > history[1].id);
    }

    #[tokio::test]
    async fn append_action_to_missing_record_is_none() {
        let store = Store::in_memory(MetricRetention::default());
        let result = store
            .append_action(&ProcessId::from("gone"), ActionKind::Start, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.write_locks.is_empty());
    }

    #[tokio::test]
    async fn metrics_window_order_and_cap() {
        let store = Store::in_memory(MetricRetention::default());
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();

        let now = Utc::now();
        store.append_metric(&id, 1.0, 1, now - Duration::hours(3)).unwrap();
        store.append_metric(&id, 3.0, 3, now).unwrap();
        store.append_metric(&id, 2.0, 2, now - Duration::minutes(30)).unwrap();

        let samples = store.metrics(&id, now - Duration::hours(1), 100).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].timestamp <= samples[1].timestamp);
        assert_eq!(samples[0].memory, 2);

        let capped = store.metrics(&id, now - Duration::hours(24), 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].memory, 3);
    }

    #[tokio::test]
    async fn metrics_pruned_by_retention() {
        let store = Store::in_memory(MetricRetention {
            max_age: Duration::hours(1),
            max_samples: 3,
        });
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();

        let now = Utc::now();
        store.append_metric(&id, 0.0, 0, now - Duration::hours(2)).unwrap();
        for i in 1..=4 {
            store.append_metric(&id, 0.0, i, now).unwrap();
        }

        let samples = store.metrics(&id, now - Duration::hours(48), 100).unwrap();
        let memories: Vec<_> = samples.iter().map(|s| s.memory).collect();
        assert_eq!(memories, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn persists_and_recovers() {
        let temp = TempDir::new().unwrap();
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();

        {
            let store = Store::open(temp.path(), MetricRetention::default())
                .await
                .unwrap();
            store.insert(def, ActionKind::Created).await.unwrap();
            store.append_action(&id, ActionKind::Start, None).await.unwrap();
            store.append_metric(&id, 1.0, 1, Utc::now()).unwrap();
        }

        let store = Store::open(temp.path(), MetricRetention::default())
            .await
            .unwrap();
        assert_eq!(store.get(&id).unwrap().name, "Echo");
        assert_eq!(store.actions(&id, 50).unwrap().len(), 2);
        assert!(
            store
                .metrics(&id, Utc::now() - Duration::hours(1), 10)
                .unwrap()
                .is_empty()
        );

        // Action IDs keep increasing across restarts.
        let next = store
            .append_action(&id, ActionKind::Stop, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn remove_deletes_file() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path(), MetricRetention::default())
            .await
            .unwrap();
        let def = definition("Echo", "bot-echo-1");
        let id = def.id.clone();
        store.insert(def, ActionKind::Created).await.unwrap();

        let path = temp.path().join(format!("{}.json", id));
        assert!(path.exists());
        store.remove(&id).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn recover_skips_garbage_and_temp_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(temp.path().join("x.json.01abc.tmp"), "partial").unwrap();

        let store = Store::open(temp.path(), MetricRetention::default())
            .await
            .unwrap();
        assert!(store.is_empty());
        assert!(!temp.path().join("x.json.01abc.tmp").exists());
    }
}
