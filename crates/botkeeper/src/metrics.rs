//! Bounded per-process resource samples.

use chrono::{DateTime, Duration, Utc};

use crate::model::{MetricSample, ProcessId};
use crate::store::Store;

/// Largest query window accepted from clients.
pub const MAX_WINDOW_HOURS: u32 = 168;
/// Largest row cap accepted from clients.
pub const MAX_QUERY_LIMIT: usize = 10_000;
pub const DEFAULT_WINDOW_HOURS: u32 = 1;
pub const DEFAULT_QUERY_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct MetricsStore {
    store: Store,
}

impl MetricsStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a sample. Timestamps are not checked for ordering.
    pub fn append(
        &self,
        id: &ProcessId,
        cpu: f64,
        memory: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<MetricSample> {
        self.store.append_metric(id, cpu, memory, timestamp)
    }

    /// Samples from the last `since_hours`, oldest first, capped at `limit`.
    /// `None` for an unknown process.
    pub fn query(
        &self,
        id: &ProcessId,
        since_hours: u32,
        limit: usize,
    ) -> Option<Vec<MetricSample>> {
        let since = Utc::now() - Duration::hours(i64::from(since_hours));
        self.store.metrics(id, since, limit)
    }
}
