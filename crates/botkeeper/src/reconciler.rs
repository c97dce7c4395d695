//! Periodic status reconciliation.
//!
//! Each tick reads every definition, performs one supervisor poll round, and
//! merges the two into [`UnifiedStatus`] rows. Online processes get a metric
//! sample; the merged list is published through the [`Broadcaster`].
//!
//! The merge is stateless: nothing is carried between ticks except the tick
//! counter, so drift between the registry and the supervisor is simply
//! reported as it is observed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Snapshot};
use crate::metrics::MetricsStore;
use crate::model::{ProcessDefinition, UnifiedStatus};
use crate::registry::ProcessRegistry;
use crate::supervisor::{Supervisor, SupervisorError, SupervisorProcess};

/// Attach live state to each definition. Definitions without a supervisor
/// record are reported offline.
pub fn merge_status(
    definitions: Vec<ProcessDefinition>,
    processes: &[SupervisorProcess],
) -> Vec<UnifiedStatus> {
    let by_name: HashMap<&str, &SupervisorProcess> =
        processes.iter().map(|p| (p.name.as_str(), p)).collect();

    definitions
        .into_iter()
        .map(|def| {
            let live = by_name
                .get(def.supervisor_name.as_str())
                .map(|p| p.live_state());
            UnifiedStatus::new(def, live)
        })
        .collect()
}

pub struct StatusReconciler {
    registry: ProcessRegistry,
    supervisor: Arc<dyn Supervisor>,
    metrics: MetricsStore,
    broadcaster: Broadcaster,
    interval: Duration,
    ticks: AtomicU64,
}

impl StatusReconciler {
    pub fn new(
        registry: ProcessRegistry,
        supervisor: Arc<dyn Supervisor>,
        metrics: MetricsStore,
        broadcaster: Broadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            supervisor,
            metrics,
            broadcaster,
            interval,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One poll round merged with the current definitions, newest first.
    pub async fn poll(&self) -> Result<Vec<UnifiedStatus>, SupervisorError> {
        let processes = self.supervisor.list().await?;
        Ok(merge_status(self.registry.list(), &processes))
    }

    /// Run one reconciliation tick: poll, sample, publish.
    pub async fn tick(&self) -> Result<Arc<Snapshot>, SupervisorError> {
        let processes = self.poll().await?;
        let now = Utc::now();

        let mut sampled = 0usize;
        for status in processes.iter().filter(|s| s.is_online()) {
            let id = &status.definition.id;
            match self
                .metrics
                .append(id, status.live.cpu, status.live.memory, now)
            {
                Some(_) => sampled += 1,
                // Deleted between the poll and the sample.
                None => debug!(process = %id, "Skipping sample for removed process"),
            }
        }

        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = self.broadcaster.publish(Snapshot {
            tick,
            taken_at: now,
            processes,
        });
        debug!(
            tick,
            processes = snapshot.processes.len(),
            sampled,
            observers = self.broadcaster.observer_count(),
            "Reconciliation tick"
        );
        Ok(snapshot)
    }

    /// Tick on the configured interval until `cancel` fires. A failed tick is
    /// logged and retried on the next one.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Status reconciler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, supervisor = self.supervisor.kind(), "Reconciliation tick failed");
                    }
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }

        info!("Status reconciler stopped");
    }
}

/// Spawn the reconciler loop. Returns its handle for shutdown.
pub fn spawn_reconciler(
    reconciler: Arc<StatusReconciler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(reconciler.run(cancel))
}
