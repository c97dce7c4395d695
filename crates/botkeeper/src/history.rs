//! Append-only lifecycle history.

use tracing::error;

use crate::model::{ActionKind, ActionRecord, ProcessId};
use crate::store::Store;

/// Rows returned when the caller gives no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ActionLog {
    store: Store,
}

impl ActionLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an action. Failures are logged and never surface to the caller.
    pub async fn append(
        &self,
        id: &ProcessId,
        kind: ActionKind,
        error_message: Option<String>,
    ) -> Option<ActionRecord> {
        match self.store.append_action(id, kind, error_message).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                error!(process = %id, action = %kind, "Cannot record action for unknown process");
                None
            }
            Err(e) => {
                error!(process = %id, action = %kind, error = %e, "Failed to record action");
                None
            }
        }
    }

    /// Up to `limit` most recent actions, newest first. `None` for an unknown process.
    pub fn query(&self, id: &ProcessId, limit: usize) -> Option<Vec<ActionRecord>> {
        self.store.actions(id, limit)
    }
}
