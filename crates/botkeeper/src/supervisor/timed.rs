//! Per-call timeout decorator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{StartHandle, StartSpec, Supervisor, SupervisorError, SupervisorProcess};

/// Bounds every call to the wrapped supervisor. A call that exceeds the
/// budget fails with [`SupervisorError::Timeout`].
pub struct TimedSupervisor {
    inner: Arc<dyn Supervisor>,
    timeout: Duration,
}

impl TimedSupervisor {
    pub fn new(inner: Arc<dyn Supervisor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, SupervisorError>>,
    ) -> Result<T, SupervisorError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, supervisor = self.inner.kind(), timeout_secs = self.timeout.as_secs(), "Supervisor call timed out");
                Err(SupervisorError::Timeout {
                    op,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl Supervisor for TimedSupervisor {
    async fn start(&self, spec: &StartSpec) -> Result<StartHandle, SupervisorError> {
        self.bounded("start", self.inner.start(spec)).await
    }

    async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        self.bounded("stop", self.inner.stop(name)).await
    }

    async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.bounded("restart", self.inner.restart(name)).await
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.bounded("delete", self.inner.delete(name)).await
    }

    async fn describe(&self, name: &str) -> Result<SupervisorProcess, SupervisorError> {
        self.bounded("describe", self.inner.describe(name)).await
    }

    async fn list(&self) -> Result<Vec<SupervisorProcess>, SupervisorError> {
        self.bounded("list", self.inner.list()).await
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}
