//! Fan-out of status snapshots to live observers.
//!
//! [`Broadcaster`] is a thin wrapper around [`tokio::sync::watch`] holding the
//! latest [`Snapshot`]:
//!
//! - [`Broadcaster::publish`] replaces the snapshot (never blocks, never waits
//!   for observers).
//! - [`Broadcaster::subscribe`] returns an [`Observer`] that sees the current
//!   snapshot immediately and then every newer one. A slow observer skips
//!   straight to the newest.
//!
//! Every observer holds a guard on the live count, so joins and leaves are
//! tracked without explicit bookkeeping by the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::model::UnifiedStatus;

/// One reconciliation result, shared by every observer.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub taken_at: DateTime<Utc>,
    pub processes: Vec<UnifiedStatus>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            tick: 0,
            taken_at: Utc::now(),
            processes: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
    observers: Arc<AtomicUsize>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            tx: Arc::new(tx),
            observers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the current snapshot and wake every observer.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> Observer {
        let count = self.observers.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(observers = count, "Observer joined");
        Observer {
            rx: self.tx.subscribe(),
            _guard: ObserverGuard {
                observers: self.observers.clone(),
            },
        }
    }

    /// Number of observers currently connected.
    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }
}

struct ObserverGuard {
    observers: Arc<AtomicUsize>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let count = self.observers.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(observers = count, "Observer left");
    }
}

/// A subscription to the broadcaster. Dropping it leaves.
pub struct Observer {
    rx: watch::Receiver<Arc<Snapshot>>,
    _guard: ObserverGuard,
}

impl Observer {
    /// The newest snapshot, marking it as seen.
    pub fn current(&mut self) -> Arc<Snapshot> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a snapshot newer than the last one seen.
    ///
    /// Returns `None` once the broadcaster is gone.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }

    /// The current snapshot followed by every newer one.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Snapshot>> + Send + 'static {
        futures::stream::unfold((self, true), |(mut observer, first)| async move {
            let next = if first {
                observer.current()
            } else {
                observer.changed().await?
            };
            Some((next, (observer, false)))
        })
    }
}
