use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;
use uuid::Uuid;

use eduflow_db::Database;

use crate::bus::{ConnectionId, Envelope, Inbox, LocalBus, MessageBus};
use crate::presence::PresenceTracker;

/// Shared state for every gateway connection: storage, the group bus and
/// the presence table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    bus: Arc<dyn MessageBus>,
    presence: PresenceTracker,
}

impl Dispatcher {
    /// Single-process dispatcher backed by an in-memory bus.
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_bus(db, Arc::new(LocalBus::new()))
    }

    pub fn with_bus(db: Arc<Database>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                bus,
                presence: PresenceTracker::new(),
            }),
        }
    }

    pub fn new_connection_id() -> ConnectionId {
        Uuid::new_v4()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn join(&self, group: &str, conn_id: ConnectionId, inbox: Inbox) {
        self.inner.bus.subscribe(group, conn_id, inbox);
    }

    pub fn leave(&self, group: &str, conn_id: ConnectionId) {
        self.inner.bus.unsubscribe(group, conn_id);
    }

    pub fn publish(&self, group: &str, envelope: Envelope) -> usize {
        self.inner.bus.publish(group, envelope)
    }

    /// Run a storage call off the async runtime.
    pub async fn storage<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("storage task failed: {}", e)
            })?
    }
}
