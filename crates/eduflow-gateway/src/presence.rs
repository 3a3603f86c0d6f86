use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::bus::ConnectionId;

/// Process-wide presence: tenant -> user -> live connections.
///
/// A user is online iff their connection set is non-empty. Every
/// read-modify-write happens under one write lock, so concurrent
/// connects and disconnects for the same user cannot interleave.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<i64, HashMap<i64, HashSet<ConnectionId>>>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. Returns `true` when this is the user's first one.
    pub async fn add(&self, tenant_id: i64, user_id: i64, conn_id: ConnectionId) -> bool {
        let mut tenants = self.inner.write().await;
        let connections = tenants.entry(tenant_id).or_default().entry(user_id).or_default();
        let was_offline = connections.is_empty();
        connections.insert(conn_id);
        was_offline
    }

    /// Forget a connection. Returns `true` only when it was the user's last
    /// one; unknown connections are ignored.
    pub async fn remove(&self, tenant_id: i64, user_id: i64, conn_id: ConnectionId) -> bool {
        let mut tenants = self.inner.write().await;
        let Some(users) = tenants.get_mut(&tenant_id) else {
            return false;
        };
        let Some(connections) = users.get_mut(&user_id) else {
            return false;
        };
        if !connections.remove(&conn_id) {
            return false;
        }

        let went_offline = connections.is_empty();
        if went_offline {
            users.remove(&user_id);
            if users.is_empty() {
                tenants.remove(&tenant_id);
            }
        }
        went_offline
    }

    pub async fn is_online(&self, tenant_id: i64, user_id: i64) -> bool {
        self.inner
            .read()
            .await
            .get(&tenant_id)
            .is_some_and(|users| users.contains_key(&user_id))
    }

    /// The subset of `member_ids` currently online in `tenant_id`.
    pub async fn online_members_of(&self, member_ids: &[i64], tenant_id: i64) -> BTreeSet<i64> {
        let tenants = self.inner.read().await;
        let Some(users) = tenants.get(&tenant_id) else {
            return BTreeSet::new();
        };
        member_ids
            .iter()
            .copied()
            .filter(|id| users.contains_key(id))
            .collect()
    }

    #[cfg(test)]
    pub async fn connection_count(&self, tenant_id: i64, user_id: i64) -> usize {
        self.inner
            .read()
            .await
            .get(&tenant_id)
            .and_then(|users| users.get(&user_id))
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn multiple_devices_count_once() {
        let presence = PresenceTracker::new();
        let (phone, laptop) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(presence.add(5, 1, phone).await);
        assert!(!presence.add(5, 1, laptop).await);
        assert_eq!(presence.connection_count(5, 1).await, 2);

        assert!(!presence.remove(5, 1, phone).await);
        assert!(presence.is_online(5, 1).await);
        assert!(presence.remove(5, 1, laptop).await);
        assert!(!presence.is_online(5, 1).await);
    }

    #[tokio::test]
    async fn removing_unknown_connection_is_a_no_op() {
        let presence = PresenceTracker::new();
        let conn = Uuid::new_v4();
        assert!(!presence.remove(5, 1, conn).await);

        presence.add(5, 1, conn).await;
        assert!(presence.remove(5, 1, conn).await);
        assert!(!presence.remove(5, 1, conn).await);
    }

    #[tokio::test]
    async fn presence_is_per_tenant() {
        let presence = PresenceTracker::new();
        presence.add(5, 1, Uuid::new_v4()).await;
        presence.add(5, 2, Uuid::new_v4()).await;
        presence.add(7, 3, Uuid::new_v4()).await;

        assert!(!presence.is_online(7, 1).await);
        let online = presence.online_members_of(&[1, 2, 3, 4], 5).await;
        assert_eq!(online.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn concurrent_churn_settles_consistently() {
        let presence = PresenceTracker::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let presence = presence.clone();
            handles.push(tokio::spawn(async move {
                let conn = Uuid::new_v4();
                let first = presence.add(5, 1, conn).await;
                let last = presence.remove(5, 1, conn).await;
                (first, last)
            }));
        }

        let mut firsts = 0;
        let mut lasts = 0;
        for handle in handles {
            let (first, last) = handle.await.unwrap();
            firsts += first as usize;
            lasts += last as usize;
        }

        assert_eq!(firsts, lasts);
        assert!(firsts >= 1);
        assert!(!presence.is_online(5, 1).await);
    }
}
