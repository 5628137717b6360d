use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Identifies one live WebSocket connection.
pub type ConnectionId = Uuid;

/// Who is currently reachable: user id -> the one connection speaking for them.
///
/// Only the gateway's own handlers mutate this. A reconnect overwrites the
/// previous entry; a disconnect only removes the entry if it still belongs
/// to the disconnecting connection, so a stale close cannot evict a newer
/// session.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<Uuid, ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `conn_id` the active connection for `user_id`.
    /// Returns the connection it superseded, if any.
    pub async fn register(&self, user_id: Uuid, conn_id: ConnectionId) -> Option<ConnectionId> {
        self.entries.write().await.insert(user_id, conn_id)
    }

    /// Remove the entry for `user_id`, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(current) if *current == conn_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn connection_for(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.entries.read().await.get(&user_id).copied()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Teardown: empty the registry and return who was online.
    pub async fn drain(&self) -> Vec<Uuid> {
        self.entries.write().await.drain().map(|(user_id, _)| user_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_overwrites_entry() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(registry.register(user, first).await, None);
        assert_eq!(registry.register(user, second).await, Some(first));

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.connection_for(user).await, Some(second));
    }

    #[tokio::test]
    async fn stale_disconnect_keeps_newer_entry() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        registry.register(user, stale).await;
        registry.register(user, fresh).await;

        assert!(!registry.unregister(user, stale).await);
        assert!(registry.is_online(user).await);

        assert!(registry.unregister(user, fresh).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = PresenceRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(a, Uuid::new_v4()).await;
        registry.register(b, Uuid::new_v4()).await;

        let mut drained = registry.drain().await;
        drained.sort();
        let mut expected = vec![a, b];
        expected.sort();

        assert_eq!(drained, expected);
        assert!(registry.is_empty().await);
    }
}
