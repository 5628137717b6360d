use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

use crate::presence::{ConnectionId, PresenceRegistry};

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Manages all connected clients, conversation rooms and event fan-out.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Live connections: conn_id -> (user_id, outbound channel)
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,

    /// Rooms: conversation_id -> member connections.
    /// Lock order: `rooms` before `connections`.
    rooms: RwLock<HashMap<Uuid, HashSet<ConnectionId>>>,

    presence: PresenceRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                presence: PresenceRegistry::new(),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Register an outbound channel for a new connection. Returns (conn_id, receiver).
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, ConnectionEntry { user_id, tx });
        (conn_id, rx)
    }

    /// Drop a connection and remove it from every room. Returns the rooms it was in.
    pub async fn unregister_connection(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        let mut left = Vec::new();
        {
            let mut rooms = self.inner.rooms.write().await;
            rooms.retain(|&conversation_id, members| {
                if members.remove(&conn_id) {
                    left.push(conversation_id);
                }
                !members.is_empty()
            });
        }

        self.inner.connections.write().await.remove(&conn_id);
        left
    }

    /// Live connections belonging to `user_id`, superseded ones included.
    pub async fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.inner
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(conn_id, _)| *conn_id)
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Add a connection to a conversation room. Returns false if it was already there.
    pub async fn join_room(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner
            .rooms
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(conn_id)
    }

    /// Remove a connection from a room. Empty rooms are dropped.
    pub async fn leave_room(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(members) = rooms.get_mut(&conversation_id) else {
            return false;
        };
        let removed = members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&conversation_id);
        }
        removed
    }

    pub async fn in_room(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Broadcast an event to every connected client.
    pub async fn broadcast(&self, event: GatewayEvent) -> usize {
        self.fan_out(None, None, event).await
    }

    /// Broadcast to every connected client except `except`.
    pub async fn broadcast_except(&self, except: ConnectionId, event: GatewayEvent) -> usize {
        self.fan_out(None, Some(except), event).await
    }

    /// Broadcast to every member of a conversation room.
    pub async fn broadcast_room(&self, conversation_id: Uuid, event: GatewayEvent) -> usize {
        self.fan_out(Some(conversation_id), None, event).await
    }

    /// Broadcast to every member of a room except `except`.
    pub async fn broadcast_room_except(
        &self,
        conversation_id: Uuid,
        except: ConnectionId,
        event: GatewayEvent,
    ) -> usize {
        self.fan_out(Some(conversation_id), Some(except), event).await
    }

    async fn fan_out(
        &self,
        room: Option<Uuid>,
        except: Option<ConnectionId>,
        event: GatewayEvent,
    ) -> usize {
        let targets: Option<HashSet<ConnectionId>> = match room {
            Some(conversation_id) => {
                let rooms = self.inner.rooms.read().await;
                match rooms.get(&conversation_id) {
                    Some(members) => Some(members.clone()),
                    None => return 0,
                }
            }
            None => None,
        };

        let connections = self.inner.connections.read().await;
        let mut delivered = 0;
        for (conn_id, entry) in connections.iter() {
            if Some(*conn_id) == except {
                continue;
            }
            if let Some(targets) = &targets {
                if !targets.contains(conn_id) {
                    continue;
                }
            }
            // A closed receiver means the connection is tearing down.
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
