//! Local connections and the per-process connection registry.
//!
//! A [`Connection`] stands in for one live client connection held by this
//! process: a unique id, the ordered list of rooms it has joined, and an
//! outbound delivery handle in place of the real socket transport (which
//! lives outside this crate). The [`ConnectionRegistry`] is the local
//! lookup table; a connection id that is absent here is the signal to
//! delegate the operation to the owning process.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Channel buffer for outbound deliveries per connection.
const DELIVERY_CHANNEL_BUFFER: usize = 64;

/// A message delivered to a local connection after the say stage ran.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    /// Room the message was broadcast on.
    pub room: String,
    /// Message payload, possibly transformed by say middleware.
    pub message: Value,
}

/// One live connection held by this process.
///
/// The coordinator mutates the joined-room list only inside
/// `add_member`/`remove_member`/`destroy_room`; nothing else writes it.
pub struct Connection {
    id: String,
    rooms: RwLock<Vec<String>>,
    outbound: mpsc::Sender<DeliveredMessage>,
}

impl Connection {
    /// Create a connection with an outbound delivery channel.
    ///
    /// Returns the connection and the receiver the transport layer reads
    /// delivered messages from.
    pub fn new(id: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<DeliveredMessage>) {
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_BUFFER);
        (
            Arc::new(Self {
                id: id.into(),
                rooms: RwLock::new(Vec::new()),
                outbound: tx,
            }),
            rx,
        )
    }

    /// Unique connection id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rooms this connection has joined, in join order.
    pub async fn rooms(&self) -> Vec<String> {
        self.rooms.read().await.clone()
    }

    /// Whether the connection has joined `room`.
    pub async fn has_room(&self, room: &str) -> bool {
        self.rooms.read().await.iter().any(|r| r == room)
    }

    /// Append `room` to the joined list. Idempotent: re-checks membership
    /// under the write lock, since middleware may have mutated the list
    /// between the caller's check and this call.
    pub(crate) async fn add_room(&self, room: &str) {
        let mut rooms = self.rooms.write().await;
        if !rooms.iter().any(|r| r == room) {
            rooms.push(room.to_string());
        }
    }

    /// Remove `room` from the joined list. Returns true if it was present.
    pub(crate) async fn remove_room(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.iter().position(|r| r == room) {
            Some(idx) => {
                rooms.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Deliver a message over the connection's transport. Returns false
    /// if the transport side has gone away.
    pub(crate) async fn deliver(&self, room: &str, message: Value) -> bool {
        let delivered = self
            .outbound
            .send(DeliveredMessage {
                room: room.to_string(),
                message,
            })
            .await
            .is_ok();
        if !delivered {
            debug!(
                target: "room.connections",
                connection_id = %self.id,
                room = %room,
                "Dropping delivery to closed connection transport"
            );
        }
        delivered
    }
}

/// Process-wide registry of locally held connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Replaces any previous entry with the same id.
    pub async fn insert(&self, connection: Arc<Connection>) {
        self.inner
            .write()
            .await
            .insert(connection.id().to_string(), connection);
    }

    /// Remove a connection, returning it if it was present.
    pub async fn remove(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.inner.write().await.remove(connection_id)
    }

    /// Look up a connection by id.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.inner.read().await.get(connection_id).cloned()
    }

    /// All locally held connections currently joined to `room`.
    pub async fn local_members_of(&self, room: &str) -> Vec<Arc<Connection>> {
        let connections: Vec<Arc<Connection>> =
            self.inner.read().await.values().cloned().collect();
        let mut members = Vec::new();
        for conn in connections {
            if conn.has_room(room).await {
                members.push(conn);
            }
        }
        members
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_room_list_add_remove() {
        let (conn, _rx) = Connection::new("conn-1");

        conn.add_room("lobby").await;
        conn.add_room("ops").await;
        assert_eq!(conn.rooms().await, vec!["lobby", "ops"]);
        assert!(conn.has_room("lobby").await);

        // Idempotent append
        conn.add_room("lobby").await;
        assert_eq!(conn.rooms().await, vec!["lobby", "ops"]);

        assert!(conn.remove_room("lobby").await);
        assert!(!conn.remove_room("lobby").await);
        assert_eq!(conn.rooms().await, vec!["ops"]);
    }

    #[tokio::test]
    async fn test_deliver_reaches_transport() {
        let (conn, mut rx) = Connection::new("conn-1");

        assert!(conn.deliver("lobby", json!({"text": "hi"})).await);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.room, "lobby");
        assert_eq!(msg.message, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_deliver_to_closed_transport() {
        let (conn, rx) = Connection::new("conn-1");
        drop(rx);
        assert!(!conn.deliver("lobby", json!("gone")).await);
    }

    #[tokio::test]
    async fn test_registry_local_members_of() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = Connection::new("a");
        let (b, _rx_b) = Connection::new("b");
        let (c, _rx_c) = Connection::new("c");

        a.add_room("lobby").await;
        b.add_room("lobby").await;
        c.add_room("ops").await;

        registry.insert(Arc::clone(&a)).await;
        registry.insert(Arc::clone(&b)).await;
        registry.insert(Arc::clone(&c)).await;

        let mut ids: Vec<String> = registry
            .local_members_of("lobby")
            .await
            .iter()
            .map(|conn| conn.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        registry.remove("a").await;
        assert_eq!(registry.local_members_of("lobby").await.len(), 1);
        assert!(registry.get("a").await.is_none());
    }
}
