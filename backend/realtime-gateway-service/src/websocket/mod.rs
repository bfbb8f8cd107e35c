use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod event_bus;
pub mod events;
pub mod handlers;
pub mod hub;
pub mod session_store;

pub use event_bus::{CrossInstanceEvent, DispatchOutcome, EventBus, EventKind};
pub use hub::Hub;
pub use session_store::{SessionRecord, SessionStore};

/// Unique identifier for one realtime transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub room: String,
    pub identity: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(room: impl Into<String>, identity: impl Into<String>, display_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            room: room.into(),
            identity: identity.into(),
            display_name: display_name.into(),
            role: role.into(),
            created_at: Utc::now(),
        }
    }
}

/// Connection lifecycle. `Idle` is a soft flag set by the inactivity timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Joined,
    Active,
    Idle,
    Disconnected,
}

struct Member {
    connection: Connection,
    sender: UnboundedSender<String>,
    state: ConnectionState,
}

/// Broadcast group for one room. Created once, never removed.
#[derive(Default)]
struct RoomChannel {
    members: HashMap<ConnectionId, Member>,
}

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<String, RoomChannel>,
    // connection -> room
    index: HashMap<ConnectionId, String>,
}

/// Local room membership.
///
/// Broadcasts take the read lock so they never block each other;
/// registration, removal and room creation take the write lock.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the room channel if needed. Returns `true` only for the call that created it.
    pub async fn ensure_room(&self, room: &str) -> bool {
        let mut guard = self.inner.write().await;
        if guard.rooms.contains_key(room) {
            return false;
        }
        guard.rooms.insert(room.to_string(), RoomChannel::default());
        tracing::debug!(room, "room channel created");
        true
    }

    pub async fn is_initialized(&self, room: &str) -> bool {
        self.inner.read().await.rooms.contains_key(room)
    }

    pub async fn initialized_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.inner.read().await.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Adds a connection to its room's broadcast group.
    ///
    /// Returns the receiver the transport drains to deliver frames to the client.
    pub async fn register(&self, connection: Connection) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        let id = connection.id;
        let room = connection.room.clone();

        guard.index.insert(id, room.clone());
        let channel = guard.rooms.entry(room.clone()).or_default();
        channel.members.insert(
            id,
            Member {
                connection,
                sender: tx,
                state: ConnectionState::Joined,
            },
        );

        tracing::debug!(
            room = %room,
            connection_id = %id,
            members = channel.members.len(),
            "connection registered"
        );
        rx
    }

    /// Removes a connection. `None` if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let mut guard = self.inner.write().await;
        let room = guard.index.remove(&id)?;
        let member = guard.rooms.get_mut(&room)?.members.remove(&id)?;
        Some(member.connection)
    }

    /// Sends `frame` to every local member of `room`, in call order per member.
    ///
    /// Members whose receiver is gone are skipped but stay registered; only
    /// `unregister` removes them, so the departure is still announced.
    pub async fn broadcast(&self, room: &str, frame: &str) -> usize {
        let guard = self.inner.read().await;
        let Some(channel) = guard.rooms.get(room) else {
            return 0;
        };
        let delivered = channel
            .members
            .values()
            .filter(|m| m.sender.send(frame.to_string()).is_ok())
            .count();
        let skipped = channel.members.len() - delivered;
        if skipped > 0 {
            tracing::debug!(room, skipped, "skipped members with closed transport");
        }
        delivered
    }

    pub async fn send_to(&self, id: ConnectionId, frame: String) -> bool {
        let guard = self.inner.read().await;
        guard
            .index
            .get(&id)
            .and_then(|room| guard.rooms.get(room))
            .and_then(|channel| channel.members.get(&id))
            .map(|m| m.sender.send(frame).is_ok())
            .unwrap_or(false)
    }

    pub async fn connection(&self, id: ConnectionId) -> Option<Connection> {
        let guard = self.inner.read().await;
        let room = guard.index.get(&id)?;
        guard
            .rooms
            .get(room)?
            .members
            .get(&id)
            .map(|m| m.connection.clone())
    }

    pub async fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        let guard = self.inner.read().await;
        let room = guard.index.get(&id)?;
        guard.rooms.get(room)?.members.get(&id).map(|m| m.state)
    }

    /// Sets the state of every local connection of `identity` in `room`. Returns how many changed.
    pub async fn set_state_for_identity(&self, room: &str, identity: &str, state: ConnectionState) -> usize {
        let mut guard = self.inner.write().await;
        let Some(channel) = guard.rooms.get_mut(room) else {
            return 0;
        };
        let mut changed = 0;
        for member in channel.members.values_mut() {
            if member.connection.identity == identity && member.state != state {
                member.state = state;
                changed += 1;
            }
        }
        changed
    }

    pub async fn set_state(&self, id: ConnectionId, state: ConnectionState) -> bool {
        let mut guard = self.inner.write().await;
        let Some(room) = guard.index.get(&id).cloned() else {
            return false;
        };
        match guard.rooms.get_mut(&room).and_then(|c| c.members.get_mut(&id)) {
            Some(member) => {
                member.state = state;
                true
            }
            None => false,
        }
    }

    pub async fn update_display_name(&self, id: ConnectionId, display_name: &str) -> Option<Connection> {
        let mut guard = self.inner.write().await;
        let room = guard.index.get(&id)?.clone();
        let member = guard.rooms.get_mut(&room)?.members.get_mut(&id)?;
        member.connection.display_name = display_name.to_string();
        Some(member.connection.clone())
    }

    pub async fn members(&self, room: &str) -> Vec<Connection> {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(room)
            .map(|c| c.members.values().map(|m| m.connection.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room: &str) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(room).map(|c| c.members.len()).unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_room_is_idempotent() {
        let registry = ConnectionRegistry::new();
        assert!(registry.ensure_room("r1").await);
        assert!(!registry.ensure_room("r1").await);
        assert!(!registry.ensure_room("r1").await);
        assert_eq!(registry.initialized_rooms().await, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members_in_order() {
        let registry = ConnectionRegistry::new();
        registry.ensure_room("r1").await;
        let mut rx = registry.register(Connection::new("r1", "alice", "Alice", "user")).await;

        assert_eq!(registry.broadcast("r1", "one").await, 1);
        assert_eq!(registry.broadcast("r1", "two").await, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_receivers_without_removing_them() {
        let registry = ConnectionRegistry::new();
        let alice = Connection::new("r1", "alice", "Alice", "user");
        let alice_id = alice.id;
        let rx = registry.register(alice).await;
        let _rx2 = registry.register(Connection::new("r1", "bob", "Bob", "user")).await;
        drop(rx);

        assert_eq!(registry.broadcast("r1", "hello").await, 1);
        assert_eq!(registry.member_count("r1").await, 2);
        assert!(registry.unregister(alice_id).await.is_some());
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_twice_returns_none() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new("r1", "alice", "Alice", "user");
        let id = conn.id;
        let _rx = registry.register(conn).await;

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());
        // the channel survives its last member
        assert!(registry.is_initialized("r1").await);
    }

    #[tokio::test]
    async fn test_state_transitions_by_identity() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new("r1", "alice", "Alice", "user");
        let id = conn.id;
        let _rx = registry.register(conn).await;

        assert_eq!(registry.state(id).await, Some(ConnectionState::Joined));
        assert_eq!(registry.set_state_for_identity("r1", "alice", ConnectionState::Idle).await, 1);
        assert_eq!(registry.state(id).await, Some(ConnectionState::Idle));
        assert_eq!(registry.set_state_for_identity("r1", "alice", ConnectionState::Idle).await, 0);
    }
}
