//! Realtime hub: room channels, connection lifecycle and local broadcast.
//!
//! Local events go straight to co-located connections and are published on
//! the event bus; the bus handler registered per room re-broadcasts events
//! that originated on other instances.

use super::event_bus::{EventBus, EventKind, NamespaceHandler};
use super::events::{self, encode_frame};
use super::session_store::{SessionRecord, SessionStore};
use super::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
use crate::error::AppResult;
use crate::metrics;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

struct SweepTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct HubInner {
    registry: ConnectionRegistry,
    sessions: SessionStore,
    bus: EventBus,
    sweep: Mutex<Option<SweepTask>>,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

fn session_record(connection: &Connection) -> SessionRecord {
    SessionRecord {
        connection_id: connection.id.to_string(),
        room: connection.room.clone(),
        identity: connection.identity.clone(),
        display_name: connection.display_name.clone(),
        role: connection.role.clone(),
        created_at: connection.created_at,
    }
}

impl Hub {
    pub fn new(sessions: SessionStore, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: ConnectionRegistry::new(),
                sessions,
                bus,
                sweep: Mutex::new(None),
            }),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Creates the room channel and its bus handler on first use.
    ///
    /// Returns `true` only for the call that created the channel; later calls
    /// register nothing.
    pub async fn ensure_room_channel(&self, room: &str) -> bool {
        if !self.inner.registry.ensure_room(room).await {
            return false;
        }

        let registry = self.inner.registry.clone();
        let namespace = room.to_string();
        let handler: NamespaceHandler = Arc::new(move |kind: EventKind, data: Value| -> BoxFuture<'static, ()> {
            let registry = registry.clone();
            let room = namespace.clone();
            async move {
                match encode_frame(kind.client_event(), &data) {
                    Ok(frame) => {
                        registry.broadcast(&room, &frame).await;
                    }
                    Err(e) => tracing::warn!(room = %room, error = %e, "failed to encode bus event"),
                }
            }
            .boxed()
        });

        if !self.inner.bus.register_handler(room, handler) {
            tracing::warn!(room, "bus handler already present for new room channel");
        }
        tracing::info!(room, "room channel initialized");
        true
    }

    /// Registers a connection, records its session and announces it to the room.
    ///
    /// Returns the receiver the transport drains to deliver frames.
    pub async fn join_room(&self, connection: Connection) -> AppResult<UnboundedReceiver<String>> {
        let room = connection.room.clone();
        self.ensure_room_channel(&room).await;

        let sessions = &self.inner.sessions;
        sessions
            .put(
                &room,
                &connection.identity,
                &session_record(&connection),
                Some(sessions.default_ttl()),
            )
            .await?;

        let id = connection.id;
        let payload = json!({
            "identity": connection.identity,
            "userName": connection.display_name,
            "role": connection.role,
            "status": "connect",
        });
        let rx = self.inner.registry.register(connection).await;
        metrics::ACTIVE_CONNECTIONS.inc();

        self.send_to(id, events::LOG, &json!({"message": "connection success"}))
            .await?;
        self.broadcast_and_publish(&room, EventKind::ParticipantConnected, payload)
            .await?;

        tracing::info!(room = %room, connection_id = %id, "connection joined room");
        Ok(rx)
    }

    /// Removes a connection. Safe to call repeatedly: only the first call
    /// broadcasts the departure; later calls return `Ok(false)`.
    pub async fn leave_room(&self, id: ConnectionId) -> AppResult<bool> {
        let Some(connection) = self.inner.registry.unregister(id).await else {
            return Ok(false);
        };
        metrics::ACTIVE_CONNECTIONS.dec();

        let payload = json!({
            "identity": connection.identity,
            "userName": connection.display_name,
            "status": "disconnect",
        });
        self.broadcast_and_publish(&connection.room, EventKind::ParticipantDisconnected, payload)
            .await?;

        // A reconnect under the same identity may already own the record.
        let sessions = &self.inner.sessions;
        let current = sessions.get(&connection.room, &connection.identity).await?;
        if current.is_some_and(|record| record.connection_id == id.to_string()) {
            sessions.delete(&connection.room, &connection.identity).await?;
        }

        tracing::info!(room = %connection.room, connection_id = %id, "connection left room");
        Ok(true)
    }

    /// Delivers to local members of `room` only. Returns how many received it.
    pub async fn broadcast(&self, room: &str, event: &str, payload: &Value) -> AppResult<usize> {
        let frame = encode_frame(event, payload)?;
        Ok(self.inner.registry.broadcast(room, &frame).await)
    }

    /// Local broadcast plus publication to the other instances.
    ///
    /// Bus failures are logged and do not fail the call; local delivery has
    /// already happened.
    pub async fn broadcast_and_publish(&self, room: &str, kind: EventKind, payload: Value) -> AppResult<usize> {
        let delivered = self.broadcast(room, kind.client_event(), &payload).await?;
        if let Err(e) = self.inner.bus.publish(room, kind, payload).await {
            tracing::warn!(room, event = kind.as_str(), error = %e, "cross-instance publish failed");
        }
        Ok(delivered)
    }

    pub async fn send_to(&self, id: ConnectionId, event: &str, payload: &Value) -> AppResult<bool> {
        let frame = encode_frame(event, payload)?;
        Ok(self.inner.registry.send_to(id, frame).await)
    }

    /// Renames a connection and refreshes its session record.
    pub async fn update_display_name(&self, id: ConnectionId, display_name: &str) -> AppResult<Option<Connection>> {
        let Some(connection) = self.inner.registry.update_display_name(id, display_name).await else {
            return Ok(None);
        };
        let sessions = &self.inner.sessions;
        sessions
            .put(
                &connection.room,
                &connection.identity,
                &session_record(&connection),
                Some(sessions.default_ttl()),
            )
            .await?;
        Ok(Some(connection))
    }

    pub async fn mark_idle(&self, room: &str, identity: &str) -> usize {
        self.inner
            .registry
            .set_state_for_identity(room, identity, ConnectionState::Idle)
            .await
    }

    pub async fn mark_active(&self, room: &str, identity: &str) -> usize {
        self.inner
            .registry
            .set_state_for_identity(room, identity, ConnectionState::Active)
            .await
    }

    /// Moves a single connection to `Active` on client traffic.
    pub async fn touch(&self, id: ConnectionId) -> bool {
        self.inner.registry.set_state(id, ConnectionState::Active).await
    }

    pub async fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.registry.connection(id).await
    }

    pub async fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.inner.registry.state(id).await
    }

    pub async fn room_members(&self, room: &str) -> Vec<Connection> {
        self.inner.registry.members(room).await
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.connection_count().await
    }

    pub async fn initialized_rooms(&self) -> Vec<String> {
        self.inner.registry.initialized_rooms().await
    }

    /// Presence across all instances, as recorded in the session store.
    pub async fn list_sessions(&self, room: &str) -> AppResult<Vec<SessionRecord>> {
        self.inner.sessions.list_by_room(room).await
    }

    /// Starts the periodic session TTL sweep. A second call is a no-op.
    pub async fn start_session_sweep(&self, interval: Duration) {
        let mut slot = self.inner.sweep.lock().await;
        if slot.is_some() {
            return;
        }

        let sessions = self.inner.sessions.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sessions.sweep().await {
                            tracing::warn!(error = %e, "session sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("session sweep stopped");
        });

        *slot = Some(SweepTask { shutdown_tx, handle });
        tracing::info!(interval_secs = interval.as_secs(), "session sweep started");
    }

    /// Stops the sweep task and waits for it.
    pub async fn stop(&self) {
        let task = self.inner.sweep.lock().await.take();
        if let Some(SweepTask { shutdown_tx, handle }) = task {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "session sweep task panicked");
            }
        }
    }
}
