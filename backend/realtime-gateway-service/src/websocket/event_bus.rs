//! Cross-instance event bus over a single Redis pub/sub channel.
//!
//! Every gateway process subscribes once to the shared channel and routes
//! incoming messages to the handler registered for their namespace (room).
//! If Redis cannot be reached the bus runs disabled: `publish` is a no-op and
//! the process behaves as a single instance.

use crate::error::AppResult;
use crate::metrics;
use crate::redis_client::RedisClient;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::RwLock;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[serde(rename = "user_disconnect")]
    ParticipantDisconnected,
    #[serde(rename = "user_connect")]
    ParticipantConnected,
    PositionUpdate,
    ChatMessage,
    #[serde(rename = "room_record")]
    RecordingStatus,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ParticipantDisconnected => "user_disconnect",
            EventKind::ParticipantConnected => "user_connect",
            EventKind::PositionUpdate => "position_update",
            EventKind::ChatMessage => "chat_message",
            EventKind::RecordingStatus => "room_record",
        }
    }

    /// Client frame name used when the event is re-broadcast locally.
    pub fn client_event(self) -> &'static str {
        match self {
            EventKind::ParticipantDisconnected => events::USER_DISCONNECT,
            EventKind::ParticipantConnected => events::USER_CONNECTION,
            EventKind::PositionUpdate => events::POSITION,
            EventKind::ChatMessage => events::CHAT_MESSAGE,
            EventKind::RecordingStatus => events::ROOM_RECORD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossInstanceEvent {
    pub namespace: String,
    pub event: EventKind,
    #[serde(default)]
    pub data: Value,
    /// Instance id of the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

pub type NamespaceHandler = Arc<dyn Fn(EventKind, Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    NoHandler,
    OwnOrigin,
    Malformed,
}

impl DispatchOutcome {
    fn as_str(self) -> &'static str {
        match self {
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::NoHandler => "no_handler",
            DispatchOutcome::OwnOrigin => "own_origin",
            DispatchOutcome::Malformed => "malformed",
        }
    }
}

/// Routing half of the bus, shared with the listener task.
#[derive(Clone)]
struct Router {
    instance_id: Arc<str>,
    handlers: Arc<RwLock<HashMap<String, NamespaceHandler>>>,
}

impl Router {
    async fn dispatch(&self, payload: &str) -> DispatchOutcome {
        let outcome = self.route(payload).await;
        metrics::BUS_EVENTS_RECEIVED
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    async fn route(&self, payload: &str) -> DispatchOutcome {
        let event: CrossInstanceEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable cross-instance event");
                return DispatchOutcome::Malformed;
            }
        };

        if event.origin.as_deref() == Some(&*self.instance_id) {
            return DispatchOutcome::OwnOrigin;
        }

        // Clone the handler out so the lock is not held across the await.
        let handler = self.handlers.read().get(&event.namespace).cloned();
        match handler {
            Some(handler) => {
                tracing::debug!(
                    namespace = %event.namespace,
                    event = event.event.as_str(),
                    "dispatching cross-instance event"
                );
                handler(event.event, event.data).await;
                DispatchOutcome::Delivered
            }
            None => DispatchOutcome::NoHandler,
        }
    }
}

struct Listener {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    channel: String,
    publisher: Option<RedisClient>,
    router: Router,
    listener: Mutex<Option<Listener>>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// A bus that publishes nothing and receives nothing.
    pub fn disabled(instance_id: impl Into<String>) -> Self {
        Self::build(None, String::new(), instance_id.into())
    }

    fn build(publisher: Option<RedisClient>, channel: String, instance_id: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                publisher,
                router: Router {
                    instance_id: Arc::from(instance_id),
                    handlers: Arc::new(RwLock::new(HashMap::new())),
                },
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribes to `channel` and starts the listener loop.
    ///
    /// Never fails: without Redis, or when the subscription cannot be set up,
    /// the bus comes up disabled.
    pub async fn connect(redis: Option<RedisClient>, channel: &str, instance_id: &str) -> Self {
        let Some(client) = redis else {
            tracing::warn!("event bus disabled: no Redis connection, running single-instance");
            return Self::disabled(instance_id);
        };

        let mut pubsub = match client.pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::warn!(error = %e, "event bus disabled: pub/sub connection failed");
                return Self::disabled(instance_id);
            }
        };
        if let Err(e) = pubsub.subscribe(channel).await {
            tracing::warn!(error = %e, channel, "event bus disabled: subscribe failed");
            return Self::disabled(instance_id);
        }

        let bus = Self::build(Some(client), channel.to_string(), instance_id.to_string());
        let router = bus.inner.router.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(pubsub.on_message());
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            tracing::warn!("event bus subscription ended");
                            break;
                        };
                        match msg.get_payload::<String>() {
                            Ok(payload) => {
                                router.dispatch(&payload).await;
                            }
                            Err(e) => tracing::error!(error = ?e, "failed to read event bus payload"),
                        }
                    }
                }
            }
            tracing::info!("event bus listener stopped");
        });

        *bus.inner.listener.lock().await = Some(Listener { shutdown_tx, handle });
        tracing::info!(channel, instance_id, "event bus subscribed");
        bus
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.publisher.is_some()
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.router.instance_id
    }

    /// Publishes to every instance. A disabled bus accepts and drops the event.
    pub async fn publish(&self, namespace: &str, kind: EventKind, data: Value) -> AppResult<()> {
        let Some(client) = &self.inner.publisher else {
            tracing::trace!(namespace, event = kind.as_str(), "event bus disabled, publish skipped");
            return Ok(());
        };

        let event = CrossInstanceEvent {
            namespace: namespace.to_string(),
            event: kind,
            data,
            origin: Some(self.instance_id().to_string()),
        };
        let payload = serde_json::to_string(&event)?;

        let mut conn = client.get_multiplexed_async_connection().await?;
        let receivers: i64 = conn.publish(&self.inner.channel, payload).await?;
        metrics::BUS_EVENTS_PUBLISHED
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::debug!(namespace, event = kind.as_str(), receivers, "cross-instance event published");
        Ok(())
    }

    /// Registers the handler for `namespace`. Returns `false` if one was already registered.
    pub fn register_handler(&self, namespace: &str, handler: NamespaceHandler) -> bool {
        let mut handlers = self.inner.router.handlers.write();
        if handlers.contains_key(namespace) {
            return false;
        }
        handlers.insert(namespace.to_string(), handler);
        true
    }

    pub fn handler_count(&self) -> usize {
        self.inner.router.handlers.read().len()
    }

    /// Routes one wire message as the listener would.
    pub async fn dispatch(&self, payload: &str) -> DispatchOutcome {
        self.inner.router.dispatch(payload).await
    }

    /// Stops the listener, waits for it to exit, then drops all handlers.
    pub async fn stop(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(Listener { shutdown_tx, handle }) = listener {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "event bus listener panicked");
            }
        }
        self.inner.router.handlers.write().clear();
    }
}
