use super::event_bus::EventKind;
use super::events::{self, ClientEvent};
use super::hub::Hub;
use super::ConnectionId;
use crate::error::AppResult;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

/// Per-connection worker: handles inbound events strictly in arrival order
/// and leaves the room once the transport drops its sender.
pub async fn run_connection(hub: Hub, connection_id: ConnectionId, room: String, mut inbound: UnboundedReceiver<ClientEvent>) {
    while let Some(event) = inbound.recv().await {
        if let Err(e) = handle_client_event(&hub, connection_id, &room, event).await {
            tracing::error!(connection_id = %connection_id, room = %room, error = %e, "failed to handle websocket event");
        }
    }
    if let Err(e) = hub.leave_room(connection_id).await {
        tracing::error!(connection_id = %connection_id, room = %room, error = %e, "failed to leave room");
    }
}

/// Handles one inbound client event for `connection_id` in `room`.
pub async fn handle_client_event(hub: &Hub, connection_id: ConnectionId, room: &str, event: ClientEvent) -> AppResult<()> {
    hub.touch(connection_id).await;

    match event {
        ClientEvent::ChatMessage(mut data) => {
            if let Value::Object(map) = &mut data {
                map.insert(
                    "dtmcreated".to_string(),
                    json!(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
                );
            }
            hub.broadcast_and_publish(room, EventKind::ChatMessage, data).await?;
        }
        ClientEvent::Position(data) => {
            hub.broadcast_and_publish(room, EventKind::PositionUpdate, data).await?;
        }
        ClientEvent::UserPosition(data) => {
            hub.broadcast(room, events::USER_POSITION, &data).await?;
        }
        ClientEvent::UpdateUsername(data) => {
            let name = data
                .get("userName")
                .or_else(|| data.get("name"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty());
            if let Some(name) = name {
                hub.update_display_name(connection_id, name).await?;
            }
            hub.broadcast(room, events::UPDATE_USERNAME, &data).await?;
        }
        ClientEvent::Relay { event, data } => {
            hub.broadcast(room, event, &data).await?;
        }
        ClientEvent::RoomRecord(data) => {
            let status = data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("recording")
                .to_string();
            let payload = json!({ "status": status, "room": room });
            hub.broadcast_and_publish(room, EventKind::RecordingStatus, payload).await?;
        }
        ClientEvent::Ping => {
            hub.send_to(connection_id, events::PONG, &json!({})).await?;
        }
        ClientEvent::Unknown(name) => {
            tracing::debug!(room, connection_id = %connection_id, event = %name, "ignoring unknown client event");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::events::ClientFrame;
    use crate::websocket::{Connection, ConnectionState, EventBus, SessionStore};
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    async fn joined(hub: &Hub, identity: &str) -> (ConnectionId, UnboundedReceiver<String>) {
        let conn = Connection::new("r1", identity, identity.to_uppercase(), "user");
        let id = conn.id;
        let mut rx = hub.join_room(conn).await.unwrap();
        while rx.try_recv().is_ok() {}
        (id, rx)
    }

    fn next(rx: &mut UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    fn hub() -> Hub {
        Hub::new(SessionStore::memory(Duration::from_secs(60)), EventBus::disabled("gw-test"))
    }

    async fn send(hub: &Hub, id: ConnectionId, text: &str) {
        let event = ClientFrame::parse(text).unwrap().into_event();
        handle_client_event(hub, id, "r1", event).await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_message_is_stamped() {
        let hub = hub();
        let (alice, _alice_rx) = joined(&hub, "alice").await;
        let (_bob, mut bob_rx) = joined(&hub, "bob").await;

        send(&hub, alice, r#"{"event":"chat-message","data":{"text":"hello"}}"#).await;
        let frame = next(&mut bob_rx);
        assert_eq!(frame["event"], "chat-message");
        assert_eq!(frame["data"]["text"], "hello");
        assert!(frame["data"]["dtmcreated"].is_string());
    }

    #[tokio::test]
    async fn test_ping_answered_only_to_sender() {
        let hub = hub();
        let (alice, mut alice_rx) = joined(&hub, "alice").await;
        let (_bob, mut bob_rx) = joined(&hub, "bob").await;
        while alice_rx.try_recv().is_ok() {}

        send(&hub, alice, r#"{"event":"ping"}"#).await;
        assert_eq!(next(&mut alice_rx)["event"], "pong");
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(hub.connection_state(alice).await, Some(ConnectionState::Active));
    }

    #[tokio::test]
    async fn test_update_username_renames_connection() {
        let hub = hub();
        let (alice, mut alice_rx) = joined(&hub, "alice").await;

        send(&hub, alice, r#"{"event":"update-username","data":{"userName":"Alice Liddell"}}"#).await;
        assert_eq!(next(&mut alice_rx)["event"], "update-username");
        assert_eq!(hub.connection(alice).await.unwrap().display_name, "Alice Liddell");
    }

    #[tokio::test]
    async fn test_room_record_defaults_status() {
        let hub = hub();
        let (alice, mut alice_rx) = joined(&hub, "alice").await;

        send(&hub, alice, r#"{"event":"room-record"}"#).await;
        let frame = next(&mut alice_rx);
        assert_eq!(frame["event"], "room-record");
        assert_eq!(frame["data"], json!({"status": "recording", "room": "r1"}));
    }

    #[tokio::test]
    async fn test_connection_events_run_in_order_then_leave() {
        let hub = hub();
        let (alice, _alice_rx) = joined(&hub, "alice").await;
        let (_bob, mut bob_rx) = joined(&hub, "bob").await;

        let (tx, rx) = unbounded_channel();
        for text in [
            r#"{"event":"update-username","data":{"userName":"Alice B"}}"#,
            r#"{"event":"chat-message","data":{"text":"first"}}"#,
            r#"{"event":"chat-message","data":{"text":"second"}}"#,
        ] {
            tx.send(ClientFrame::parse(text).unwrap().into_event()).unwrap();
        }
        drop(tx);
        run_connection(hub.clone(), alice, "r1".to_string(), rx).await;

        assert_eq!(next(&mut bob_rx)["event"], "update-username");
        assert_eq!(next(&mut bob_rx)["data"]["text"], "first");
        assert_eq!(next(&mut bob_rx)["data"]["text"], "second");
        let left = next(&mut bob_rx);
        assert_eq!(left["event"], "user-disconnect");
        assert_eq!(left["data"]["userName"], "Alice B");
        assert!(hub.connection(alice).await.is_none());
        assert!(hub.sessions().get("r1", "alice").await.unwrap().is_none());
    }
}
