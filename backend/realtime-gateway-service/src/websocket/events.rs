//! Realtime client frames: `{"event": <name>, "data": <value>}` in both directions.

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LOG: &str = "log";
pub const PONG: &str = "pong";
pub const USER_CONNECTION: &str = "user-connection";
pub const USER_DISCONNECT: &str = "user-disconnect";
pub const CHAT_MESSAGE: &str = "chat-message";
pub const POSITION: &str = "position";
pub const USER_POSITION: &str = "user-position";
pub const UPDATE_USERNAME: &str = "update-username";
pub const USER_CONFERENCE: &str = "user-conference";
pub const AUTH_JOIN_CONFERENCE: &str = "auth-join-conference";
pub const AUTH_JOIN_CONFERENCE_ANSWER: &str = "auth-join-conference-answer";
pub const CASE_DATA: &str = "case-data";
pub const ROOM_RECORD: &str = "room-record";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound client event after name resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ChatMessage(Value),
    Position(Value),
    UserPosition(Value),
    UpdateUsername(Value),
    /// Conference signalling and case data, relayed to the local room verbatim.
    Relay { event: &'static str, data: Value },
    RoomRecord(Value),
    Ping,
    Unknown(String),
}

impl ClientFrame {
    pub fn parse(text: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_event(self) -> ClientEvent {
        match self.event.as_str() {
            CHAT_MESSAGE => ClientEvent::ChatMessage(self.data),
            POSITION => ClientEvent::Position(self.data),
            USER_POSITION => ClientEvent::UserPosition(self.data),
            UPDATE_USERNAME => ClientEvent::UpdateUsername(self.data),
            USER_CONFERENCE => ClientEvent::Relay {
                event: USER_CONFERENCE,
                data: self.data,
            },
            AUTH_JOIN_CONFERENCE => ClientEvent::Relay {
                event: AUTH_JOIN_CONFERENCE,
                data: self.data,
            },
            AUTH_JOIN_CONFERENCE_ANSWER => ClientEvent::Relay {
                event: AUTH_JOIN_CONFERENCE_ANSWER,
                data: self.data,
            },
            CASE_DATA => ClientEvent::Relay {
                event: CASE_DATA,
                data: self.data,
            },
            ROOM_RECORD => ClientEvent::RoomRecord(self.data),
            "ping" => ClientEvent::Ping,
            _ => ClientEvent::Unknown(self.event),
        }
    }
}

pub fn encode_frame(event: &str, data: &Value) -> AppResult<String> {
    Ok(serde_json::to_string(&serde_json::json!({
        "event": event,
        "data": data,
    }))?)
}
