use super::recording::RecordType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Room row as far as the realtime core needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub room: String,
    pub status: String,
    pub auto_record: bool,
    pub record_type: Option<RecordType>,
    /// Mirrors whether the room currently has a recording running.
    pub record_status: bool,
    pub record_id: Option<String>,
}

impl RoomConfig {
    /// The record type auto-recording should use, if the room opted in.
    pub fn auto_record_type(&self) -> Option<RecordType> {
        if self.auto_record {
            Some(self.record_type.unwrap_or_default())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Connect,
    Disconnect,
    Idle,
}

impl ParticipantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantStatus::Connect => "connect",
            ParticipantStatus::Disconnect => "disconnect",
            ParticipantStatus::Idle => "idle",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
