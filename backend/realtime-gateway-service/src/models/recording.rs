use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a recording is composed on the provider side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// All participants mixed server-side, audio and video.
    #[default]
    RoomCompositeVideoAudio,
    /// All participants mixed server-side, audio only.
    RoomCompositeAudio,
    /// One participant's camera and microphone.
    TrackComposite,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::RoomCompositeVideoAudio => "RoomCompositeVideoAudio",
            RecordType::RoomCompositeAudio => "RoomCompositeAudio",
            RecordType::TrackComposite => "TrackComposite",
        }
    }

    pub fn is_room_composite(self) -> bool {
        !matches!(self, RecordType::TrackComposite)
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            RecordType::RoomCompositeAudio => "ogg",
            _ => "mp4",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RoomCompositeVideoAudio" => Ok(RecordType::RoomCompositeVideoAudio),
            "RoomCompositeAudio" => Ok(RecordType::RoomCompositeAudio),
            "TrackComposite" => Ok(RecordType::TrackComposite),
            other => Err(format!("unknown record type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Complete,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordingStatus::Recording => "recording",
            RecordingStatus::Complete => "complete",
            RecordingStatus::Failed => "failed",
        }
    }
}

impl FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(RecordingStatus::Recording),
            "complete" => Ok(RecordingStatus::Complete),
            "failed" => Ok(RecordingStatus::Failed),
            other => Err(format!("unknown recording status: {other}")),
        }
    }
}

/// Mirror of a provider egress in the persistence store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingJob {
    pub egress_id: String,
    pub room: String,
    pub record_type: RecordType,
    pub status: RecordingStatus,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub duration_seconds: i64,
}

impl RecordingJob {
    pub fn started(egress_id: String, room: String, record_type: RecordType, file_path: String) -> Self {
        Self {
            egress_id,
            room,
            record_type,
            status: RecordingStatus::Recording,
            file_name: String::new(),
            file_path,
            file_size: 0,
            duration_seconds: 0,
        }
    }
}

/// Final state written when an egress ends.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub status: RecordingStatus,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub duration_seconds: i64,
}

impl JobCompletion {
    pub fn failed() -> Self {
        Self {
            status: RecordingStatus::Failed,
            file_name: String::new(),
            file_path: String::new(),
            file_size: 0,
            duration_seconds: 0,
        }
    }
}
