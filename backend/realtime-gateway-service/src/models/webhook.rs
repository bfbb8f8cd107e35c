//! Media provider webhook payloads.
//!
//! LiveKit posts protobuf messages encoded as JSON: field names are
//! lowerCamelCase, enums are their symbolic names, 64-bit integers arrive as
//! strings and zero-valued fields are omitted entirely. Responses from the
//! Twirp API use the original snake_case names, so both spellings are accepted.

use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "num_participants", deserialize_with = "lenient_i64")]
    pub num_participants: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Provider-assigned id of this participant's connection.
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
}

impl ParticipantInfo {
    /// Key for per-connection state; falls back to identity if the provider omitted the sid.
    pub fn connection_key(&self) -> &str {
        if self.sid.is_empty() {
            &self.identity
        } else {
            &self.sid
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackType {
    #[default]
    Audio,
    Video,
    Data,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackSource {
    #[default]
    Unknown,
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

/// Which half of a camera + microphone pair a published track fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSlot {
    Video,
    Audio,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default, rename = "type")]
    pub kind: TrackType,
    #[serde(default)]
    pub source: TrackSource,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
}

impl TrackInfo {
    /// Camera fills the video slot, microphone the audio slot. Screen shares
    /// never count. Older clients omit the source, so the track type decides.
    pub fn media_slot(&self) -> Option<MediaSlot> {
        match self.source {
            TrackSource::Camera => Some(MediaSlot::Video),
            TrackSource::Microphone => Some(MediaSlot::Audio),
            TrackSource::ScreenShare | TrackSource::ScreenShareAudio => None,
            TrackSource::Unknown => match self.kind {
                TrackType::Video => Some(MediaSlot::Video),
                TrackType::Audio => Some(MediaSlot::Audio),
                TrackType::Data => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EgressStatus {
    #[default]
    EgressStarting,
    EgressActive,
    EgressEnding,
    EgressComplete,
    EgressFailed,
    EgressAborted,
    EgressLimitReached,
}

impl EgressStatus {
    pub fn is_active(self) -> bool {
        matches!(self, EgressStatus::EgressStarting | EgressStatus::EgressActive)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            EgressStatus::EgressFailed | EgressStatus::EgressAborted | EgressStatus::EgressLimitReached
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub size: i64,
    /// Nanoseconds.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duration: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EgressInfo {
    #[serde(default, alias = "egress_id")]
    pub egress_id: String,
    #[serde(default, alias = "room_name")]
    pub room_name: String,
    #[serde(default)]
    pub status: EgressStatus,
    #[serde(default)]
    pub error: String,
    #[serde(default, alias = "file_results")]
    pub file_results: Vec<FileResult>,
    /// Single-file result reported by older provider versions.
    #[serde(default)]
    pub file: Option<FileResult>,
}

impl EgressInfo {
    pub fn primary_file(&self) -> Option<&FileResult> {
        self.file_results.first().or(self.file.as_ref())
    }
}

/// Raw envelope as posted to `/webhook/{provider}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub room: Option<RoomInfo>,
    #[serde(default)]
    pub participant: Option<ParticipantInfo>,
    #[serde(default)]
    pub track: Option<TrackInfo>,
    #[serde(default, alias = "egress_info")]
    pub egress_info: Option<EgressInfo>,
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub created_at: i64,
}

/// Webhook event after validation, one variant per lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    RoomStarted {
        room: RoomInfo,
    },
    RoomFinished {
        room: RoomInfo,
    },
    ParticipantJoined {
        room: RoomInfo,
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        room: RoomInfo,
        participant: ParticipantInfo,
    },
    TrackPublished {
        room: RoomInfo,
        participant: ParticipantInfo,
        track: TrackInfo,
    },
    TrackUnpublished {
        room: RoomInfo,
        participant: ParticipantInfo,
        track: TrackInfo,
    },
    TrackSubscribed {
        room: RoomInfo,
        participant: ParticipantInfo,
    },
    EgressStarted {
        egress: EgressInfo,
    },
    EgressUpdated {
        egress: EgressInfo,
    },
    EgressEnded {
        egress: EgressInfo,
    },
    /// Kinds this gateway does not act on; acknowledged and logged.
    Other {
        event: String,
    },
}

impl WebhookEvent {
    /// Parses and validates a webhook body.
    pub fn from_slice(body: &[u8]) -> Result<Self, AppError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedWebhook(e.to_string()))?;
        Self::try_from(envelope)
    }

    pub fn name(&self) -> &str {
        match self {
            WebhookEvent::RoomStarted { .. } => "room_started",
            WebhookEvent::RoomFinished { .. } => "room_finished",
            WebhookEvent::ParticipantJoined { .. } => "participant_joined",
            WebhookEvent::ParticipantLeft { .. } => "participant_left",
            WebhookEvent::TrackPublished { .. } => "track_published",
            WebhookEvent::TrackUnpublished { .. } => "track_unpublished",
            WebhookEvent::TrackSubscribed { .. } => "track_subscribed",
            WebhookEvent::EgressStarted { .. } => "egress_started",
            WebhookEvent::EgressUpdated { .. } => "egress_updated",
            WebhookEvent::EgressEnded { .. } => "egress_ended",
            WebhookEvent::Other { event } => event,
        }
    }
}

impl TryFrom<WebhookEnvelope> for WebhookEvent {
    type Error = AppError;

    fn try_from(env: WebhookEnvelope) -> Result<Self, Self::Error> {
        let missing = |what: &str| AppError::MalformedWebhook(format!("{} without {what}", env.event));

        let room = || env.room.clone().filter(|r| !r.name.is_empty()).ok_or_else(|| missing("room"));
        let participant = || {
            env.participant
                .clone()
                .filter(|p| !p.identity.is_empty())
                .ok_or_else(|| missing("participant"))
        };
        let track = || env.track.clone().ok_or_else(|| missing("track"));
        let egress = || {
            env.egress_info
                .clone()
                .filter(|e| !e.egress_id.is_empty())
                .ok_or_else(|| missing("egressInfo"))
        };

        let event = match env.event.as_str() {
            "" => return Err(AppError::MalformedWebhook("missing event name".into())),
            "room_started" => WebhookEvent::RoomStarted { room: room()? },
            "room_finished" => WebhookEvent::RoomFinished { room: room()? },
            "participant_joined" => WebhookEvent::ParticipantJoined {
                room: room()?,
                participant: participant()?,
            },
            "participant_left" => WebhookEvent::ParticipantLeft {
                room: room()?,
                participant: participant()?,
            },
            "track_published" => WebhookEvent::TrackPublished {
                room: room()?,
                participant: participant()?,
                track: track()?,
            },
            "track_unpublished" => WebhookEvent::TrackUnpublished {
                room: room()?,
                participant: participant()?,
                track: track()?,
            },
            "track_subscribed" => WebhookEvent::TrackSubscribed {
                room: room()?,
                participant: participant()?,
            },
            "egress_started" => WebhookEvent::EgressStarted { egress: egress()? },
            "egress_updated" => WebhookEvent::EgressUpdated { egress: egress()? },
            "egress_ended" => WebhookEvent::EgressEnded { egress: egress()? },
            other => WebhookEvent::Other {
                event: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// Accepts an integer either as a JSON number or as a decimal string.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) if s.is_empty() => Ok(0),
        NumberOrString::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
