pub mod recording;
pub mod room;
pub mod webhook;

pub use recording::{JobCompletion, RecordType, RecordingJob, RecordingStatus};
pub use room::{ParticipantStatus, RoomConfig};
pub use webhook::{
    EgressInfo, EgressStatus, FileResult, MediaSlot, ParticipantInfo, RoomInfo, TrackInfo, TrackSource,
    TrackType, WebhookEnvelope, WebhookEvent,
};
