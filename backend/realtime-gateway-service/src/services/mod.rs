pub mod admission;
pub mod auto_record;
pub mod inactivity;
pub mod livekit;
pub mod webhook_auth;
pub mod webhook_queue;

pub use admission::{Availability, RecordingAdmission, RecordingRequest, TrackPair};
pub use auto_record::{AutoRecordOrchestrator, OrchestratorHealth, TrackPublicationState};
pub use inactivity::{IdleTarget, InactivityTimers};
pub use livekit::{LiveKitClient, MediaProvider, TokenRequest, UnconfiguredProvider};
pub use webhook_auth::WebhookVerifier;
pub use webhook_queue::WebhookDispatcher;
