#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use realtime_gateway_service::config::{Config, LiveKitConfig, RecordingConfig, SessionConfig, WebhookConfig};
use realtime_gateway_service::error::{AppError, AppResult};
use realtime_gateway_service::models::{
    EgressInfo, EgressStatus, FileResult, ParticipantInfo, RecordType, RoomConfig, RoomInfo, TrackInfo,
    TrackSource, TrackType, WebhookEvent,
};
use realtime_gateway_service::services::{
    AutoRecordOrchestrator, MediaProvider, RecordingAdmission, TokenRequest,
};
use realtime_gateway_service::stores::{MemoryStores, Stores};
use realtime_gateway_service::websocket::{EventBus, Hub, SessionStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    RoomComposite { room: String, audio_only: bool },
    TrackComposite { room: String, video: String, audio: String },
    Stop(String),
}

/// Media provider double that records every call.
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<Vec<ProviderCall>>,
    egresses: Mutex<Vec<EgressInfo>>,
    failures_left: AtomicUsize,
    failing_stops: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` start calls fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Makes every stop of `egress_id` fail.
    pub fn fail_stop(&self, egress_id: &str) {
        self.failing_stops.lock().insert(egress_id.to_string());
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| !matches!(c, ProviderCall::Stop(_)))
            .count()
    }

    fn start(&self, room: &str, call: ProviderCall) -> AppResult<EgressInfo> {
        self.calls.lock().push(call);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::ProviderCallFailed("mock provider failure".into()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let egress = EgressInfo {
            egress_id: format!("EG_mock_{n}"),
            room_name: room.to_string(),
            status: EgressStatus::EgressActive,
            ..EgressInfo::default()
        };
        self.egresses.lock().push(egress.clone());
        Ok(egress)
    }
}

#[async_trait]
impl MediaProvider for MockProvider {
    async fn start_composite_egress(&self, room: &str, audio_only: bool, _file_path: &str) -> AppResult<EgressInfo> {
        self.start(
            room,
            ProviderCall::RoomComposite {
                room: room.to_string(),
                audio_only,
            },
        )
    }

    async fn start_track_composite_egress(
        &self,
        room: &str,
        video_track_id: &str,
        audio_track_id: &str,
        _file_path: &str,
    ) -> AppResult<EgressInfo> {
        // Yield so concurrent webhook handling actually interleaves.
        tokio::task::yield_now().await;
        self.start(
            room,
            ProviderCall::TrackComposite {
                room: room.to_string(),
                video: video_track_id.to_string(),
                audio: audio_track_id.to_string(),
            },
        )
    }

    async fn stop_egress(&self, egress_id: &str) -> AppResult<EgressInfo> {
        self.calls.lock().push(ProviderCall::Stop(egress_id.to_string()));
        if self.failing_stops.lock().contains(egress_id) {
            return Err(AppError::ProviderCallFailed(format!("stop of {egress_id} refused")));
        }
        let mut egresses = self.egresses.lock();
        let egress = egresses
            .iter_mut()
            .find(|e| e.egress_id == egress_id)
            .ok_or_else(|| AppError::ProviderCallFailed(format!("unknown egress {egress_id}")))?;
        egress.status = EgressStatus::EgressEnding;
        Ok(egress.clone())
    }

    async fn list_egress(&self, room: Option<&str>) -> AppResult<Vec<EgressInfo>> {
        Ok(self
            .egresses
            .lock()
            .iter()
            .filter(|e| room.map_or(true, |r| e.room_name == r))
            .cloned()
            .collect())
    }

    async fn issue_token(&self, request: &TokenRequest) -> AppResult<String> {
        Ok(format!("token-{}-{}", request.room, request.identity))
    }
}

pub struct Harness {
    pub stores: Arc<MemoryStores>,
    pub provider: Arc<MockProvider>,
    pub hub: Hub,
    pub admission: Arc<RecordingAdmission>,
    pub orchestrator: Arc<AutoRecordOrchestrator>,
}

pub fn recording_config(limit: usize) -> RecordingConfig {
    RecordingConfig {
        egress_limit: limit,
        record_path: "/out".to_string(),
        max_track_data_size: 100,
        inactivity_timeout: Duration::from_secs(60),
        recording_identity_prefix: "EG_".to_string(),
    }
}

pub fn harness(config: RecordingConfig) -> Harness {
    let stores = Arc::new(MemoryStores::new());
    let provider = Arc::new(MockProvider::new());
    let hub = Hub::new(
        SessionStore::memory(Duration::from_secs(3600)),
        EventBus::disabled("gw-test"),
    );
    let timeout = Duration::from_secs(5);
    let admission = Arc::new(RecordingAdmission::new(
        provider.clone(),
        stores.clone(),
        stores.clone(),
        config.egress_limit,
        config.record_path.clone(),
        timeout,
    ));
    let orchestrator = Arc::new(AutoRecordOrchestrator::new(
        Stores::shared(stores.clone()),
        admission.clone(),
        hub.clone(),
        config,
        timeout,
    ));
    Harness {
        stores,
        provider,
        hub,
        admission,
        orchestrator,
    }
}

pub fn auto_room(room: &str, record_type: RecordType) -> RoomConfig {
    RoomConfig {
        room: room.to_string(),
        status: "open".to_string(),
        auto_record: true,
        record_type: Some(record_type),
        ..RoomConfig::default()
    }
}

pub fn room_info(room: &str) -> RoomInfo {
    RoomInfo {
        sid: format!("RM_{room}"),
        name: room.to_string(),
        ..RoomInfo::default()
    }
}

pub fn participant(identity: &str) -> ParticipantInfo {
    ParticipantInfo {
        sid: format!("PA_{identity}"),
        identity: identity.to_string(),
        name: identity.to_string(),
        ..ParticipantInfo::default()
    }
}

pub fn camera(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        kind: TrackType::Video,
        source: TrackSource::Camera,
        ..TrackInfo::default()
    }
}

pub fn microphone(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        kind: TrackType::Audio,
        source: TrackSource::Microphone,
        ..TrackInfo::default()
    }
}

pub fn joined(room: &str, identity: &str) -> WebhookEvent {
    WebhookEvent::ParticipantJoined {
        room: room_info(room),
        participant: participant(identity),
    }
}

pub fn left(room: &str, identity: &str) -> WebhookEvent {
    WebhookEvent::ParticipantLeft {
        room: room_info(room),
        participant: participant(identity),
    }
}

pub fn published(room: &str, identity: &str, track: TrackInfo) -> WebhookEvent {
    WebhookEvent::TrackPublished {
        room: room_info(room),
        participant: participant(identity),
        track,
    }
}

pub fn egress_ended(egress_id: &str, room: &str, size: i64, duration_ns: i64) -> WebhookEvent {
    WebhookEvent::EgressEnded {
        egress: EgressInfo {
            egress_id: egress_id.to_string(),
            room_name: room.to_string(),
            status: EgressStatus::EgressComplete,
            file_results: vec![FileResult {
                filename: format!("/out/{room}.mp4"),
                size,
                duration: duration_ns,
                ..FileResult::default()
            }],
            ..EgressInfo::default()
        },
    }
}

pub fn egress_failed(egress_id: &str, room: &str, error: &str) -> WebhookEvent {
    WebhookEvent::EgressEnded {
        egress: EgressInfo {
            egress_id: egress_id.to_string(),
            room_name: room.to_string(),
            status: EgressStatus::EgressFailed,
            error: error.to_string(),
            ..EgressInfo::default()
        },
    }
}

pub fn livekit_config() -> LiveKitConfig {
    LiveKitConfig {
        host: "ws://livekit.test:7880".to_string(),
        api_key: "test-key".to_string(),
        api_secret: "test-secret-that-is-long-enough".to_string(),
    }
}

pub fn test_config(recording: RecordingConfig) -> Config {
    Config {
        port: 0,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        redis_connect_timeout: Duration::from_millis(100),
        database_url: None,
        database_max_connections: 1,
        livekit: Some(livekit_config()),
        recording,
        session: SessionConfig::default(),
        webhook: WebhookConfig {
            workers: 2,
            queue_capacity: 16,
            verify_signature: true,
        },
        downstream_timeout: Duration::from_secs(5),
        event_bus_channel: "socket:events".to_string(),
        instance_id: "gw-test".to_string(),
    }
}
