//! Webhook-driven auto-recording and participant inactivity.
//!
//! Track-composite rooms record each participant once both a camera and a
//! microphone track are published. The decision is taken while holding the
//! track-state lock and latched in the entry; the provider call happens after
//! the lock is released. Room-composite rooms start one recording per room on
//! the first join.

use super::admission::{RecordingAdmission, RecordingRequest, TrackPair};
use super::inactivity::{IdleCallback, IdleTarget, InactivityTimers};
use crate::config::RecordingConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    EgressInfo, EgressStatus, JobCompletion, MediaSlot, ParticipantInfo, ParticipantStatus, RecordType,
    RecordingStatus, RoomInfo, TrackInfo, WebhookEvent,
};
use crate::resilience::with_timeout;
use crate::stores::{ParticipantStore, Stores};
use crate::websocket::{EventKind, Hub};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPublicationState {
    pub room: String,
    pub identity: String,
    pub video_track: Option<String>,
    pub audio_track: Option<String>,
    pub recording_started: bool,
}

impl TrackPublicationState {
    fn new(room: &str, identity: &str) -> Self {
        Self {
            room: room.to_string(),
            identity: identity.to_string(),
            video_track: None,
            audio_track: None,
            recording_started: false,
        }
    }

    fn ready_tracks(&self) -> Option<TrackPair> {
        match (&self.video_track, &self.audio_track) {
            (Some(video), Some(audio)) => Some(TrackPair {
                video_track_id: video.clone(),
                audio_track_id: audio.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RoomRecording {
    Starting,
    Recording(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorHealth {
    pub healthy: bool,
    pub track_data_entries: usize,
    pub max_track_data_size: usize,
    pub active_timers: usize,
}

type TrackKey = (String, String);

pub struct AutoRecordOrchestrator {
    stores: Stores,
    admission: Arc<RecordingAdmission>,
    hub: Hub,
    timers: InactivityTimers,
    // (room, identity) -> state
    track_data: Mutex<HashMap<TrackKey, TrackPublicationState>>,
    room_recordings: Mutex<HashMap<String, RoomRecording>>,
    config: RecordingConfig,
    timeout: Duration,
}

fn key(room: &str, identity: &str) -> TrackKey {
    (room.to_string(), identity.to_string())
}

fn file_name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn completion_for(egress: &EgressInfo) -> JobCompletion {
    if egress.status != EgressStatus::EgressComplete {
        return JobCompletion::failed();
    }
    match egress.primary_file() {
        Some(file) => {
            let path = if file.location.is_empty() {
                file.filename.clone()
            } else {
                file.location.clone()
            };
            JobCompletion {
                status: RecordingStatus::Complete,
                file_name: file_name_of(&file.filename),
                file_path: path,
                file_size: file.size,
                duration_seconds: file.duration / 1_000_000_000,
            }
        }
        None => JobCompletion {
            status: RecordingStatus::Complete,
            ..JobCompletion::failed()
        },
    }
}

fn idle_callback(participants: Arc<dyn ParticipantStore>, hub: Hub, timeout: Duration) -> IdleCallback {
    Arc::new(move |key: String, target: IdleTarget| -> BoxFuture<'static, ()> {
        let participants = participants.clone();
        let hub = hub.clone();
        async move {
            tracing::info!(
                room = %target.room,
                identity = %target.identity,
                timer = %key,
                "participant inactive, marking idle"
            );
            let update = participants.update_status(&target.room, &target.identity, ParticipantStatus::Idle);
            if let Err(e) = with_timeout(timeout, "mark participant idle", update).await {
                tracing::warn!(room = %target.room, identity = %target.identity, error = %e, "failed to store idle status");
            }
            hub.mark_idle(&target.room, &target.identity).await;
        }
        .boxed()
    })
}

impl AutoRecordOrchestrator {
    pub fn new(
        stores: Stores,
        admission: Arc<RecordingAdmission>,
        hub: Hub,
        config: RecordingConfig,
        timeout: Duration,
    ) -> Self {
        let timers = InactivityTimers::new(
            config.inactivity_timeout,
            idle_callback(stores.participants.clone(), hub.clone(), timeout),
        );
        Self {
            stores,
            admission,
            hub,
            timers,
            track_data: Mutex::new(HashMap::new()),
            room_recordings: Mutex::new(HashMap::new()),
            config,
            timeout,
        }
    }

    pub fn timers(&self) -> &InactivityTimers {
        &self.timers
    }

    pub fn track_state(&self, room: &str, identity: &str) -> Option<TrackPublicationState> {
        self.track_data.lock().get(&key(room, identity)).cloned()
    }

    pub fn track_data_len(&self) -> usize {
        self.track_data.lock().len()
    }

    pub fn is_room_recording(&self, room: &str) -> bool {
        self.room_recordings.lock().contains_key(room)
    }

    pub fn health(&self) -> OrchestratorHealth {
        let entries = self.track_data_len();
        OrchestratorHealth {
            healthy: entries < self.config.max_track_data_size,
            track_data_entries: entries,
            max_track_data_size: self.config.max_track_data_size,
            active_timers: self.timers.live_count(),
        }
    }

    /// Stops every timer and drops all per-participant and per-room state.
    pub fn cleanup(&self) {
        let timers = self.timers.stop_all();
        let entries = {
            let mut data = self.track_data.lock();
            let n = data.len();
            data.clear();
            n
        };
        self.room_recordings.lock().clear();
        metrics::TRACK_STATE_ENTRIES.set(0);
        tracing::info!(timers, entries, "auto-record orchestrator cleaned up");
    }

    fn is_recorder(&self, identity: &str) -> bool {
        let prefix = &self.config.recording_identity_prefix;
        !prefix.is_empty() && identity.starts_with(prefix.as_str())
    }

    fn publish_track_gauge(&self, len: usize) {
        metrics::TRACK_STATE_ENTRIES.set(len as i64);
    }

    pub async fn handle_event(&self, event: WebhookEvent) -> AppResult<()> {
        let label = match &event {
            WebhookEvent::Other { .. } => "other",
            known => known.name(),
        };
        metrics::WEBHOOK_EVENTS_RECEIVED.with_label_values(&[label]).inc();

        match event {
            WebhookEvent::RoomStarted { room } => {
                tracing::info!(room = %room.name, sid = %room.sid, "room started");
                Ok(())
            }
            WebhookEvent::RoomFinished { room } => self.on_room_finished(&room).await,
            WebhookEvent::ParticipantJoined { room, participant } => {
                self.on_participant_joined(&room, &participant).await
            }
            WebhookEvent::ParticipantLeft { room, participant } => {
                self.on_participant_left(&room, &participant).await
            }
            WebhookEvent::TrackPublished {
                room,
                participant,
                track,
            } => self.on_track_published(&room, &participant, &track).await,
            WebhookEvent::TrackUnpublished {
                room,
                participant,
                track,
            } => {
                self.on_track_unpublished(&room, &participant, &track);
                Ok(())
            }
            WebhookEvent::TrackSubscribed { room, participant } => {
                if !self.is_recorder(&participant.identity) {
                    self.timers.reset(
                        participant.connection_key(),
                        IdleTarget {
                            room: room.name.clone(),
                            identity: participant.identity.clone(),
                        },
                    );
                }
                Ok(())
            }
            WebhookEvent::EgressStarted { egress } => self.on_egress_started(&egress).await,
            WebhookEvent::EgressUpdated { egress } => {
                tracing::debug!(egress_id = %egress.egress_id, status = ?egress.status, "egress updated");
                Ok(())
            }
            WebhookEvent::EgressEnded { egress } => self.on_egress_ended(&egress).await,
            WebhookEvent::Other { event } => {
                tracing::warn!(event = %event, "unhandled webhook event");
                Ok(())
            }
        }
    }

    async fn on_room_finished(&self, room: &RoomInfo) -> AppResult<()> {
        let cancelled = self.timers.cancel_room(&room.name);
        let len = {
            let mut data = self.track_data.lock();
            data.retain(|(r, _), _| r != &room.name);
            data.len()
        };
        self.publish_track_gauge(len);

        tracing::info!(room = %room.name, cancelled, "room finished");
        with_timeout(
            self.timeout,
            "close room",
            self.stores.rooms.update_status(&room.name, "close"),
        )
        .await
    }

    async fn on_participant_joined(&self, room: &RoomInfo, participant: &ParticipantInfo) -> AppResult<()> {
        let room_name = room.name.as_str();
        let identity = participant.identity.as_str();
        tracing::info!(room = room_name, identity, name = %participant.name, "participant joined");

        if let Err(e) = with_timeout(
            self.timeout,
            "participant connect status",
            self.stores
                .participants
                .update_status(room_name, identity, ParticipantStatus::Connect),
        )
        .await
        {
            tracing::warn!(room = room_name, identity, error = %e, "failed to store participant status");
        }

        if self.is_recorder(identity) {
            tracing::debug!(room = room_name, identity, "recorder participant ignored");
            return Ok(());
        }

        self.timers.start(
            participant.connection_key(),
            IdleTarget {
                room: room_name.to_string(),
                identity: identity.to_string(),
            },
        );

        let config = with_timeout(self.timeout, "load room config", self.stores.rooms.get_by_room(room_name)).await?;
        let Some(config) = config else {
            return Ok(());
        };

        match config.auto_record_type() {
            Some(RecordType::TrackComposite) => {
                let max = self.config.max_track_data_size;
                let inserted = {
                    let mut data = self.track_data.lock();
                    let k = key(room_name, identity);
                    if data.contains_key(&k) {
                        Some(data.len())
                    } else if data.len() >= max {
                        None
                    } else {
                        data.insert(k, TrackPublicationState::new(room_name, identity));
                        Some(data.len())
                    }
                };
                match inserted {
                    Some(len) => self.publish_track_gauge(len),
                    None => tracing::warn!(
                        room = room_name,
                        identity,
                        max,
                        "track state map full, participant will not be auto-recorded"
                    ),
                }
                Ok(())
            }
            Some(record_type) => {
                if config.record_status {
                    tracing::debug!(room = room_name, "room already recording");
                    return Ok(());
                }
                self.start_room_composite(room_name, record_type).await
            }
            None => Ok(()),
        }
    }

    async fn on_participant_left(&self, room: &RoomInfo, participant: &ParticipantInfo) -> AppResult<()> {
        let room_name = room.name.as_str();
        let identity = participant.identity.as_str();

        self.timers.cancel(participant.connection_key());
        let len = {
            let mut data = self.track_data.lock();
            data.remove(&key(room_name, identity));
            data.len()
        };
        self.publish_track_gauge(len);
        tracing::info!(room = room_name, identity, "participant left");

        with_timeout(
            self.timeout,
            "participant disconnect status",
            self.stores
                .participants
                .update_status(room_name, identity, ParticipantStatus::Disconnect),
        )
        .await
    }

    async fn on_track_published(&self, room: &RoomInfo, participant: &ParticipantInfo, track: &TrackInfo) -> AppResult<()> {
        let room_name = room.name.as_str();
        let identity = participant.identity.as_str();
        if self.is_recorder(identity) {
            return Ok(());
        }

        self.timers.reset(
            participant.connection_key(),
            IdleTarget {
                room: room_name.to_string(),
                identity: identity.to_string(),
            },
        );
        self.hub.mark_active(room_name, identity).await;

        let Some(slot) = track.media_slot() else {
            tracing::debug!(room = room_name, identity, track = %track.sid, "track does not count for recording");
            return Ok(());
        };

        // Decide under the lock, act after releasing it.
        let ready = {
            let mut data = self.track_data.lock();
            let Some(state) = data.get_mut(&key(room_name, identity)) else {
                return Ok(());
            };
            match slot {
                MediaSlot::Video => state.video_track = Some(track.sid.clone()),
                MediaSlot::Audio => state.audio_track = Some(track.sid.clone()),
            }
            if state.recording_started {
                None
            } else {
                let ready = state.ready_tracks();
                if ready.is_some() {
                    state.recording_started = true;
                }
                ready
            }
        };

        match ready {
            Some(tracks) => self.start_track_composite(room_name, identity, tracks).await,
            None => Ok(()),
        }
    }

    fn on_track_unpublished(&self, room: &RoomInfo, participant: &ParticipantInfo, track: &TrackInfo) {
        let mut data = self.track_data.lock();
        if let Some(state) = data.get_mut(&key(&room.name, &participant.identity)) {
            if state.recording_started {
                return;
            }
            if state.video_track.as_deref() == Some(track.sid.as_str()) {
                state.video_track = None;
            }
            if state.audio_track.as_deref() == Some(track.sid.as_str()) {
                state.audio_track = None;
            }
        }
        tracing::debug!(room = %room.name, identity = %participant.identity, track = %track.sid, "track unpublished");
    }

    async fn start_track_composite(&self, room: &str, identity: &str, tracks: TrackPair) -> AppResult<()> {
        let request = RecordingRequest {
            room: room.to_string(),
            record_type: RecordType::TrackComposite,
            identity: Some(identity.to_string()),
            file_path: None,
            tracks: Some(tracks),
        };

        match self.admission.start_recording(request).await {
            Ok(job) => {
                self.announce_start(room, &job.egress_id, Some(identity)).await;
                Ok(())
            }
            Err(e) => {
                if let Some(state) = self.track_data.lock().get_mut(&key(room, identity)) {
                    state.recording_started = false;
                }
                tracing::warn!(room, identity, error = %e, "track-composite start failed, latch released");
                Err(e)
            }
        }
    }

    async fn start_room_composite(&self, room: &str, record_type: RecordType) -> AppResult<()> {
        {
            let mut recordings = self.room_recordings.lock();
            if recordings.contains_key(room) {
                return Ok(());
            }
            recordings.insert(room.to_string(), RoomRecording::Starting);
        }

        let request = RecordingRequest {
            room: room.to_string(),
            record_type,
            identity: None,
            file_path: None,
            tracks: None,
        };
        match self.admission.start_recording(request).await {
            Ok(job) => {
                self.room_recordings
                    .lock()
                    .insert(room.to_string(), RoomRecording::Recording(job.egress_id.clone()));
                self.announce_start(room, &job.egress_id, None).await;
                Ok(())
            }
            Err(e) => {
                let mut recordings = self.room_recordings.lock();
                if recordings.get(room) == Some(&RoomRecording::Starting) {
                    recordings.remove(room);
                }
                tracing::warn!(room, record_type = %record_type, error = %e, "room-composite start failed");
                Err(e)
            }
        }
    }

    async fn announce_start(&self, room: &str, egress_id: &str, identity: Option<&str>) {
        let payload = json!({
            "status": "startRecord",
            "timestamp": chrono::Utc::now().timestamp(),
            "room": room,
            "egressId": egress_id,
            "identity": identity,
        });
        if let Err(e) = self
            .hub
            .broadcast_and_publish(room, EventKind::RecordingStatus, payload)
            .await
        {
            tracing::warn!(room, error = %e, "failed to announce recording start");
        }
    }

    async fn on_egress_started(&self, egress: &EgressInfo) -> AppResult<()> {
        tracing::info!(egress_id = %egress.egress_id, room = %egress.room_name, "egress started");
        if egress.room_name.is_empty() {
            return Ok(());
        }
        self.room_recordings.lock().insert(
            egress.room_name.clone(),
            RoomRecording::Recording(egress.egress_id.clone()),
        );
        with_timeout(
            self.timeout,
            "update room record id",
            self.stores
                .rooms
                .update_record_id(&egress.room_name, &egress.egress_id),
        )
        .await
    }

    async fn on_egress_ended(&self, egress: &EgressInfo) -> AppResult<()> {
        let completion = completion_for(egress);
        let room = egress.room_name.as_str();
        if egress.status.is_failure() {
            tracing::warn!(
                egress_id = %egress.egress_id,
                room,
                status = ?egress.status,
                error = %egress.error,
                "egress ended without output"
            );
        } else {
            tracing::info!(egress_id = %egress.egress_id, room, status = ?egress.status, "egress ended");
        }

        let mut first_error: Option<AppError> = None;
        if let Err(e) = with_timeout(
            self.timeout,
            "update recording job",
            self.stores
                .recordings
                .update_job_by_egress_id(&egress.egress_id, &completion),
        )
        .await
        {
            tracing::error!(egress_id = %egress.egress_id, error = %e, "failed to finalize recording job");
            first_error.get_or_insert(e);
        }

        if !room.is_empty() {
            if let Err(e) = with_timeout(
                self.timeout,
                "clear room record status",
                self.stores.rooms.update_record_status(room, false),
            )
            .await
            {
                tracing::error!(room, error = %e, "failed to clear room record status");
                first_error.get_or_insert(e);
            }

            {
                let mut recordings = self.room_recordings.lock();
                let owned = match recordings.get(room) {
                    Some(RoomRecording::Recording(id)) => id == &egress.egress_id,
                    Some(RoomRecording::Starting) => true,
                    None => false,
                };
                if owned {
                    recordings.remove(room);
                }
            }

            let payload = json!({
                "status": "stopRecord",
                "timestamp": chrono::Utc::now().timestamp(),
                "room": room,
                "egressId": egress.egress_id,
                "result": completion.status.as_str(),
            });
            if let Err(e) = self
                .hub
                .broadcast_and_publish(room, EventKind::RecordingStatus, payload)
                .await
            {
                tracing::warn!(room, error = %e, "failed to announce recording stop");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
