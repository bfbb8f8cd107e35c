use super::livekit::MediaProvider;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{EgressInfo, RecordType, RecordingJob};
use crate::resilience::with_timeout;
use crate::stores::{RecordingStore, RoomStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPair {
    pub video_track_id: String,
    pub audio_track_id: String,
}

#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub room: String,
    pub record_type: RecordType,
    /// Participant a track-composite recording belongs to.
    pub identity: Option<String>,
    /// Defaults to `{record_path}/{room}[-{identity}]-{unix_ts}.{ext}`.
    pub file_path: Option<String>,
    /// Required for track-composite recordings.
    pub tracks: Option<TrackPair>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub active: usize,
    pub limit: usize,
}

/// Global limit on concurrent recordings.
///
/// The count comes from the recording store and is re-read right before each
/// provider call. Two concurrent starts can both pass the check; the provider
/// rejects the overshoot.
pub struct RecordingAdmission {
    provider: Arc<dyn MediaProvider>,
    recordings: Arc<dyn RecordingStore>,
    rooms: Arc<dyn RoomStore>,
    limit: usize,
    record_path: String,
    timeout: Duration,
}

fn file_stem(room: &str) -> String {
    room.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl RecordingAdmission {
    pub fn new(
        provider: Arc<dyn MediaProvider>,
        recordings: Arc<dyn RecordingStore>,
        rooms: Arc<dyn RoomStore>,
        limit: usize,
        record_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            recordings,
            rooms,
            limit,
            record_path: record_path.into(),
            timeout,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn availability(&self) -> AppResult<Availability> {
        let active = with_timeout(self.timeout, "count active recordings", self.recordings.count_active()).await?;
        Ok(Availability {
            available: active < self.limit,
            active,
            limit: self.limit,
        })
    }

    pub async fn is_available(&self) -> AppResult<bool> {
        Ok(self.availability().await?.available)
    }

    /// Per-participant paths include the identity.
    pub fn default_file_path(&self, room: &str, identity: Option<&str>, record_type: RecordType) -> String {
        let ts = chrono::Utc::now().timestamp();
        let stem = match identity {
            Some(identity) => format!("{}-{}", file_stem(room), file_stem(identity)),
            None => file_stem(room),
        };
        format!(
            "{}/{stem}-{ts}.{}",
            self.record_path.trim_end_matches('/'),
            record_type.file_extension()
        )
    }

    /// Starts a recording if the global limit allows it.
    ///
    /// Mirroring the job into the stores is best-effort once the provider has
    /// accepted the start.
    pub async fn start_recording(&self, request: RecordingRequest) -> AppResult<RecordingJob> {
        let availability = self.availability().await?;
        if !availability.available {
            metrics::RECORDINGS_DENIED.inc();
            tracing::warn!(
                room = %request.room,
                active = availability.active,
                limit = availability.limit,
                "recording admission denied"
            );
            return Err(AppError::AdmissionDenied {
                active: availability.active,
                limit: availability.limit,
            });
        }

        let room = request.room.as_str();
        let file_path = request
            .file_path
            .clone()
            .unwrap_or_else(|| self.default_file_path(room, request.identity.as_deref(), request.record_type));

        let egress = match (request.record_type, &request.tracks) {
            (RecordType::TrackComposite, Some(tracks)) => {
                with_timeout(
                    self.timeout,
                    "StartTrackCompositeEgress",
                    self.provider.start_track_composite_egress(
                        room,
                        &tracks.video_track_id,
                        &tracks.audio_track_id,
                        &file_path,
                    ),
                )
                .await?
            }
            (RecordType::TrackComposite, None) => {
                return Err(AppError::BadRequest(
                    "track-composite recording needs a video and an audio track".into(),
                ))
            }
            (record_type, _) => {
                let audio_only = record_type == RecordType::RoomCompositeAudio;
                with_timeout(
                    self.timeout,
                    "StartRoomCompositeEgress",
                    self.provider.start_composite_egress(room, audio_only, &file_path),
                )
                .await?
            }
        };

        let job = RecordingJob::started(
            egress.egress_id.clone(),
            room.to_string(),
            request.record_type,
            file_path,
        );
        metrics::RECORDINGS_STARTED
            .with_label_values(&[request.record_type.as_str()])
            .inc();
        tracing::info!(room, egress_id = %job.egress_id, record_type = %request.record_type, "recording started");

        if let Err(e) = with_timeout(self.timeout, "create recording job", self.recordings.create_job(&job)).await {
            tracing::error!(room, egress_id = %job.egress_id, error = %e, "failed to persist recording job");
        }
        if let Err(e) = with_timeout(self.timeout, "update room record status", self.rooms.update_record_status(room, true)).await {
            tracing::error!(room, error = %e, "failed to flag room as recording");
        }
        if let Err(e) = with_timeout(self.timeout, "update room record id", self.rooms.update_record_id(room, &job.egress_id)).await {
            tracing::error!(room, error = %e, "failed to store room record id");
        }

        Ok(job)
    }

    pub async fn stop_recording(&self, egress_id: &str) -> AppResult<EgressInfo> {
        let info = with_timeout(self.timeout, "StopEgress", self.provider.stop_egress(egress_id)).await?;
        tracing::info!(egress_id, status = ?info.status, "recording stop requested");
        Ok(info)
    }

    pub async fn list_egress(&self, room: Option<&str>) -> AppResult<Vec<EgressInfo>> {
        with_timeout(self.timeout, "ListEgress", self.provider.list_egress(room)).await
    }

    /// Stops every active egress. Failures are logged and skipped; only the
    /// egresses that were successfully signalled are returned.
    pub async fn stop_all_active(&self) -> AppResult<Vec<String>> {
        let egresses = self.list_egress(None).await?;
        let mut stopped = Vec::new();

        for egress in egresses.into_iter().filter(|e| e.status.is_active()) {
            match self.stop_recording(&egress.egress_id).await {
                Ok(_) => stopped.push(egress.egress_id),
                Err(e) => {
                    tracing::warn!(egress_id = %egress.egress_id, error = %e, "failed to stop egress");
                }
            }
        }

        tracing::info!(stopped = stopped.len(), "stop-all completed");
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::livekit::UnconfiguredProvider;
    use crate::stores::MemoryStores;

    fn admission(stores: Arc<MemoryStores>, limit: usize) -> RecordingAdmission {
        RecordingAdmission::new(
            Arc::new(UnconfiguredProvider),
            stores.clone(),
            stores,
            limit,
            "/out/",
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_default_file_path() {
        let admission = admission(Arc::new(MemoryStores::new()), 4);
        let video = admission.default_file_path("r1", None, RecordType::RoomCompositeVideoAudio);
        assert!(video.starts_with("/out/r1-"));
        assert!(video.ends_with(".mp4"));
        let audio = admission.default_file_path("../etc", None, RecordType::RoomCompositeAudio);
        assert!(audio.starts_with("/out/___etc-"));
        assert!(audio.ends_with(".ogg"));
    }

    #[test]
    fn test_track_composite_paths_differ_per_participant() {
        let admission = admission(Arc::new(MemoryStores::new()), 4);
        let alice = admission.default_file_path("r1", Some("alice"), RecordType::TrackComposite);
        let bob = admission.default_file_path("r1", Some("bob"), RecordType::TrackComposite);
        assert_ne!(alice, bob);
        assert!(alice.starts_with("/out/r1-alice-"));
        assert!(bob.starts_with("/out/r1-bob-"));
    }

    #[tokio::test]
    async fn test_availability_counts_recording_jobs() {
        let stores = Arc::new(MemoryStores::new());
        let admission = admission(stores.clone(), 1);
        assert!(admission.is_available().await.unwrap());

        stores
            .create_job(&RecordingJob::started(
                "EG_1".into(),
                "r1".into(),
                RecordType::TrackComposite,
                "/out/r1.mp4".into(),
            ))
            .await
            .unwrap();
        let availability = admission.availability().await.unwrap();
        assert_eq!(
            availability,
            Availability {
                available: false,
                active: 1,
                limit: 1
            }
        );
    }

    #[tokio::test]
    async fn test_track_composite_without_tracks_rejected() {
        let admission = admission(Arc::new(MemoryStores::new()), 4);
        let err = admission
            .start_recording(RecordingRequest {
                room: "r1".into(),
                record_type: RecordType::TrackComposite,
                identity: Some("alice".into()),
                file_path: None,
                tracks: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
