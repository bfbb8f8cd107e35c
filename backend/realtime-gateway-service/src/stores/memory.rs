use super::{ParticipantStore, RecordingStore, RoomStore};
use crate::error::AppResult;
use crate::models::{JobCompletion, ParticipantStatus, RecordingJob, RecordingStatus, RoomConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-process stores used when no `DATABASE_URL` is configured, and by tests.
#[derive(Default)]
pub struct MemoryStores {
    rooms: Mutex<HashMap<String, RoomConfig>>,
    participants: Mutex<HashMap<(String, String), ParticipantStatus>>,
    jobs: Mutex<HashMap<String, RecordingJob>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_room(&self, config: RoomConfig) {
        self.rooms.lock().insert(config.room.clone(), config);
    }

    pub fn room(&self, room: &str) -> Option<RoomConfig> {
        self.rooms.lock().get(room).cloned()
    }

    pub fn participant_status(&self, room: &str, identity: &str) -> Option<ParticipantStatus> {
        self.participants
            .lock()
            .get(&(room.to_string(), identity.to_string()))
            .copied()
    }

    pub fn jobs(&self) -> Vec<RecordingJob> {
        self.jobs.lock().values().cloned().collect()
    }
}

#[async_trait]
impl RoomStore for MemoryStores {
    async fn get_by_room(&self, room: &str) -> AppResult<Option<RoomConfig>> {
        Ok(self.room(room))
    }

    async fn update_status(&self, room: &str, status: &str) -> AppResult<()> {
        if let Some(cfg) = self.rooms.lock().get_mut(room) {
            cfg.status = status.to_string();
        }
        Ok(())
    }

    async fn update_record_status(&self, room: &str, recording: bool) -> AppResult<()> {
        if let Some(cfg) = self.rooms.lock().get_mut(room) {
            cfg.record_status = recording;
        }
        Ok(())
    }

    async fn update_record_id(&self, room: &str, egress_id: &str) -> AppResult<()> {
        if let Some(cfg) = self.rooms.lock().get_mut(room) {
            cfg.record_id = Some(egress_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for MemoryStores {
    async fn update_status(&self, room: &str, identity: &str, status: ParticipantStatus) -> AppResult<()> {
        self.participants
            .lock()
            .insert((room.to_string(), identity.to_string()), status);
        Ok(())
    }
}

#[async_trait]
impl RecordingStore for MemoryStores {
    async fn create_job(&self, job: &RecordingJob) -> AppResult<()> {
        self.jobs.lock().insert(job.egress_id.clone(), job.clone());
        Ok(())
    }

    async fn update_job_by_egress_id(&self, egress_id: &str, completion: &JobCompletion) -> AppResult<()> {
        if let Some(job) = self.jobs.lock().get_mut(egress_id) {
            job.status = completion.status;
            job.file_name = completion.file_name.clone();
            job.file_path = completion.file_path.clone();
            job.file_size = completion.file_size;
            job.duration_seconds = completion.duration_seconds;
        }
        Ok(())
    }

    async fn get_by_egress_id(&self, egress_id: &str) -> AppResult<Option<RecordingJob>> {
        Ok(self.jobs.lock().get(egress_id).cloned())
    }

    async fn count_active(&self) -> AppResult<usize> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == RecordingStatus::Recording)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordType;

    #[tokio::test]
    async fn test_count_active_tracks_completion() {
        let stores = MemoryStores::new();
        let job = RecordingJob::started(
            "EG_1".into(),
            "r1".into(),
            RecordType::TrackComposite,
            "/out/r1.mp4".into(),
        );
        stores.create_job(&job).await.unwrap();
        assert_eq!(stores.count_active().await.unwrap(), 1);

        stores
            .update_job_by_egress_id("EG_1", &JobCompletion::failed())
            .await
            .unwrap();
        assert_eq!(stores.count_active().await.unwrap(), 0);
        let stored = stores.get_by_egress_id("EG_1").await.unwrap().unwrap();
        assert_eq!(stored.status, RecordingStatus::Failed);
    }
}
