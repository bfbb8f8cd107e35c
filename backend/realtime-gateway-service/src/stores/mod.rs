//! Persistence collaborators consumed by the realtime core.
//!
//! Only the narrow get/update surface the orchestrator needs lives here;
//! the CRUD side of rooms and recordings belongs to other services.

use crate::error::AppResult;
use crate::models::{JobCompletion, ParticipantStatus, RecordingJob, RoomConfig};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStores;
pub use postgres::PgStores;

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get_by_room(&self, room: &str) -> AppResult<Option<RoomConfig>>;
    async fn update_status(&self, room: &str, status: &str) -> AppResult<()>;
    async fn update_record_status(&self, room: &str, recording: bool) -> AppResult<()>;
    async fn update_record_id(&self, room: &str, egress_id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn update_status(&self, room: &str, identity: &str, status: ParticipantStatus) -> AppResult<()>;
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn create_job(&self, job: &RecordingJob) -> AppResult<()>;
    async fn update_job_by_egress_id(&self, egress_id: &str, completion: &JobCompletion) -> AppResult<()>;
    async fn get_by_egress_id(&self, egress_id: &str) -> AppResult<Option<RecordingJob>>;
    /// Number of jobs currently in `recording` status.
    async fn count_active(&self) -> AppResult<usize>;
}

/// The three collaborator stores, usually backed by one object.
#[derive(Clone)]
pub struct Stores {
    pub rooms: Arc<dyn RoomStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub recordings: Arc<dyn RecordingStore>,
}

impl Stores {
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: RoomStore + ParticipantStore + RecordingStore + 'static,
    {
        Self {
            rooms: backend.clone(),
            participants: backend.clone(),
            recordings: backend,
        }
    }
}
