use super::{ParticipantStore, RecordingStore, RoomStore};
use crate::error::{AppError, AppResult};
use crate::models::{JobCompletion, ParticipantStatus, RecordType, RecordingJob, RecordingStatus, RoomConfig};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

/// Postgres-backed stores over `room_conference`, `room_participant` and `record_media`.
#[derive(Clone)]
pub struct PgStores {
    pool: Pool,
}

impl PgStores {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn room_from_row(row: &Row) -> RoomConfig {
    let record_type: Option<String> = row.get("record_type");
    RoomConfig {
        room: row.get("room"),
        status: row.get("status"),
        auto_record: row.get("auto_record"),
        record_type: record_type.and_then(|t| t.parse().ok()),
        record_status: row.get("record_status"),
        record_id: row.get("record_id"),
    }
}

fn job_from_row(row: &Row) -> AppResult<RecordingJob> {
    let record_type: String = row.get("record_type");
    let status: String = row.get("status");
    Ok(RecordingJob {
        egress_id: row.get("egress_id"),
        room: row.get("room"),
        record_type: record_type.parse::<RecordType>().map_err(AppError::Database)?,
        status: status.parse::<RecordingStatus>().map_err(AppError::Database)?,
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        duration_seconds: row.get("duration"),
    })
}

#[async_trait]
impl RoomStore for PgStores {
    async fn get_by_room(&self, room: &str) -> AppResult<Option<RoomConfig>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT room, status, auto_record, record_type, record_status, record_id
                FROM room_conference
                WHERE room = $1
                LIMIT 1
                "#,
                &[&room],
            )
            .await?;
        Ok(row.as_ref().map(room_from_row))
    }

    async fn update_status(&self, room: &str, status: &str) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE room_conference SET status = $2, updated_at = NOW() WHERE room = $1",
                &[&room, &status],
            )
            .await?;
        Ok(())
    }

    async fn update_record_status(&self, room: &str, recording: bool) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE room_conference SET record_status = $2, updated_at = NOW() WHERE room = $1",
                &[&room, &recording],
            )
            .await?;
        Ok(())
    }

    async fn update_record_id(&self, room: &str, egress_id: &str) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE room_conference SET record_id = $2, updated_at = NOW() WHERE room = $1",
                &[&room, &egress_id],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for PgStores {
    async fn update_status(&self, room: &str, identity: &str, status: ParticipantStatus) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO room_participant (room, identity, status)
                VALUES ($1, $2, $3)
                ON CONFLICT (room, identity)
                DO UPDATE SET status = EXCLUDED.status, updated_at = NOW()
                "#,
                &[&room, &identity, &status.as_str()],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordingStore for PgStores {
    async fn create_job(&self, job: &RecordingJob) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO record_media
                    (egress_id, room, record_type, status, file_name, file_path, file_size, duration)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
                &[
                    &job.egress_id,
                    &job.room,
                    &job.record_type.as_str(),
                    &job.status.as_str(),
                    &job.file_name,
                    &job.file_path,
                    &job.file_size,
                    &job.duration_seconds,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_job_by_egress_id(&self, egress_id: &str, completion: &JobCompletion) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE record_media
                SET status = $2,
                    file_name = $3,
                    file_path = $4,
                    file_size = $5,
                    duration = $6,
                    completed_at = NOW()
                WHERE egress_id = $1
                "#,
                &[
                    &egress_id,
                    &completion.status.as_str(),
                    &completion.file_name,
                    &completion.file_path,
                    &completion.file_size,
                    &completion.duration_seconds,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_by_egress_id(&self, egress_id: &str) -> AppResult<Option<RecordingJob>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT egress_id, room, record_type, status, file_name, file_path, file_size, duration
                FROM record_media
                WHERE egress_id = $1
                "#,
                &[&egress_id],
            )
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn count_active(&self) -> AppResult<usize> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM record_media WHERE status = 'recording'", &[])
            .await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as usize)
    }
}
