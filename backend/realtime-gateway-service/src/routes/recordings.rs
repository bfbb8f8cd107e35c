/// Manual recording control
///
/// Every start goes through admission control, so manual and automatic
/// recordings share the same global limit.
use crate::error::AppError;
use crate::models::RecordType;
use crate::services::{RecordingRequest, TrackPair};
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub room: String,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub video_track_id: Option<String>,
    #[serde(default)]
    pub audio_track_id: Option<String>,
}

impl StartRecordingRequest {
    fn into_request(self) -> Result<RecordingRequest, AppError> {
        let room = self.room.trim().to_string();
        if room.is_empty() {
            return Err(AppError::BadRequest("room is required".into()));
        }
        let record_type = match self.record_type.as_deref().map(str::trim) {
            None | Some("") => RecordType::default(),
            Some(raw) => raw.parse::<RecordType>().map_err(AppError::BadRequest)?,
        };
        let tracks = match (self.video_track_id, self.audio_track_id) {
            (Some(video_track_id), Some(audio_track_id)) => Some(TrackPair {
                video_track_id,
                audio_track_id,
            }),
            _ => None,
        };
        Ok(RecordingRequest {
            room,
            record_type,
            identity: self.identity.filter(|i| !i.trim().is_empty()),
            file_path: self.file_path.filter(|p| !p.trim().is_empty()),
            tracks,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub room: Option<String>,
}

/// **Endpoint**: `GET /record/check`
#[get("/record/check")]
pub async fn check_availability(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let availability = state.admission.availability().await?;
    Ok(HttpResponse::Ok().json(availability))
}

/// **Endpoint**: `POST /record/start`
#[post("/record/start")]
pub async fn start_recording(
    state: web::Data<AppState>,
    request: web::Json<StartRecordingRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner().into_request()?;
    let job = state.admission.start_recording(request).await?;
    Ok(HttpResponse::Ok().json(job))
}

/// **Endpoint**: `POST /record/stop/{egress_id}`
#[post("/record/stop/{egress_id}")]
pub async fn stop_recording(
    state: web::Data<AppState>,
    egress_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let info = state.admission.stop_recording(&egress_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(info))
}

/// **Endpoint**: `POST /record/stopall`
#[post("/record/stopall")]
pub async fn stop_all(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stopped = state.admission.stop_all_active().await?;
    Ok(HttpResponse::Ok().json(json!({ "stopped": stopped })))
}

/// **Endpoint**: `GET /record/list?room=`
#[get("/record/list")]
pub async fn list_recordings(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let room = query.room.as_deref().filter(|r| !r.is_empty());
    let items = state.admission.list_egress(room).await?;
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}
