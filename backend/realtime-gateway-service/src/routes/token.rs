use crate::error::AppError;
use crate::services::TokenRequest;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};
use serde_json::json;

/// Issues a participant access token for the media provider.
///
/// **Endpoint**: `POST /token`
#[post("/token")]
pub async fn issue_token(
    state: web::Data<AppState>,
    request: web::Json<TokenRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let token = state.provider.issue_token(&request).await?;
    tracing::info!(room = %request.room, identity = %request.identity, "access token issued");

    Ok(HttpResponse::Ok().json(json!({
        "token": token,
        "room": request.room,
    })))
}
