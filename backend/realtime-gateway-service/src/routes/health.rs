use crate::error::AppError;
use crate::metrics as gateway_metrics;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde_json::json;

/// **Endpoint**: `GET /health`
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let orchestrator = state.orchestrator.health();
    let body = json!({
        "status": if orchestrator.healthy { "ok" } else { "degraded" },
        "instanceId": state.config.instance_id,
        "orchestrator": orchestrator,
        "eventBus": if state.hub.bus().is_enabled() { "enabled" } else { "disabled" },
        "sessionStore": state.hub.sessions().backend_name(),
        "connections": state.hub.connection_count().await,
    });

    if orchestrator.healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// **Endpoint**: `GET /metrics`
#[get("/metrics")]
pub async fn metrics_endpoint() -> Result<HttpResponse, AppError> {
    let (body, content_type) = gateway_metrics::render().map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().content_type(content_type).body(body))
}

/// Cluster-wide presence for a room, read from the session store.
///
/// **Endpoint**: `GET /rooms/{room}/sessions`
#[get("/rooms/{room}/sessions")]
pub async fn room_sessions(
    state: web::Data<AppState>,
    room: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let room = room.into_inner();
    let sessions = state.hub.list_sessions(&room).await?;
    Ok(HttpResponse::Ok().json(json!({
        "room": room,
        "sessions": sessions,
    })))
}
