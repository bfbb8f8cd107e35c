/// Media provider webhook intake
///
/// Validates and enqueues; the orchestrator runs on the webhook workers so
/// the provider is acknowledged before any store or provider call happens.
use crate::error::AppError;
use crate::metrics;
use crate::models::WebhookEvent;
use crate::state::AppState;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::json;

const SUPPORTED_PROVIDER: &str = "livekit";

fn reject(reason: &str, err: AppError) -> AppError {
    metrics::WEBHOOK_REJECTIONS.with_label_values(&[reason]).inc();
    tracing::warn!(reason, error = %err, "webhook rejected");
    err
}

/// **Endpoint**: `POST /webhook/{provider}`
#[post("/webhook/{provider}")]
pub async fn receive_webhook(
    state: web::Data<AppState>,
    provider: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let provider = provider.into_inner();
    if provider != SUPPORTED_PROVIDER {
        return Err(reject(
            "unknown_provider",
            AppError::NotFound(format!("webhook provider {provider}")),
        ));
    }

    if let Some(verifier) = &state.webhook_verifier {
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        verifier
            .verify(authorization, &body)
            .map_err(|e| reject("signature", e))?;
    }

    let event = WebhookEvent::from_slice(&body).map_err(|e| reject("malformed", e))?;
    tracing::debug!(event = %event.name(), "webhook accepted");

    state.webhooks.submit(event).map_err(|e| match e {
        AppError::QueueFull => reject("queue_full", e),
        other => reject("unavailable", other),
    })?;

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}
