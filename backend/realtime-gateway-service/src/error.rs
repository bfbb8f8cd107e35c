use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("malformed webhook: {0}")]
    MalformedWebhook(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Event bus or session store could not be reached.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("recording limit reached ({active}/{limit} active)")]
    AdmissionDenied { active: usize, limit: usize },

    #[error("media provider call failed: {0}")]
    ProviderCallFailed(String),

    #[error("webhook queue is full")]
    QueueFull,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::MalformedWebhook(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::NotFound(_) => 404,
            AppError::AdmissionDenied { .. } => 409,
            AppError::ProviderCallFailed(_) => 502,
            AppError::QueueFull
            | AppError::TransportUnavailable(_)
            | AppError::ServiceUnavailable(_) => 503,
            AppError::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start_server",
            AppError::BadRequest(_) => "bad_request",
            AppError::MalformedWebhook(_) => "malformed_webhook",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::TransportUnavailable(_) => "transport_unavailable",
            AppError::AdmissionDenied { .. } => "admission_denied",
            AppError::ProviderCallFailed(_) => "provider_call_failed",
            AppError::QueueFull => "queue_full",
            AppError::Timeout(_) => "timeout",
            AppError::Database(_) => "database",
            AppError::Redis(_) => "redis",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    /// Returns whether a later attempt could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransportUnavailable(_)
                | AppError::ProviderCallFailed(_)
                | AppError::Timeout(_)
                | AppError::Redis(_)
                | AppError::QueueFull
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            AppError::TransportUnavailable(e.to_string())
        } else {
            AppError::Redis(e.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::ProviderCallFailed(e.to_string())
        }
    }
}
