use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Media provider (LiveKit) credentials.
#[derive(Debug, Clone)]
pub struct LiveKitConfig {
    pub host: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Maximum number of recordings in `recording` status at once.
    pub egress_limit: usize,
    pub record_path: String,
    pub max_track_data_size: usize,
    pub inactivity_timeout: Duration,
    /// Identities starting with this prefix belong to the provider's recorder.
    pub recording_identity_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            egress_limit: 4,
            record_path: "/out".to_string(),
            max_track_data_size: 10_000,
            inactivity_timeout: Duration::from_secs(30 * 60),
            recording_identity_prefix: "EG_".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub verify_signature: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            verify_signature: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub redis_connect_timeout: Duration,
    pub database_url: Option<String>,
    pub database_max_connections: usize,
    pub livekit: Option<LiveKitConfig>,
    pub recording: RecordingConfig,
    pub session: SessionConfig,
    pub webhook: WebhookConfig,
    /// Deadline applied to every provider API call and store write.
    pub downstream_timeout: Duration,
    pub event_bus_channel: String,
    /// Identifies this process on the event bus.
    pub instance_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let livekit = match (
            optional("LIVEKIT_HOST"),
            optional("LIVEKIT_API_KEY"),
            optional("LIVEKIT_API_SECRET"),
        ) {
            (Some(host), Some(api_key), Some(api_secret)) => Some(LiveKitConfig {
                host: host.trim_end_matches('/').to_string(),
                api_key,
                api_secret,
            }),
            _ => {
                tracing::warn!("LiveKit configuration is incomplete, media provider disabled");
                None
            }
        };

        let recording = RecordingConfig {
            egress_limit: parse_or("EGRESS_LIMIT", 4)?,
            record_path: optional("RECORD_PATH").unwrap_or_else(|| "/out".to_string()),
            max_track_data_size: parse_or("MAX_TRACK_DATA_SIZE", 10_000)?,
            inactivity_timeout: Duration::from_secs(parse_or("INACTIVITY_TIMEOUT_SECS", 1800)?),
            recording_identity_prefix: optional("RECORDING_IDENTITY_PREFIX")
                .unwrap_or_else(|| "EG_".to_string()),
        };

        let session = SessionConfig {
            ttl: Duration::from_secs(parse_or("SESSION_TTL_SECS", 86_400)?),
            sweep_interval: Duration::from_secs(parse_or("SESSION_SWEEP_INTERVAL_SECS", 3600)?),
        };

        let webhook = WebhookConfig {
            workers: parse_or("WEBHOOK_WORKERS", 4)?,
            queue_capacity: parse_or("WEBHOOK_QUEUE_CAPACITY", 256)?,
            verify_signature: parse_or("WEBHOOK_VERIFY", livekit.is_some())?,
        };
        if webhook.workers == 0 || webhook.queue_capacity == 0 {
            return Err(AppError::Config(
                "WEBHOOK_WORKERS and WEBHOOK_QUEUE_CAPACITY must be positive".into(),
            ));
        }
        if webhook.verify_signature && livekit.is_none() {
            return Err(AppError::Config(
                "WEBHOOK_VERIFY requires LIVEKIT_API_KEY and LIVEKIT_API_SECRET".into(),
            ));
        }

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            redis_url: optional("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
            redis_connect_timeout: Duration::from_millis(parse_or(
                "REDIS_CONNECT_TIMEOUT_MS",
                5000,
            )?),
            database_url: optional("DATABASE_URL"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 16)?,
            livekit,
            recording,
            session,
            webhook,
            downstream_timeout: Duration::from_millis(parse_or("DOWNSTREAM_TIMEOUT_MS", 5000)?),
            event_bus_channel: optional("EVENT_BUS_CHANNEL")
                .unwrap_or_else(|| "socket:events".to_string()),
            instance_id: optional("INSTANCE_ID")
                .unwrap_or_else(|| format!("gateway-{}", uuid::Uuid::new_v4())),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        let value: usize = parse_or("GATEWAY_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        env::set_var("GATEWAY_TEST_BAD_NUMBER", "seven");
        let result: Result<usize, _> = parse_or("GATEWAY_TEST_BAD_NUMBER", 7);
        assert!(matches!(result, Err(AppError::Config(_))));
        env::remove_var("GATEWAY_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_recording_defaults() {
        let cfg = RecordingConfig::default();
        assert_eq!(cfg.egress_limit, 4);
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(1800));
        assert_eq!(SessionConfig::default().ttl, Duration::from_secs(86_400));
    }
}
