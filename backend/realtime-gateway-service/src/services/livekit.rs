//! Media provider client.
//!
//! LiveKit exposes its server API over Twirp: every RPC is a JSON `POST` to
//! `{host}/twirp/livekit.<Service>/<Method>` authenticated by a short-lived
//! HS256 token signed with the API secret.

use crate::config::LiveKitConfig;
use crate::error::{AppError, AppResult};
use crate::models::EgressInfo;
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SERVER_TOKEN_TTL_SECS: u64 = 10 * 60;
const PARTICIPANT_TOKEN_TTL_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub room: String,
    pub identity: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Records the whole room, mixed server-side.
    async fn start_composite_egress(&self, room: &str, audio_only: bool, file_path: &str) -> AppResult<EgressInfo>;

    /// Records one participant's camera and microphone tracks.
    async fn start_track_composite_egress(
        &self,
        room: &str,
        video_track_id: &str,
        audio_track_id: &str,
        file_path: &str,
    ) -> AppResult<EgressInfo>;

    async fn stop_egress(&self, egress_id: &str) -> AppResult<EgressInfo>;

    /// Lists egresses, optionally restricted to one room.
    async fn list_egress(&self, room: Option<&str>) -> AppResult<Vec<EgressInfo>>;

    /// Issues a participant access token for joining `request.room`.
    async fn issue_token(&self, request: &TokenRequest) -> AppResult<String>;

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct VideoGrant {
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_join: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_admin: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    room_record: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_publish_data: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AccessClaims {
    iss: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
    nbf: u64,
    exp: u64,
    video: VideoGrant,
}

#[derive(Debug, Deserialize)]
struct ListEgressResponse {
    #[serde(default)]
    items: Vec<EgressInfo>,
}

fn unix_now() -> AppResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Twirp endpoints live on the HTTP(S) origin of the signalling URL.
fn http_base(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = host.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        host.to_string()
    }
}

pub struct LiveKitClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl LiveKitClient {
    pub fn new(config: &LiveKitConfig, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: http_base(&config.host),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    fn sign(&self, claims: &AccessClaims) -> AppResult<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    fn server_token(&self) -> AppResult<String> {
        let now = unix_now()?;
        self.sign(&AccessClaims {
            iss: self.api_key.clone(),
            sub: String::new(),
            name: None,
            metadata: None,
            nbf: now,
            exp: now + SERVER_TOKEN_TTL_SECS,
            video: VideoGrant {
                room_admin: true,
                room_record: true,
                ..VideoGrant::default()
            },
        })
    }

    async fn twirp<T: serde::de::DeserializeOwned>(&self, method: &str, body: Value) -> AppResult<T> {
        let url = format!("{}/twirp/livekit.Egress/{method}", self.base_url);
        let token = self.server_token()?;

        tracing::debug!(method, "calling media provider");
        let response = self.http.post(&url).bearer_auth(token).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderCallFailed(format!(
                "{method} returned {status}: {detail}"
            )));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl MediaProvider for LiveKitClient {
    async fn start_composite_egress(&self, room: &str, audio_only: bool, file_path: &str) -> AppResult<EgressInfo> {
        self.twirp(
            "StartRoomCompositeEgress",
            json!({
                "room_name": room,
                "layout": "grid",
                "audio_only": audio_only,
                "file_outputs": [{ "filepath": file_path }],
            }),
        )
        .await
    }

    async fn start_track_composite_egress(
        &self,
        room: &str,
        video_track_id: &str,
        audio_track_id: &str,
        file_path: &str,
    ) -> AppResult<EgressInfo> {
        self.twirp(
            "StartTrackCompositeEgress",
            json!({
                "room_name": room,
                "video_track_id": video_track_id,
                "audio_track_id": audio_track_id,
                "file_outputs": [{ "filepath": file_path }],
            }),
        )
        .await
    }

    async fn stop_egress(&self, egress_id: &str) -> AppResult<EgressInfo> {
        self.twirp("StopEgress", json!({ "egress_id": egress_id })).await
    }

    async fn list_egress(&self, room: Option<&str>) -> AppResult<Vec<EgressInfo>> {
        let body = match room {
            Some(room) => json!({ "room_name": room }),
            None => json!({}),
        };
        let response: ListEgressResponse = self.twirp("ListEgress", body).await?;
        Ok(response.items)
    }

    async fn issue_token(&self, request: &TokenRequest) -> AppResult<String> {
        if request.room.trim().is_empty() || request.identity.trim().is_empty() {
            return Err(AppError::BadRequest("room and identity are required".into()));
        }
        let now = unix_now()?;
        self.sign(&AccessClaims {
            iss: self.api_key.clone(),
            sub: request.identity.clone(),
            name: request.name.clone(),
            metadata: request.metadata.clone(),
            nbf: now,
            exp: now + PARTICIPANT_TOKEN_TTL_SECS,
            video: VideoGrant {
                room: Some(request.room.clone()),
                room_join: true,
                can_publish: Some(true),
                can_subscribe: Some(true),
                can_publish_data: Some(true),
                ..VideoGrant::default()
            },
        })
    }
}

/// Stand-in used when LiveKit credentials are absent.
pub struct UnconfiguredProvider;

impl UnconfiguredProvider {
    fn error() -> AppError {
        AppError::ProviderCallFailed("media provider not configured".into())
    }
}

#[async_trait]
impl MediaProvider for UnconfiguredProvider {
    async fn start_composite_egress(&self, _room: &str, _audio_only: bool, _file_path: &str) -> AppResult<EgressInfo> {
        Err(Self::error())
    }

    async fn start_track_composite_egress(
        &self,
        _room: &str,
        _video_track_id: &str,
        _audio_track_id: &str,
        _file_path: &str,
    ) -> AppResult<EgressInfo> {
        Err(Self::error())
    }

    async fn stop_egress(&self, _egress_id: &str) -> AppResult<EgressInfo> {
        Err(Self::error())
    }

    async fn list_egress(&self, _room: Option<&str>) -> AppResult<Vec<EgressInfo>> {
        Err(Self::error())
    }

    async fn issue_token(&self, _request: &TokenRequest) -> AppResult<String> {
        Err(Self::error())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    fn client() -> LiveKitClient {
        LiveKitClient::new(
            &LiveKitConfig {
                host: "wss://media.example.com/".into(),
                api_key: "key".into(),
                api_secret: "secret".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_http_base_from_signalling_url() {
        assert_eq!(http_base("wss://lk.example.com/"), "https://lk.example.com");
        assert_eq!(http_base("ws://localhost:7880"), "http://localhost:7880");
        assert_eq!(http_base("https://lk.example.com"), "https://lk.example.com");
        assert_eq!(client().base_url, "https://media.example.com");
    }

    #[tokio::test]
    async fn test_participant_token_claims() {
        let token = client()
            .issue_token(&TokenRequest {
                room: "r1".into(),
                identity: "alice".into(),
                name: Some("Alice".into()),
                metadata: None,
            })
            .await
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&["key"]);
        validation.validate_exp = true;
        let data = decode::<Value>(&token, &DecodingKey::from_secret(b"secret"), &validation).unwrap();
        assert_eq!(data.claims["sub"], "alice");
        assert_eq!(data.claims["video"]["room"], "r1");
        assert_eq!(data.claims["video"]["roomJoin"], true);
        assert!(data.claims["video"].get("roomRecord").is_none());
    }

    #[test]
    fn test_server_token_has_record_grant() {
        let token = client().server_token().unwrap();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        let data = decode::<Value>(&token, &DecodingKey::from_secret(b"secret"), &validation).unwrap();
        assert_eq!(data.claims["video"]["roomRecord"], true);
        assert_eq!(data.claims["video"]["roomAdmin"], true);
    }

    #[tokio::test]
    async fn test_token_requires_room_and_identity() {
        let err = client()
            .issue_token(&TokenRequest {
                room: " ".into(),
                identity: "alice".into(),
                name: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_every_call() {
        let provider = UnconfiguredProvider;
        assert!(!provider.is_configured());
        let err = provider.list_egress(None).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderCallFailed(_)));
    }
}
