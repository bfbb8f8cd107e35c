//! Webhook authenticity check.
//!
//! The provider signs each delivery with an HS256 JWT in the `Authorization`
//! header. The token's issuer is the API key and its `sha256` claim is the
//! base64 SHA-256 digest of the raw request body.

use crate::config::LiveKitConfig;
use crate::error::{AppError, AppResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct WebhookClaims {
    #[serde(default)]
    sha256: String,
}

pub struct WebhookVerifier {
    api_key: String,
    key: DecodingKey,
}

impl WebhookVerifier {
    pub fn new(config: &LiveKitConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            key: DecodingKey::from_secret(config.api_secret.as_bytes()),
        }
    }

    pub fn verify(&self, authorization: Option<&str>, body: &[u8]) -> AppResult<()> {
        let token = authorization
            .map(str::trim)
            .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing webhook signature".into()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);
        validation.leeway = 60;

        let claims = decode::<WebhookClaims>(token, &self.key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("invalid webhook token: {e}")))?
            .claims;

        let digest = BASE64.encode(Sha256::digest(body));
        if claims.sha256 != digest {
            return Err(AppError::Unauthorized("webhook body digest mismatch".into()));
        }
        Ok(())
    }
}
