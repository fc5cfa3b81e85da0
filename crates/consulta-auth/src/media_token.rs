//! Media token issuer
//!
//! Short-lived HS256 tokens a participant presents to the media relay. The core
//! treats them as opaque strings.

use async_trait::async_trait;
use chrono::Duration;
use consulta_core::error::AppError;
use consulta_core::models::{MediaToken, SessionId, UserId};
use consulta_core::traits::TokenIssuer;
use consulta_core::Clock;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

const MEDIA_AUDIENCE: &str = "consulta-media";

/// Claims of a media token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaClaims {
    /// Participant user id
    pub sub: String,
    /// Session the token is valid for
    pub sid: SessionId,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs media tokens with a shared secret
pub struct JwtMediaTokenIssuer {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtMediaTokenIssuer {
    pub fn new(secret: &str, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: Duration::seconds(ttl_secs),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Decode a media token, checking signature and audience
    pub fn verify(&self, token: &str) -> Result<MediaClaims, AppError> {
        let mut validation = Validation::default();
        validation.set_audience(&[MEDIA_AUDIENCE]);
        // expiry is judged against the injected clock below
        validation.validate_exp = false;

        let claims = decode::<MediaClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::InvalidToken(format!("Media token rejected: {}", e)))?
            .claims;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(AppError::TokenExpired);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtMediaTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtMediaTokenIssuer")
            .field("ttl_secs", &self.ttl.num_seconds())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenIssuer for JwtMediaTokenIssuer {
    async fn issue_media_token(
        &self,
        session_id: SessionId,
        participant_id: UserId,
    ) -> Result<MediaToken, AppError> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = MediaClaims {
            sub: participant_id.to_string(),
            sid: session_id,
            aud: MEDIA_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "Failed to sign media token");
            AppError::Internal(format!("Media token creation failed: {}", e))
        })?;

        debug!(%session_id, participant_id, "Issued media token");
        Ok(MediaToken {
            session_id,
            participant_id,
            token,
            expires_at,
        })
    }
}
