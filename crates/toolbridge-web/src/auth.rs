//! Bearer-token authentication.
//!
//! Tokens are HMAC-SHA256 signed with the server secret using `ring`:
//!
//! ```text
//! base64url(user_id "." expiry) "." base64url(hmac(first_part))
//! ```
//!
//! `expiry` is a unix timestamp in seconds. The signature covers the
//! encoded payload exactly as it appears in the token, so verification never
//! has to re-encode anything.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ring::hmac;
use thiserror::Error;

use toolbridge_agent::AuthContext;

use crate::error::ApiError;
use crate::state::AppState;

/// Lifetime of tokens issued without an explicit TTL.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Why a token was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("user id must not be empty")]
    EmptyUser,
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Issues and verifies signed bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: Arc<hmac::Key>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            key: Arc::new(hmac::Key::new(hmac::HMAC_SHA256, secret)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id`, valid for the signer's TTL from now.
    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.issue_until(user_id, Utc::now().timestamp().saturating_add(ttl))
    }

    /// Issue a token for `user_id` that expires at `expires_at`.
    pub fn issue_until(&self, user_id: &str, expires_at: i64) -> Result<String, AuthError> {
        if user_id.trim().is_empty() {
            return Err(AuthError::EmptyUser);
        }
        let payload = URL_SAFE_NO_PAD.encode(format!("{user_id}.{expires_at}"));
        let tag = hmac::sign(&self.key, payload.as_bytes());
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }

    /// Check `token` and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        hmac::verify(&self.key, payload.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)?;

        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        // User ids may contain dots; the expiry never does.
        let (user_id, expiry) = decoded.rsplit_once('.').ok_or(AuthError::Malformed)?;
        let expiry: i64 = expiry.parse().map_err(|_| AuthError::Malformed)?;

        if Utc::now().timestamp() >= expiry {
            return Err(AuthError::Expired);
        }
        if user_id.is_empty() {
            return Err(AuthError::EmptyUser);
        }
        Ok(user_id.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The authenticated caller of a request.
///
/// Extracting it rejects the request with `401` unless an
/// `Authorization: Bearer <token>` header carries a valid token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthContext);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let user_id = state.signer.verify(token).inspect_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
        })?;
        Ok(Self(AuthContext::new(token, user_id)))
    }
}
