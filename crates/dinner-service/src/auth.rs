//! Authentication extractors.
//!
//! - `AuthUser` - a signed-in user, from the session JWT (HS256)
//! - `MaybeAuthUser` - the same, but the header is optional
//! - `AdminAuth` - admin API key for the maintenance endpoints

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use dinner_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a session JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// Email claim, when present.
    pub email: Option<String>,
}

impl AuthUser {
    /// Reject requests acting on behalf of someone else.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` if `user_id` isn't the authenticated user.
    pub fn ensure_owner(&self, user_id: &UserId) -> Result<(), ApiError> {
        if self.user_id == *user_id {
            Ok(())
        } else {
            tracing::warn!(
                session_user = %self.user_id,
                requested_user = %user_id,
                "Session does not match requested user"
            );
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state)?.ok_or(ApiError::Unauthorized)
    }
}

/// An optional session: `None` without an `Authorization` header.
///
/// A header that is present but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    /// When a session is present, require it to belong to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` on mismatch.
    pub fn ensure_owner(&self, user_id: &UserId) -> Result<(), ApiError> {
        self.0
            .as_ref()
            .map_or(Ok(()), |user| user.ensure_owner(user_id))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).map(MaybeAuthUser)
    }
}

/// Admin authentication via the `X-Admin-Key` header.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(admin_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

/// Session JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Expiration time.
    pub exp: i64,
    /// Email.
    #[serde(default)]
    pub email: Option<String>,
    /// Role (e.g. "authenticated").
    #[serde(default)]
    pub role: Option<String>,
}

/// Extract the session from the `Authorization` header, if there is one.
fn authenticate(parts: &Parts, state: &AppState) -> Result<Option<AuthUser>, ApiError> {
    let Some(auth_header) = parts.headers.get("authorization") else {
        return Ok(None);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = validate_jwt(token, state)?;
    let user_id = claims
        .sub
        .parse::<UserId>()
        .map_err(|_| ApiError::Unauthorized)?;

    Ok(Some(AuthUser {
        user_id,
        email: claims.email,
    }))
}

/// Validate an HS256 session JWT.
fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let Some(secret) = &state.config.jwt_secret else {
        tracing::warn!("JWT secret not configured - rejecting session token");
        return Err(ApiError::Unauthorized);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[&state.config.auth_audience]);

    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })
}
