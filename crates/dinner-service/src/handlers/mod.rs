//! API handlers.

pub mod admin;
pub mod checkout;
pub mod health;
pub mod recipes;
pub mod subscription;
pub mod webhooks;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use dinner_core::UserId;

use crate::error::ApiError;

/// Unwrap a JSON body, turning extractor rejections into `400`s.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// Parse a required `userId` field.
pub(crate) fn require_user_id(raw: Option<&str>) -> Result<UserId, ApiError> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("User ID is required".into()))?;
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user ID: {raw}")))
}
