//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dinner_core::{PlanType, Quota};
use serde::Serialize;

use crate::ai::AiError;
use crate::events::EventError;
use crate::ledger::LedgerError;
use crate::reconcile::ReconcileError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - the session doesn't belong to the user in the request.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A plan quota is exhausted.
    #[error("{quota} quota exceeded")]
    QuotaExceeded {
        /// Which quota.
        quota: Quota,
        /// Effective plan.
        plan: PlanType,
        /// The limit that was hit.
        limit: u32,
    },

    /// The billing provider is unavailable.
    #[error("billing provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The AI provider is unavailable.
    #[error("AI provider unavailable: {0}")]
    AiUnavailable(String),

    /// The AI provider account is out of credit.
    #[error("AI provider balance exhausted")]
    InsufficientBalance,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required".to_string(),
                None,
            ),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Session does not match the requested user".to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::QuotaExceeded { quota, plan, limit } => (
                StatusCode::FORBIDDEN,
                "quota_exceeded",
                quota.upgrade_message().to_string(),
                Some(serde_json::json!({
                    "quota": quota,
                    "plan": plan,
                    "limit": limit,
                })),
            ),
            Self::ProviderUnavailable(msg) => {
                tracing::warn!(error = %msg, "Billing provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "provider_unavailable",
                    "The billing provider is temporarily unavailable".to_string(),
                    None,
                )
            }
            Self::AiUnavailable(msg) => {
                tracing::warn!(error = %msg, "AI provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ai_unavailable",
                    "Recipe generation is temporarily unavailable".to_string(),
                    None,
                )
            }
            Self::InsufficientBalance => (
                StatusCode::SERVICE_UNAVAILABLE,
                "INSUFFICIENT_BALANCE",
                "Recipe generation is temporarily unavailable. Please try again later.".to_string(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<dinner_store::StoreError> for ApiError {
    fn from(err: dinner_store::StoreError) -> Self {
        match err {
            dinner_store::StoreError::NotFound => Self::NotFound("record not found".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::QuotaExceeded { quota, plan, limit } => {
                Self::QuotaExceeded { quota, plan, limit }
            }
            LedgerError::ProfileNotFound(_) => Self::NotFound("User profile not found".into()),
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Provider(e) => Self::ProviderUnavailable(e.to_string()),
            ReconcileError::Store(e) => e.into(),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::InsufficientBalance => Self::InsufficientBalance,
            e if e.is_transient() => Self::AiUnavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Malformed(msg) => Self::BadRequest(msg),
            EventError::Reconcile(e) => Self::Internal(e.to_string()),
        }
    }
}
