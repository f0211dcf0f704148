//! Client error types.

use dinner_core::{PlanType, Quota};

/// Errors that can occur when using the Dinner Surprise client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// Missing, invalid or expired session.
    #[error("unauthorized")]
    Unauthorized,

    /// The session belongs to a different user.
    #[error("forbidden")]
    Forbidden,

    /// A plan quota is used up.
    #[error("{quota} quota exceeded on {plan} plan (limit {limit})")]
    QuotaExceeded {
        /// Which quota.
        quota: Quota,
        /// Plan in force.
        plan: PlanType,
        /// The limit that was hit.
        limit: u32,
        /// Upgrade message to show the user.
        message: String,
    },

    /// The requested resource doesn't exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A provider behind the service is unavailable; retry later.
    #[error("service unavailable ({code}): {message}")]
    Unavailable {
        /// Error code (`provider_unavailable`, `ai_unavailable`,
        /// `INSUFFICIENT_BALANCE`).
        code: String,
        /// Error message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
