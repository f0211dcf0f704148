//! Error types for Dinner Surprise billing.

use crate::ids::IdError;
use crate::plan::UnknownValue;
use crate::profile::InvalidPeriod;

/// Result type for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors raised while decoding stored billing values.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A stored plan or status value is not recognized.
    #[error("invalid stored value: {0}")]
    InvalidValue(#[from] UnknownValue),

    /// A stored usage period is malformed.
    #[error("invalid usage period: {0}")]
    InvalidPeriod(#[from] InvalidPeriod),
}
