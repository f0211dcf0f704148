//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether a billing provider is configured.
    pub billing: bool,
    /// Whether recipe generation is configured.
    pub generation: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "dinner-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        billing: state.has_billing(),
        generation: state.has_generator(),
    })
}
