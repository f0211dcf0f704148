//! Admin handlers (`x-admin-key`).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use dinner_core::TierMismatch;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::reconcile::SweepReport;
use crate::state::AppState;

/// Profiles whose tier disagrees with their subscription.
#[derive(Debug, Serialize)]
pub struct MismatchResponse {
    /// Number of mismatches.
    pub count: usize,
    /// The mismatches.
    pub mismatches: Vec<TierMismatch>,
}

/// List tier mirror mismatches.
pub async fn list_mismatches(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<MismatchResponse>, ApiError> {
    let mismatches = state.store.list_tier_mismatches().await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        count = mismatches.len(),
        "Listed tier mismatches"
    );

    Ok(Json(MismatchResponse {
        count: mismatches.len(),
        mismatches,
    }))
}

/// Reconcile-all query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileAllParams {
    /// Write changes; otherwise report only.
    #[serde(default)]
    pub apply: Option<bool>,
}

/// Reconcile every known user. Dry run unless `?apply=true`.
pub async fn reconcile_all(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Query(params): Query<ReconcileAllParams>,
) -> Result<Json<SweepReport>, ApiError> {
    let dry_run = !params.apply.unwrap_or(false);
    let report = state.engine.reconcile_all(dry_run).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        dry_run,
        checked = report.checked,
        changed = report.changed,
        failed = report.failed,
        "Reconciliation sweep finished"
    );

    Ok(Json(report))
}
