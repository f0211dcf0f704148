//! Subscription handlers: sync, status, cancellation and downgrade.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use dinner_core::{PlanType, Subscription, SubscriptionPatch, SubscriptionStatus, UsageSummary};

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::ApiError;
use crate::handlers::{json_body, require_user_id};
use crate::reconcile::ReconcileError;
use crate::state::AppState;

/// Body carrying the user a request acts on.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    /// Target user.
    pub user_id: Option<String>,
}

/// Subscription returned after a write.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// The subscription as now stored.
    pub subscription: Subscription,
}

/// Current subscription state for the signed-in user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDetails {
    /// Stored subscription, or a free placeholder.
    pub subscription: Subscription,
    /// Plan in force right now.
    pub effective_plan: PlanType,
    /// Quota usage under that plan.
    pub usage: UsageSummary,
}

/// Reconcile the signed-in user's subscription against the billing provider.
pub async fn sync_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = require_user_id(body.user_id.as_deref())?;
    auth.ensure_owner(&user_id)?;

    let subscription = state.engine.reconcile(&user_id).await?;

    tracing::info!(
        user_id = %user_id,
        plan = %subscription.plan_type,
        status = %subscription.status,
        "Subscription synced"
    );

    Ok(Json(SubscriptionResponse {
        success: true,
        subscription,
    }))
}

/// Get the signed-in user's subscription and usage.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionDetails>, ApiError> {
    let usage = state.ledger.usage(&auth.user_id).await?;
    let subscription = state
        .store
        .get_subscription(&auth.user_id)
        .await?
        .unwrap_or_else(|| Subscription::free(auth.user_id));

    Ok(Json(SubscriptionDetails {
        subscription,
        effective_plan: usage.plan,
        usage,
    }))
}

/// Cancel the signed-in user's subscription.
///
/// Provider subscriptions stay active until the end of the paid period;
/// manual grants end immediately.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let user_id = auth.user_id;
    let current = state
        .store
        .get_subscription(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No subscription found".into()))?;

    let patch = match current.provider_subscription_ref() {
        None => SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Inactive),
        Some(subscription_ref) => {
            let provider = state.billing.as_ref().ok_or_else(|| {
                ApiError::ProviderUnavailable("billing provider not configured".into())
            })?;

            match provider
                .cancel_at_period_end(subscription_ref)
                .await
                .map_err(ReconcileError::from)?
            {
                Some(upstream) if upstream.local_status().grants_access() => {
                    let patch = SubscriptionPatch {
                        status: Some(SubscriptionStatus::ActiveUntilPeriodEnd),
                        ..SubscriptionPatch::default()
                    };
                    match upstream.period_end() {
                        Some(end) => patch.with_period_end(Some(end)),
                        None => patch,
                    }
                }
                Some(upstream) => upstream.to_patch(state.engine.resolver()),
                None => {
                    tracing::info!(
                        user_id = %user_id,
                        subscription_ref = %subscription_ref,
                        "Subscription already gone upstream"
                    );
                    SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Canceled)
                }
            }
        }
    };

    let subscription = state.engine.apply(&user_id, &patch).await?;

    tracing::info!(
        user_id = %user_id,
        status = %subscription.status,
        period_end = ?subscription.current_period_end,
        "Subscription cancelled"
    );

    Ok(Json(SubscriptionResponse {
        success: true,
        subscription,
    }))
}

/// Move a user to the free plan, keeping billing references.
pub async fn downgrade_to_free(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthUser,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = require_user_id(body.user_id.as_deref())?;
    auth.ensure_owner(&user_id)?;

    if state.store.get_profile(&user_id).await?.is_none() {
        return Err(ApiError::NotFound("User profile not found".into()));
    }

    let patch = SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Inactive);
    let subscription = state.engine.apply(&user_id, &patch).await?;

    tracing::info!(user_id = %user_id, "User downgraded to free");

    Ok(Json(SubscriptionResponse {
        success: true,
        subscription,
    }))
}
