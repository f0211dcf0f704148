//! Post-checkout payment confirmation.
//!
//! The client calls this when Stripe redirects back from Checkout, so the
//! upgrade shows up without waiting for the webhook. Both paths go through
//! [`events::complete_checkout`] and converge on the same record.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::events;
use crate::handlers::json_body;
use crate::handlers::subscription::SubscriptionResponse;
use crate::reconcile::ReconcileError;
use crate::state::AppState;

/// Verify payment request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    /// Stripe Checkout session ID from the success redirect.
    pub session_id: Option<String>,
}

/// Confirm a completed Checkout session for the signed-in user.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let body = json_body(payload)?;
    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session ID is required".into()))?;

    let provider = state
        .billing
        .as_ref()
        .ok_or_else(|| ApiError::ProviderUnavailable("billing provider not configured".into()))?;

    let session = provider
        .fetch_checkout_session(&session_id)
        .await
        .map_err(ReconcileError::from)?
        .ok_or_else(|| ApiError::BadRequest("Invalid checkout session".into()))?;

    let user_id = events::checkout_user(&session)?;
    auth.ensure_owner(&user_id)?;

    if !session.is_paid() {
        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid"
        );
        return Err(ApiError::BadRequest("Payment has not completed".into()));
    }

    let subscription = events::complete_checkout(&state.engine, &user_id, &session).await?;

    tracing::info!(
        user_id = %user_id,
        session_id = %session.id,
        plan = %subscription.plan_type,
        "Payment verified"
    );

    Ok(Json(SubscriptionResponse {
        success: true,
        subscription,
    }))
}
