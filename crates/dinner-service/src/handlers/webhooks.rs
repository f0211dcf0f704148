//! Billing webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::events::{self, BillingEvent, EventOutcome};
use crate::state::AppState;
use crate::stripe::{signature, WebhookEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle billing provider webhooks.
///
/// The signature is checked before the body is even parsed; nothing is
/// written for a request that fails verification.
pub async fn billing_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(webhook_secret) = &state.config.stripe_webhook_secret else {
        tracing::error!("Stripe webhook secret not configured - rejecting webhook");
        return Err(ApiError::BadRequest("Webhook secret not configured".into()));
    };

    let header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    signature::verify(
        &body,
        header,
        webhook_secret,
        state.config.webhook_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let webhook: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received Stripe webhook"
    );

    let event = BillingEvent::from_webhook(&webhook).map_err(|e| {
        tracing::warn!(event_id = %webhook.id, error = %e, "Malformed webhook object");
        ApiError::BadRequest(format!("Malformed {} object", webhook.event_type))
    })?;

    match events::dispatch(&state.engine, event).await? {
        EventOutcome::Applied(user_id) => {
            tracing::info!(event_id = %webhook.id, user_id = %user_id, "Webhook applied");
        }
        EventOutcome::Superseded(user_id) => {
            tracing::info!(event_id = %webhook.id, user_id = %user_id, "Webhook superseded");
        }
        outcome => {
            tracing::debug!(event_id = %webhook.id, outcome = ?outcome, "Webhook acknowledged");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}
