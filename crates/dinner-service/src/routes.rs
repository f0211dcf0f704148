//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, checkout, health, recipes, subscription, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent recipe generations (each holds a provider call open).
const GENERATION_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Subscriptions (session JWT)
/// - `POST /user/sync-subscription` - Reconcile against Stripe
/// - `GET /user/subscription` - Subscription, effective plan and usage
/// - `POST /user/cancel-subscription` - Cancel at period end
/// - `POST /user/downgrade-to-free` - Drop to the free plan
/// - `POST /stripe/verify-payment` - Confirm a completed Checkout session
///
/// ## Recipes (optional session JWT, must match `userId`)
/// - `POST /generate-recipe` - Generate a recipe (monthly quota)
/// - `POST /recipes/save` - Save a recipe (saved quota)
/// - `DELETE /recipes/delete` - Delete a saved recipe
/// - `GET /recipes` - List saved recipes (session JWT)
///
/// ## Admin (`x-admin-key`)
/// - `GET /admin/subscription-mismatches`
/// - `POST /admin/reconcile-all`
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/billing` - Stripe webhooks
/// - `POST /webhooks/stripe` - Alias
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let generation_routes = Router::new()
        .route("/generate-recipe", post(recipes::generate_recipe))
        .layer(ConcurrencyLimitLayer::new(GENERATION_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Subscriptions
        .route("/user/sync-subscription", post(subscription::sync_subscription))
        .route("/user/subscription", get(subscription::get_subscription))
        .route(
            "/user/cancel-subscription",
            post(subscription::cancel_subscription),
        )
        .route(
            "/user/downgrade-to-free",
            post(subscription::downgrade_to_free),
        )
        .route("/stripe/verify-payment", post(checkout::verify_payment))
        // Recipes
        .route("/recipes", get(recipes::list_recipes))
        .route("/recipes/save", post(recipes::save_recipe))
        .route("/recipes/delete", delete(recipes::delete_recipe))
        // Admin
        .route(
            "/admin/subscription-mismatches",
            get(admin::list_mismatches),
        )
        .route("/admin/reconcile-all", post(admin::reconcile_all))
        .merge(generation_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .merge(api_routes)
        // Webhooks (no rate limit - controlled by Stripe)
        .route("/webhooks/billing", post(webhooks::billing_webhook))
        .route("/webhooks/stripe", post(webhooks::billing_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
