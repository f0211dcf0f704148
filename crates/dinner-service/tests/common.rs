//! Common test utilities for dinner-service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use dinner_core::{PlanType, Profile, UserId};
use dinner_service::ai::{AiError, RecipeGenerator, RecipeRequest};
use dinner_service::auth::JwtClaims;
use dinner_service::stripe::{
    signature, BillingProvider, CheckoutSession, StripeError, StripeSubscription,
};
use dinner_service::{create_router, AppState, ServiceConfig};
use dinner_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret-with-enough-length";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ADMIN_KEY: &str = "test-admin-key";

// ============================================================================
// Fake billing provider
// ============================================================================

/// In-memory stand-in for Stripe.
#[derive(Default)]
pub struct FakeBilling {
    subscriptions: Mutex<HashMap<String, StripeSubscription>>,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl FakeBilling {
    /// Add or replace an upstream subscription.
    pub fn insert(&self, subscription: Value) {
        let subscription: StripeSubscription =
            serde_json::from_value(subscription).expect("valid subscription");
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    /// Add or replace a Checkout session.
    pub fn insert_session(&self, session: Value) {
        let session: CheckoutSession =
            serde_json::from_value(session).expect("valid checkout session");
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Delete an upstream subscription.
    pub fn remove(&self, id: &str) {
        self.subscriptions.lock().unwrap().remove(id);
    }

    /// Make every call fail with a 503.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of subscription fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StripeError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StripeError::Api {
                status: 503,
                error_type: "api_error".into(),
                message: "Stripe is unavailable".into(),
                code: None,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn fetch_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_ref)
            .cloned())
    }

    async fn fetch_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, StripeError> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        self.check()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        Ok(subscriptions.get_mut(subscription_ref).map(|s| {
            s.cancel_at_period_end = true;
            s.clone()
        }))
    }
}

/// An upstream subscription on the premium price.
pub fn stripe_subscription(id: &str, customer: &str, status: &str, period_end: i64) -> Value {
    json!({
        "id": id,
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": period_end - 30 * 24 * 3600,
        "current_period_end": period_end,
        "metadata": {},
        "items": {
            "data": [{
                "price": {
                    "id": "price_premium_monthly",
                    "nickname": "Premium Monthly",
                    "product": {"id": "prod_premium", "name": "Dinner Surprise Premium"}
                }
            }],
            "has_more": false
        }
    })
}

/// A paid Checkout session for `user_id` that created `subscription`.
pub fn checkout_session(id: &str, user_id: &UserId, customer: &str, subscription: &str) -> Value {
    json!({
        "id": id,
        "payment_status": "paid",
        "customer": customer,
        "subscription": subscription,
        "client_reference_id": null,
        "metadata": {"userId": user_id.to_string(), "planType": "premium"}
    })
}

// ============================================================================
// Fake recipe generator
// ============================================================================

/// Generator returning a canned recipe, or failing on demand.
#[derive(Default)]
pub struct FakeGenerator {
    failure: Mutex<Option<fn() -> AiError>>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    /// Fail every call with the error `make` builds.
    pub fn fail_with(&self, make: fn() -> AiError) {
        *self.failure.lock().unwrap() = Some(make);
    }

    /// Number of generate calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecipeGenerator for FakeGenerator {
    async fn generate(&self, request: &RecipeRequest) -> Result<Value, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = *self.failure.lock().unwrap() {
            return Err(make());
        }
        Ok(json!({
            "title": "Pantry Surprise",
            "ingredients": request.ingredient_lines(),
            "instructions": ["Combine everything.", "Cook until done."],
            "cookingTime": "20 minutes",
            "servings": request.servings.unwrap_or(2)
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// The fake billing provider (absent when built without one).
    pub billing: Arc<FakeBilling>,
    /// The fake recipe generator.
    pub generator: Arc<FakeGenerator>,
    /// A test user with a free profile.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Harness with a billing provider and a recipe generator.
    pub async fn new() -> Self {
        Self::build(true, true).await
    }

    /// Harness without a billing provider.
    pub async fn without_billing() -> Self {
        Self::build(false, true).await
    }

    /// Harness without a recipe generator.
    pub async fn without_generator() -> Self {
        Self::build(true, false).await
    }

    async fn build(with_billing: bool, with_generator: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let billing = Arc::new(FakeBilling::default());
        let generator = Arc::new(FakeGenerator::default());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };

        let mut state = AppState::new(store.clone(), config);
        if with_billing {
            state = state.with_billing_provider(billing.clone());
        }
        if with_generator {
            state = state.with_generator(generator.clone());
        }

        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        let test_user_id = UserId::generate();
        store
            .put_profile(&Profile::new(test_user_id))
            .await
            .expect("Failed to create profile");

        Self {
            server,
            store,
            billing,
            generator,
            test_user_id,
        }
    }

    /// Create another user with a profile on `tier`.
    pub async fn create_user(&self, tier: PlanType) -> UserId {
        let user_id = UserId::generate();
        self.store
            .put_profile(&Profile::new(user_id).with_tier(tier))
            .await
            .expect("Failed to create profile");
        user_id
    }

    /// Bearer token header value for the test user.
    pub fn user_auth(&self) -> HeaderValue {
        bearer(&self.test_user_id)
    }
}

/// A signed session token for `user_id`.
pub fn session_token(user_id: &UserId) -> String {
    let claims = JwtClaims {
        sub: user_id.to_string(),
        aud: Some(json!("authenticated")),
        exp: chrono::Utc::now().timestamp() + 3600,
        email: Some("cook@example.com".into()),
        role: Some("authenticated".into()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign token")
}

/// `Authorization` value for `user_id`.
pub fn bearer(user_id: &UserId) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", session_token(user_id))).unwrap()
}

/// The `x-admin-key` header name.
pub fn admin_key_header() -> HeaderName {
    HeaderName::from_static("x-admin-key")
}

/// The `stripe-signature` header name.
pub fn signature_header() -> HeaderName {
    HeaderName::from_static("stripe-signature")
}

/// `stripe-signature` value for `payload`, signed now.
pub fn sign_now(payload: &str) -> HeaderValue {
    let header = signature::sign(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
        .expect("Failed to sign payload");
    HeaderValue::from_str(&header).unwrap()
}

/// A webhook event envelope.
pub fn webhook_event(id: &str, event_type: &str, object: Value) -> String {
    json!({
        "id": id,
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": {"object": object}
    })
    .to_string()
}
