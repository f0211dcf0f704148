//! Stripe integration.
//!
//! Stripe is the billing provider of record:
//! - subscription lookups during reconciliation
//! - Checkout session lookups when the client confirms a payment
//! - scheduling cancellations at period end
//! - signed webhook events (see [`signature`])

pub mod client;
pub mod signature;
pub mod types;

use async_trait::async_trait;

pub use client::{StripeClient, StripeError};
pub use types::*;

/// The billing provider operations the service depends on.
///
/// Implemented by [`StripeClient`]; tests substitute their own.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Fetch a subscription. `Ok(None)` means the provider has no record of
    /// it (deleted upstream).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other provider error.
    async fn fetch_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError>;

    /// Fetch a Checkout session. `Ok(None)` means the provider has no such
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other provider error.
    async fn fetch_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, StripeError>;

    /// Schedule a subscription to end with its current period.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other provider error.
    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError>;
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn fetch_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        self.get_subscription(subscription_ref).await
    }

    async fn fetch_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, StripeError> {
        self.get_checkout_session(session_id).await
    }

    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        self.cancel_subscription_at_period_end(subscription_ref)
            .await
    }
}
