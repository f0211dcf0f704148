//! Stripe API client implementation.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::types::{CheckoutSession, StripeErrorResponse, StripeSubscription};
use crate::config::DEFAULT_STRIPE_API_URL;

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed (connection, timeout, body decoding).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error ({status}): {error_type} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StripeError {
    /// Whether Stripe reported the requested object as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status, code, .. } => {
                *status == StatusCode::NOT_FOUND.as_u16()
                    || code.as_deref() == Some("resource_missing")
            }
            _ => false,
        }
    }

    /// Whether retrying the request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Configuration(_) => false,
        }
    }
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client against the public API.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, StripeError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(StripeError::Configuration("Stripe API key is empty".into()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_STRIPE_API_URL.to_string(),
        })
    }

    /// Point the client at a different API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Retrieve a subscription with its price and product expanded.
    ///
    /// Returns `None` when Stripe no longer knows the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other API error.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("expand[]", "items.data.price.product")])
            .send()
            .await?;

        not_found_as_none(self.handle_response(response).await)
    }

    /// Retrieve a Checkout session.
    ///
    /// Returns `None` when Stripe has no such session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other API error.
    pub async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, StripeError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.base_url, session_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        not_found_as_none(self.handle_response(response).await)
    }

    /// Schedule a subscription to cancel at the end of its period.
    ///
    /// Returns `None` when Stripe no longer knows the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any other API error.
    pub async fn cancel_subscription_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, StripeError> {
        tracing::debug!(subscription_id = %subscription_id, "Scheduling Stripe cancellation");

        let response = self
            .client
            .post(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[
                ("cancel_at_period_end", "true"),
                ("expand[]", "items.data.price.product"),
            ])
            .send()
            .await?;

        not_found_as_none(self.handle_response(response).await)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                status: status.as_u16(),
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                status: status.as_u16(),
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

fn not_found_as_none<T>(result: Result<T, StripeError>) -> Result<Option<T>, StripeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
