//! Dinner Surprise HTTP client implementation.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use dinner_core::{PlanType, Quota, RecipeId, SavedRecipe, UserId};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, DeleteRecipeRequest, GenerateRecipeRequest, GeneratedRecipe,
    HealthResponse, MismatchReport, RecipeList, SaveRecipeRequest, SaveRecipeResponse,
    SubscriptionDetails, SubscriptionResponse, SuccessResponse, UserRequest, VerifyPaymentRequest,
};

/// Dinner Surprise API client.
///
/// A client carries at most one credential: a user session (for the user
/// endpoints) or an admin key (for the admin endpoints).
#[derive(Debug, Clone)]
pub struct DinnerClient {
    client: Client,
    base_url: String,
    session_token: Option<String>,
    admin_key: Option<String>,
}

impl DinnerClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the service (e.g., `"http://dinner-service:8080"`)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty or the HTTP client cannot
    /// be built.
    pub fn with_options(
        base_url: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base URL is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url,
            session_token: None,
            admin_key: None,
        })
    }

    /// Act as the user holding `token` (a session JWT).
    #[must_use]
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Authenticate admin calls with `key`.
    #[must_use]
    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Reconcile the user's subscription with the billing provider.
    ///
    /// Needs a session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn sync_subscription(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionResponse, ClientError> {
        let request = self
            .request(Method::POST, "/user/sync-subscription")
            .json(&UserRequest { user_id });
        self.send(request).await
    }

    /// Get the signed-in user's subscription, effective plan and usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_subscription(&self) -> Result<SubscriptionDetails, ClientError> {
        self.send(self.request(Method::GET, "/user/subscription"))
            .await
    }

    /// Cancel the signed-in user's subscription at the end of its period.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn cancel_subscription(&self) -> Result<SubscriptionResponse, ClientError> {
        self.send(self.request(Method::POST, "/user/cancel-subscription"))
            .await
    }

    /// Move a user to the free plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn downgrade_to_free(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionResponse, ClientError> {
        let request = self
            .request(Method::POST, "/user/downgrade-to-free")
            .json(&UserRequest { user_id });
        self.send(request).await
    }

    /// Confirm a paid Checkout session after the success redirect.
    ///
    /// Needs a session for the user who started the checkout.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn verify_payment(
        &self,
        session_id: &str,
    ) -> Result<SubscriptionResponse, ClientError> {
        let request = self
            .request(Method::POST, "/stripe/verify-payment")
            .json(&VerifyPaymentRequest { session_id });
        self.send(request).await
    }

    // =========================================================================
    // Recipes
    // =========================================================================

    /// Generate a recipe. Charges one generation.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the monthly limit is reached, or an
    /// error if the request fails.
    pub async fn generate_recipe(
        &self,
        request: &GenerateRecipeRequest,
    ) -> Result<GeneratedRecipe, ClientError> {
        self.send(self.request(Method::POST, "/generate-recipe").json(request))
            .await
    }

    /// Save a recipe document.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the saved-recipe limit is reached, or an
    /// error if the request fails.
    pub async fn save_recipe(
        &self,
        user_id: UserId,
        recipe: impl Serialize,
    ) -> Result<SaveRecipeResponse, ClientError> {
        let body = SaveRecipeRequest {
            user_id,
            recipe: serde_json::to_value(recipe)?,
        };
        self.send(self.request(Method::POST, "/recipes/save").json(&body))
            .await
    }

    /// Delete a saved recipe.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the recipe doesn't exist, or an error if the
    /// request fails.
    pub async fn delete_recipe(
        &self,
        user_id: UserId,
        recipe_id: RecipeId,
    ) -> Result<bool, ClientError> {
        let body = DeleteRecipeRequest {
            user_id,
            recipe_id: recipe_id.to_string(),
        };
        let response: SuccessResponse = self
            .send(self.request(Method::DELETE, "/recipes/delete").json(&body))
            .await?;
        Ok(response.success)
    }

    /// List the signed-in user's saved recipes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_recipes(&self) -> Result<Vec<SavedRecipe>, ClientError> {
        let list: RecipeList = self.send(self.request(Method::GET, "/recipes")).await?;
        Ok(list.recipes)
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// List profiles whose tier disagrees with their subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn subscription_mismatches(&self) -> Result<MismatchReport, ClientError> {
        self.send(self.request(Method::GET, "/admin/subscription-mismatches"))
            .await
    }

    /// Run the reconciliation sweep. Nothing is written unless `apply`.
    ///
    /// The report is returned as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn reconcile_all(&self, apply: bool) -> Result<serde_json::Value, ClientError> {
        let request = self
            .request(Method::POST, "/admin/reconcile-all")
            .query(&[("apply", apply)]);
        self.send(request).await
    }

    /// Check service health.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.send(self.request(Method::GET, "/health")).await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &self.admin_key {
            request = request.header("x-admin-key", key);
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        tracing::debug!(
            url = %response.url(),
            status = %response.status(),
            "Dinner Surprise API response"
        );
        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        let Ok(api_error) = error_body else {
            return Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            });
        };

        let error = api_error.error;
        match error.code.as_str() {
            "unauthorized" => Err(ClientError::Unauthorized),
            "forbidden" => Err(ClientError::Forbidden),
            "not_found" => Err(ClientError::NotFound(error.message)),
            "quota_exceeded" => {
                let details = error.details.unwrap_or_default();
                let field = |name: &str| details.get(name).cloned().unwrap_or_default();
                Err(ClientError::QuotaExceeded {
                    quota: serde_json::from_value::<Quota>(field("quota"))?,
                    plan: serde_json::from_value::<PlanType>(field("plan"))?,
                    limit: field("limit")
                        .as_u64()
                        .and_then(|l| u32::try_from(l).ok())
                        .unwrap_or(0),
                    message: error.message,
                })
            }
            "provider_unavailable" | "ai_unavailable" | "INSUFFICIENT_BALANCE" => {
                Err(ClientError::Unavailable {
                    code: error.code,
                    message: error.message,
                })
            }
            _ => Err(ClientError::Api {
                code: error.code,
                message: error.message,
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 90, recipe generation is slow).
    pub timeout_seconds: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 90,
        }
    }
}
