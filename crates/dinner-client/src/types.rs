//! Request and response types for the Dinner Surprise client.

use dinner_core::{PlanType, SavedRecipe, Subscription, TierMismatch, UsagePeriod, UsageSummary, UserId};
use serde::{Deserialize, Serialize};

/// Body for endpoints that act on a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRequest {
    pub user_id: UserId,
}

/// Body for post-checkout payment verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyPaymentRequest<'a> {
    pub session_id: &'a str,
}

/// A subscription after a write.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// The stored subscription.
    pub subscription: Subscription,
}

/// Subscription, effective plan and usage for the signed-in user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDetails {
    /// Stored subscription (free placeholder if none).
    pub subscription: Subscription,
    /// Plan in force right now.
    pub effective_plan: PlanType,
    /// Quota usage.
    pub usage: UsageSummary,
}

/// Recipe generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRecipeRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Ingredient names or `{name, quantity, unit}` objects.
    pub ingredients: Vec<serde_json::Value>,
    /// Number of servings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    /// Dietary preferences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<String>,
}

impl GenerateRecipeRequest {
    /// Request a recipe from plain ingredient names.
    #[must_use]
    pub fn new<I, S>(user_id: UserId, ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id,
            ingredients: ingredients
                .into_iter()
                .map(|i| serde_json::Value::String(i.into()))
                .collect(),
            servings: None,
            preferences: None,
        }
    }
}

/// Generation quota after a request.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationUsage {
    /// Plan charged.
    pub plan: PlanType,
    /// Month charged.
    pub period: UsagePeriod,
    /// Generations used this month, including this one.
    pub used: u32,
    /// Monthly limit (`None` = unlimited).
    pub limit: Option<u32>,
}

/// A generated recipe.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedRecipe {
    /// The recipe document.
    pub recipe: serde_json::Value,
    /// Quota after this generation.
    pub usage: GenerationUsage,
}

/// Save recipe request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SaveRecipeRequest {
    pub user_id: UserId,
    pub recipe: serde_json::Value,
}

/// Save recipe response.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveRecipeResponse {
    /// Whether the recipe was saved.
    pub success: bool,
    /// The saved recipe.
    pub recipe: SavedRecipe,
}

/// Delete recipe request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteRecipeRequest {
    pub user_id: UserId,
    pub recipe_id: String,
}

/// Plain success flag.
#[derive(Debug, Clone, Deserialize)]
pub struct SuccessResponse {
    /// Whether the operation succeeded.
    pub success: bool,
}

/// Saved recipes.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RecipeList {
    pub recipes: Vec<SavedRecipe>,
}

/// Tier mismatches (admin).
#[derive(Debug, Clone, Deserialize)]
pub struct MismatchReport {
    /// Number of mismatches.
    pub count: usize,
    /// The mismatches.
    pub mismatches: Vec<TierMismatch>,
}

/// Service health.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` when healthy.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Whether billing is configured.
    pub billing: bool,
    /// Whether recipe generation is configured.
    pub generation: bool,
}

/// Error response body.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// Error details.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
