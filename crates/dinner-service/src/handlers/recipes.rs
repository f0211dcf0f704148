//! Recipe handlers.
//!
//! Every quota-consuming operation follows the same shape: take the quota
//! first, do the work, give the quota back if the work fails.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use dinner_core::{RecipeId, SavedRecipe};

use crate::ai::RecipeRequest;
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::ApiError;
use crate::handlers::{json_body, require_user_id};
use crate::ledger::GenerationGrant;
use crate::state::AppState;

// =============================================================================
// Generation
// =============================================================================

/// Generate recipe request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Requesting user.
    pub user_id: Option<String>,
    /// Ingredients on hand.
    pub ingredients: Option<Vec<serde_json::Value>>,
    /// Number of servings.
    pub servings: Option<u32>,
    /// Dietary preferences.
    pub preferences: Option<String>,
}

/// Generate recipe response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// The generated recipe document.
    pub recipe: serde_json::Value,
    /// Generation quota after this request.
    pub usage: GenerationGrant,
}

/// Generate a recipe, charging one generation against the monthly quota.
pub async fn generate_recipe(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthUser,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = require_user_id(body.user_id.as_deref())?;
    let ingredients = body
        .ingredients
        .filter(|items| !items.is_empty())
        .ok_or_else(|| ApiError::BadRequest("At least one ingredient is required".into()))?;
    auth.ensure_owner(&user_id)?;

    let generator = state
        .generator
        .as_ref()
        .ok_or_else(|| ApiError::AiUnavailable("recipe generator not configured".into()))?;

    let grant = state.ledger.try_consume_generation(&user_id).await?;

    let request = RecipeRequest {
        ingredients,
        servings: body.servings,
        preferences: body.preferences,
    };

    match generator.generate(&request).await {
        Ok(recipe) => {
            tracing::info!(
                user_id = %user_id,
                plan = %grant.plan,
                used = grant.used,
                remaining = ?grant.remaining(),
                "Recipe generated"
            );
            Ok(Json(GenerateResponse {
                recipe,
                usage: grant,
            }))
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Recipe generation failed");
            // The release error is already logged by the ledger.
            let _ = state.ledger.release_generation(&user_id, grant.period).await;
            Err(e.into())
        }
    }
}

// =============================================================================
// Saved recipes
// =============================================================================

/// Save recipe request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecipeRequest {
    /// Owner.
    pub user_id: Option<String>,
    /// Recipe document to keep.
    pub recipe: Option<serde_json::Value>,
}

/// Save recipe response.
#[derive(Debug, Serialize)]
pub struct SaveRecipeResponse {
    /// Whether the recipe was saved.
    pub success: bool,
    /// The saved recipe.
    pub recipe: SavedRecipe,
}

/// Save a recipe, taking a saved-recipe slot.
pub async fn save_recipe(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthUser,
    payload: Result<Json<SaveRecipeRequest>, JsonRejection>,
) -> Result<Json<SaveRecipeResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = require_user_id(body.user_id.as_deref())?;
    let document = body
        .recipe
        .filter(serde_json::Value::is_object)
        .ok_or_else(|| ApiError::BadRequest("Recipe is required".into()))?;
    auth.ensure_owner(&user_id)?;

    let grant = state.ledger.try_save_item(&user_id).await?;
    let recipe = SavedRecipe::new(user_id, document);

    if let Err(e) = state.store.insert_recipe(&recipe).await {
        let _ = state.ledger.release_saved_item(&user_id).await;
        return Err(e.into());
    }

    tracing::info!(
        user_id = %user_id,
        recipe_id = %recipe.id,
        saved = grant.saved,
        "Recipe saved"
    );

    Ok(Json(SaveRecipeResponse {
        success: true,
        recipe,
    }))
}

/// Delete recipe request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRecipeRequest {
    /// Owner.
    pub user_id: Option<String>,
    /// Recipe to delete.
    pub recipe_id: Option<String>,
}

/// Delete recipe response.
#[derive(Debug, Serialize)]
pub struct DeleteRecipeResponse {
    /// Whether the recipe was deleted.
    pub success: bool,
}

/// Delete a saved recipe and give its slot back.
pub async fn delete_recipe(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthUser,
    payload: Result<Json<DeleteRecipeRequest>, JsonRejection>,
) -> Result<Json<DeleteRecipeResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = require_user_id(body.user_id.as_deref())?;
    let recipe_id: RecipeId = body
        .recipe_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Recipe ID is required".into()))?
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid recipe ID".into()))?;
    auth.ensure_owner(&user_id)?;

    if !state.store.delete_recipe(&user_id, &recipe_id).await? {
        return Err(ApiError::NotFound("Recipe not found".into()));
    }

    let _ = state.ledger.release_saved_item(&user_id).await;

    tracing::info!(user_id = %user_id, recipe_id = %recipe_id, "Recipe deleted");

    Ok(Json(DeleteRecipeResponse { success: true }))
}

/// Saved recipes list.
#[derive(Debug, Serialize)]
pub struct RecipeListResponse {
    /// The user's saved recipes.
    pub recipes: Vec<SavedRecipe>,
}

/// List the signed-in user's saved recipes.
pub async fn list_recipes(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<RecipeListResponse>, ApiError> {
    let recipes = state.store.list_recipes(&auth.user_id).await?;
    Ok(Json(RecipeListResponse { recipes }))
}
