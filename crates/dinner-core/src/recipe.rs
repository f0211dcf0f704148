//! Saved recipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecipeId, UserId};

/// A recipe a user chose to keep.
///
/// The body is the generated recipe document as returned by the AI provider,
/// stored without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecipe {
    /// Recipe identifier.
    pub id: RecipeId,

    /// Owner.
    pub user_id: UserId,

    /// Title, taken from the body's `title` (or `name`) field.
    pub title: String,

    /// The full recipe document.
    pub body: serde_json::Value,

    /// When the recipe was saved.
    pub created_at: DateTime<Utc>,
}

impl SavedRecipe {
    /// Wrap a recipe document for `user_id`.
    #[must_use]
    pub fn new(user_id: UserId, body: serde_json::Value) -> Self {
        let title = body
            .get("title")
            .or_else(|| body.get("name"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| "Untitled recipe".to_string(), str::to_string);

        Self {
            id: RecipeId::generate(),
            user_id,
            title,
            body,
            created_at: Utc::now(),
        }
    }
}
