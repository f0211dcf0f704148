//! AI recipe generation.
//!
//! The provider is a black box: it receives the user's ingredients and
//! returns a recipe document.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::DeepSeekClient;

/// Error type for recipe generation.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// HTTP request failed (connection, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider account is out of credit.
    #[error("AI provider balance exhausted")]
    InsufficientBalance,

    /// The provider returned an error status.
    #[error("AI provider error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The provider answered with something that isn't a recipe.
    #[error("invalid AI response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AiError {
    /// Whether retrying later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InsufficientBalance | Self::InvalidResponse(_) | Self::Configuration(_) => false,
        }
    }
}

/// What to cook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRequest {
    /// Ingredients, either plain names or `{name, quantity, unit}` objects.
    pub ingredients: Vec<serde_json::Value>,
    /// Number of servings.
    #[serde(default)]
    pub servings: Option<u32>,
    /// Free-form dietary preferences.
    #[serde(default)]
    pub preferences: Option<String>,
}

impl RecipeRequest {
    /// Ingredients rendered as text, e.g. `onion (2 pieces)`.
    #[must_use]
    pub fn ingredient_lines(&self) -> Vec<String> {
        self.ingredients
            .iter()
            .filter_map(|ingredient| match ingredient {
                serde_json::Value::String(name) => Some(name.clone()),
                serde_json::Value::Object(obj) => {
                    let name = obj.get("name")?.as_str()?;
                    let quantity = obj.get("quantity").map(value_text);
                    let unit = obj.get("unit").and_then(serde_json::Value::as_str);
                    Some(match (quantity, unit) {
                        (Some(q), Some(u)) => format!("{name} ({q} {u})"),
                        _ => name.to_string(),
                    })
                }
                _ => None,
            })
            .collect()
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Generates recipe documents.
#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    /// Generate a recipe for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails or answers with something
    /// that isn't a JSON object.
    async fn generate(&self, request: &RecipeRequest) -> Result<serde_json::Value, AiError>;
}
