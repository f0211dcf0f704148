//! DeepSeek chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AiError, RecipeGenerator, RecipeRequest};
use crate::config::DEFAULT_DEEPSEEK_API_URL;

/// Marker DeepSeek puts in error bodies when the account is out of credit.
const INSUFFICIENT_BALANCE_MARKER: &str = "Insufficient Balance";

/// Client for DeepSeek's OpenAI-compatible chat API.
#[derive(Debug, Clone)]
pub struct DeepSeekClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl DeepSeekClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Configuration("DeepSeek API key is empty".into()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_DEEPSEEK_API_URL.to_string(),
            model: model.into(),
        })
    }

    /// Point the client at a different API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn prompt(request: &RecipeRequest) -> String {
        let mut prompt = format!(
            "Create a recipe using some or all of these ingredients: {}.\n",
            request.ingredient_lines().join(", ")
        );
        if let Some(servings) = request.servings {
            prompt.push_str(&format!("Servings: {servings}\n"));
        }
        if let Some(preferences) = &request.preferences {
            prompt.push_str(&format!("Preferences: {preferences}\n"));
        }
        prompt.push_str(
            "Respond with a JSON object with the properties title, ingredients, steps, \
             servings, cookingTime, difficulty, calories and protein.",
        );
        prompt
    }
}

#[async_trait]
impl RecipeGenerator for DeepSeekClient {
    async fn generate(&self, request: &RecipeRequest) -> Result<Value, AiError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Self::prompt(request),
            }],
            temperature: 0.7,
            max_tokens: 1000,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status == StatusCode::PAYMENT_REQUIRED || message.contains(INSUFFICIENT_BALANCE_MARKER)
            {
                return Err(AiError::InsufficientBalance);
            }
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("no choices returned".into()))?;

        parse_recipe(&content)
    }
}

/// Parse the model output as a JSON object, tolerating surrounding prose.
fn parse_recipe(content: &str) -> Result<Value, AiError> {
    let candidate = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content.trim(),
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(AiError::InvalidResponse("recipe is not a JSON object".into())),
        Err(e) => Err(AiError::InvalidResponse(e.to_string())),
    }
}
