//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use dinner_core::PriceCatalog;
use serde::Deserialize;

/// Default Stripe API base URL.
pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com/v1";

/// Default DeepSeek (OpenAI-compatible) API base URL.
pub const DEFAULT_DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. Takes precedence over `data_dir`.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size (default: 10).
    pub database_max_connections: u32,

    /// Path to a `RocksDB` data directory (feature `rocksdb-backend`).
    pub data_dir: Option<String>,

    /// HS256 secret used to verify session JWTs.
    pub jwt_secret: Option<String>,

    /// Expected JWT audience (default: "authenticated").
    pub auth_audience: String,

    /// Admin API key for the `/admin` endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe secret API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL.
    pub stripe_api_url: String,

    /// Price identifiers per paid plan.
    pub prices: PriceCatalog,

    /// DeepSeek API key (optional).
    pub deepseek_api_key: Option<String>,

    /// DeepSeek API base URL.
    pub deepseek_api_url: String,

    /// DeepSeek chat model.
    pub deepseek_model: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Timeout for calls to Stripe and DeepSeek, in seconds.
    pub provider_timeout_seconds: u64,

    /// Maximum age of a webhook signature timestamp, in seconds.
    pub webhook_tolerance_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

/// DeepSeek secrets file structure.
#[derive(Debug, Deserialize)]
struct DeepSeekSecrets {
    api_key: String,
    #[serde(default)]
    api_url: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let (deepseek_api_key, deepseek_api_url) = load_deepseek_secrets();

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            data_dir: env_opt("DATA_DIR"),
            jwt_secret: env_opt("SUPABASE_JWT_SECRET").or_else(|| env_opt("JWT_SECRET")),
            auth_audience: env_or("AUTH_AUDIENCE", defaults.auth_audience),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_url: env_or("STRIPE_API_URL", defaults.stripe_api_url),
            prices: PriceCatalog {
                premium: env_list(&["PRICE_ID_PREMIUM_MONTHLY", "PRICE_ID_PREMIUM_YEARLY"]),
                family: env_list(&["PRICE_ID_FAMILY_MONTHLY", "PRICE_ID_FAMILY_YEARLY"]),
            },
            deepseek_api_key,
            deepseek_api_url: deepseek_api_url
                .unwrap_or_else(|| env_or("DEEPSEEK_API_URL", defaults.deepseek_api_url)),
            deepseek_model: env_or("DEEPSEEK_MODEL", defaults.deepseek_model),
            cors_origins: env_or("CORS_ORIGINS", "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            provider_timeout_seconds: env_parse(
                "PROVIDER_TIMEOUT_SECONDS",
                defaults.provider_timeout_seconds,
            ),
            webhook_tolerance_seconds: env_parse(
                "WEBHOOK_TOLERANCE_SECONDS",
                defaults.webhook_tolerance_seconds,
            ),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: String) -> String {
    env_opt(name).unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_list(names: &[&str]) -> Vec<String> {
    names.iter().filter_map(|name| env_opt(name)).collect()
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        env_opt("STRIPE_API_KEY").or_else(|| env_opt("STRIPE_SECRET_KEY")),
        env_opt("STRIPE_WEBHOOK_SECRET"),
    )
}

/// Load DeepSeek secrets from file or environment.
fn load_deepseek_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/deepseek.json", "../.secrets/deepseek.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<DeepSeekSecrets>(path) {
            tracing::info!(path = %path, "Loaded DeepSeek secrets from file");
            return (Some(secrets.api_key), secrets.api_url);
        }
    }

    tracing::debug!("DeepSeek secrets file not found, using environment variables");
    (env_opt("DEEPSEEK_API_KEY"), None)
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            data_dir: None,
            jwt_secret: None,
            auth_audience: "authenticated".into(),
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_url: DEFAULT_STRIPE_API_URL.into(),
            prices: PriceCatalog::default(),
            deepseek_api_key: None,
            deepseek_api_url: DEFAULT_DEEPSEEK_API_URL.into(),
            deepseek_model: "deepseek-chat".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 90,
            provider_timeout_seconds: 60,
            webhook_tolerance_seconds: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.auth_audience, "authenticated");
        assert_eq!(config.provider_timeout_seconds, 60);
        assert_eq!(config.webhook_tolerance_seconds, 300);
        assert_eq!(config.stripe_api_url, DEFAULT_STRIPE_API_URL);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn missing_secrets_file_is_not_found() {
        let err = load_secrets_file::<StripeSecrets>("/nonexistent/stripe.json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
