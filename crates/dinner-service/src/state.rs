//! Application state.

use std::sync::Arc;
use std::time::Duration;

use dinner_core::PlanResolver;
use dinner_store::{MemoryStore, PgStore, Store, StoreError};

use crate::ai::{DeepSeekClient, RecipeGenerator};
use crate::config::ServiceConfig;
use crate::ledger::UsageLedger;
use crate::reconcile::ReconciliationEngine;
use crate::stripe::{BillingProvider, StripeClient};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Billing provider (optional).
    pub billing: Option<Arc<dyn BillingProvider>>,

    /// Recipe generator (optional).
    pub generator: Option<Arc<dyn RecipeGenerator>>,

    /// Reconciliation engine over `store` and `billing`.
    pub engine: ReconciliationEngine,

    /// Usage ledger over `store`.
    pub ledger: UsageLedger,
}

impl AppState {
    /// Create a new application state, building provider clients from the
    /// configuration.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let timeout = Duration::from_secs(config.provider_timeout_seconds);

        let billing = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, timeout) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    let client = client.with_base_url(&config.stripe_api_url);
                    Some(Arc::new(client) as Arc<dyn BillingProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if billing.is_none() {
            tracing::warn!("Stripe not configured - subscriptions are reconciled locally only");
        }

        let generator = config.deepseek_api_key.as_ref().and_then(|key| {
            match DeepSeekClient::new(key, &config.deepseek_model, timeout) {
                Ok(client) => {
                    tracing::info!(model = %config.deepseek_model, "DeepSeek integration enabled");
                    let client = client.with_base_url(&config.deepseek_api_url);
                    Some(Arc::new(client) as Arc<dyn RecipeGenerator>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create DeepSeek client");
                    None
                }
            }
        });

        if generator.is_none() {
            tracing::warn!("DeepSeek not configured - recipe generation will not be available");
        }

        Self::assemble(store, config, billing, generator)
    }

    fn assemble(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        billing: Option<Arc<dyn BillingProvider>>,
        generator: Option<Arc<dyn RecipeGenerator>>,
    ) -> Self {
        let engine = ReconciliationEngine::new(
            Arc::clone(&store),
            billing.clone(),
            PlanResolver::new(config.prices.clone()),
        );
        let ledger = UsageLedger::new(Arc::clone(&store));

        Self {
            store,
            config,
            billing,
            generator,
            engine,
            ledger,
        }
    }

    /// Replace the billing provider.
    #[must_use]
    pub fn with_billing_provider(self, billing: Arc<dyn BillingProvider>) -> Self {
        Self::assemble(self.store, self.config, Some(billing), self.generator)
    }

    /// Replace the recipe generator.
    #[must_use]
    pub fn with_generator(self, generator: Arc<dyn RecipeGenerator>) -> Self {
        Self::assemble(self.store, self.config, self.billing, Some(generator))
    }

    /// Check if a billing provider is configured.
    #[must_use]
    pub fn has_billing(&self) -> bool {
        self.billing.is_some()
    }

    /// Check if recipe generation is configured.
    #[must_use]
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }
}

/// The store selected by configuration.
pub struct StoreHandle {
    /// The store, as the service uses it.
    pub store: Arc<dyn Store>,
    pg: Option<Arc<PgStore>>,
}

impl StoreHandle {
    /// Open the configured store.
    ///
    /// `DATABASE_URL` selects PostgreSQL (migrations are applied), otherwise
    /// `DATA_DIR` selects `RocksDB` when built with `rocksdb-backend`.
    /// Without either an in-memory store is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured store cannot be opened.
    pub async fn open(config: &ServiceConfig) -> Result<Self, StoreError> {
        if let Some(url) = &config.database_url {
            tracing::info!(
                max_connections = config.database_max_connections,
                "Connecting to PostgreSQL"
            );
            let pg = Arc::new(PgStore::connect(url, config.database_max_connections).await?);
            pg.migrate().await?;
            return Ok(Self {
                store: pg.clone(),
                pg: Some(pg),
            });
        }

        #[cfg(feature = "rocksdb-backend")]
        if let Some(dir) = &config.data_dir {
            tracing::info!(path = %dir, "Opening RocksDB store");
            let rocks = dinner_store::RocksStore::open(dir)?;
            return Ok(Self {
                store: Arc::new(rocks),
                pg: None,
            });
        }

        tracing::warn!("No database configured - using in-memory store, data will not persist");
        Ok(Self {
            store: Arc::new(MemoryStore::new()),
            pg: None,
        })
    }

    /// Release database connections.
    pub async fn close(&self) {
        if let Some(pg) = &self.pg {
            pg.close().await;
            tracing::info!("PostgreSQL pool closed");
        }
    }
}
