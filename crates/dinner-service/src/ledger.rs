//! Usage ledger: quota checks and compensating releases.
//!
//! Every consume is a single conditional increment in the store, so two
//! concurrent requests can never both take the last slot. Releases undo a
//! consume after a later step fails; they saturate at zero and are never
//! retried.

use std::sync::Arc;

use chrono::Utc;
use dinner_core::{PlanType, Quota, UsagePeriod, UsageSummary, UserId};
use dinner_store::{Increment, Store, StoreError};
use serde::Serialize;
use tracing::{error, info};

/// Errors from the usage ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The user is at the quota for their plan.
    #[error("{quota} quota exceeded: plan={plan}, limit={limit}")]
    QuotaExceeded {
        /// Which quota.
        quota: Quota,
        /// Effective plan the quota came from.
        plan: PlanType,
        /// The limit that was hit.
        limit: u32,
    },

    /// The user has no profile to count against.
    #[error("profile not found: {0}")]
    ProfileNotFound(UserId),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A consumed recipe generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationGrant {
    /// Effective plan at the time of the request.
    pub plan: PlanType,
    /// Month the generation counts against.
    pub period: UsagePeriod,
    /// Generations used this month, including this one.
    pub used: u32,
    /// Monthly quota (`None` = unlimited).
    pub limit: Option<u32>,
}

impl GenerationGrant {
    /// Generations left this month (`None` = unlimited).
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|l| l.saturating_sub(self.used))
    }
}

/// A consumed saved-recipe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveGrant {
    /// Effective plan at the time of the request.
    pub plan: PlanType,
    /// Saved recipes, including this one.
    pub saved: u32,
}

/// Tracks per-user generation and saved-recipe quotas.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn Store>,
}

impl UsageLedger {
    /// Create a ledger over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The plan quotas are computed from.
    ///
    /// The subscription's effective plan wins (period-end expiry applies);
    /// without a subscription the profile tier is used.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` when the user has neither record.
    pub async fn effective_plan(&self, user_id: &UserId) -> Result<PlanType, LedgerError> {
        if let Some(subscription) = self.store.get_subscription(user_id).await? {
            return Ok(subscription.effective_plan_at(Utc::now()));
        }

        self.store
            .get_profile(user_id)
            .await?
            .map(|p| p.tier)
            .ok_or(LedgerError::ProfileNotFound(*user_id))
    }

    /// Usage counters measured against the user's effective plan.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` when the user has no profile.
    pub async fn usage(&self, user_id: &UserId) -> Result<UsageSummary, LedgerError> {
        let plan = self.effective_plan(user_id).await?;
        let profile = self
            .store
            .get_profile(user_id)
            .await?
            .ok_or(LedgerError::ProfileNotFound(*user_id))?;
        Ok(profile.usage_summary(plan, UsagePeriod::current()))
    }

    /// Consume one recipe generation for the current month.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the monthly limit is reached.
    pub async fn try_consume_generation(
        &self,
        user_id: &UserId,
    ) -> Result<GenerationGrant, LedgerError> {
        let plan = self.effective_plan(user_id).await?;
        let period = UsagePeriod::current();
        let limit = plan.monthly_generation_limit();

        match self
            .store
            .try_increment_usage(user_id, period, limit)
            .await
            .map_err(|e| not_found_as_profile(e, user_id))?
        {
            Increment::Applied(used) => Ok(GenerationGrant {
                plan,
                period,
                used,
                limit,
            }),
            Increment::LimitReached(used) => {
                info!(user_id = %user_id, plan = %plan, used, "Generation quota reached");
                Err(LedgerError::QuotaExceeded {
                    quota: Quota::Generations,
                    plan,
                    limit: limit.unwrap_or(used),
                })
            }
        }
    }

    /// Give back a generation consumed in `period`.
    ///
    /// Failures are logged and returned, never retried.
    ///
    /// # Errors
    ///
    /// Returns the storage error that prevented the release.
    pub async fn release_generation(
        &self,
        user_id: &UserId,
        period: UsagePeriod,
    ) -> Result<u32, LedgerError> {
        self.store
            .decrement_usage(user_id, period)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, period = %period, error = %e, "Failed to release generation");
                not_found_as_profile(e, user_id)
            })
    }

    /// Take a saved-recipe slot.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` when the plan's saved-recipe limit is reached.
    pub async fn try_save_item(&self, user_id: &UserId) -> Result<SaveGrant, LedgerError> {
        let plan = self.effective_plan(user_id).await?;
        let limit = plan.saved_recipe_limit();

        match self
            .store
            .try_increment_saved(user_id, limit)
            .await
            .map_err(|e| not_found_as_profile(e, user_id))?
        {
            Increment::Applied(saved) => Ok(SaveGrant { plan, saved }),
            Increment::LimitReached(saved) => {
                info!(user_id = %user_id, plan = %plan, saved, "Saved recipe quota reached");
                Err(LedgerError::QuotaExceeded {
                    quota: Quota::SavedRecipes,
                    plan,
                    limit,
                })
            }
        }
    }

    /// Give back a saved-recipe slot.
    ///
    /// Failures are logged and returned, never retried.
    ///
    /// # Errors
    ///
    /// Returns the storage error that prevented the release.
    pub async fn release_saved_item(&self, user_id: &UserId) -> Result<u32, LedgerError> {
        self.store.decrement_saved(user_id).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to release saved recipe slot");
            not_found_as_profile(e, user_id)
        })
    }
}

fn not_found_as_profile(err: StoreError, user_id: &UserId) -> LedgerError {
    match err {
        StoreError::NotFound => LedgerError::ProfileNotFound(*user_id),
        other => LedgerError::Store(other),
    }
}
