//! In-memory storage implementation.
//!
//! Backs tests and single-process deployments without a database. All state
//! sits behind one `RwLock`, so every trait method is a single critical
//! section.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use dinner_core::{
    PlanType, Profile, RecipeId, SavedRecipe, Subscription, SubscriptionPatch, TierMismatch,
    UsagePeriod, UserId,
};

use crate::error::{Result, StoreError};
use crate::{merged_subscription, mismatches, Increment, Store};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<UserId, Subscription>,
    profiles: HashMap<UserId, Profile>,
    recipes: BTreeMap<(UserId, RecipeId), SavedRecipe>,
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscription and tier-mirror writes performed so far.
    ///
    /// Counter updates and recipe writes are not included.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        Ok(self.inner.read().await.subscriptions.get(user_id).cloned())
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription> {
        let mut inner = self.inner.write().await;
        let existing = inner.subscriptions.remove(user_id);
        let subscription = merged_subscription(user_id, existing, patch, Utc::now());
        inner.subscriptions.insert(*user_id, subscription.clone());
        self.record_write();
        Ok(subscription)
    }

    async fn find_subscription_by_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| s.billing_customer_ref.as_deref() == Some(customer_ref))
            .cloned())
    }

    async fn find_subscription_by_billing_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| s.billing_subscription_ref.as_deref() == Some(subscription_ref))
            .cloned())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut all: Vec<_> = self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|s| s.user_id);
        Ok(all)
    }

    // =========================================================================
    // Profile Operations
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>> {
        Ok(self.inner.read().await.profiles.get(user_id).cloned())
    }

    async fn put_profile(&self, profile: &Profile) -> Result<()> {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.user_id, profile.clone());
        self.record_write();
        Ok(())
    }

    async fn set_tier(&self, user_id: &UserId, tier: PlanType) -> Result<()> {
        let mut inner = self.inner.write().await;
        let profile = inner.profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;
        profile.tier = tier;
        profile.updated_at = Utc::now();
        self.record_write();
        Ok(())
    }

    async fn list_tier_mismatches(&self) -> Result<Vec<TierMismatch>> {
        let inner = self.inner.read().await;
        Ok(mismatches(inner.subscriptions.values(), |id| {
            inner.profiles.get(id).map(|p| p.tier)
        }))
    }

    // =========================================================================
    // Counter Operations
    // =========================================================================

    async fn try_increment_usage(
        &self,
        user_id: &UserId,
        period: UsagePeriod,
        limit: Option<u32>,
    ) -> Result<Increment> {
        let mut inner = self.inner.write().await;
        let profile = inner.profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;

        let current = profile.usage_in(period);
        if limit.is_some_and(|l| current >= l) {
            return Ok(Increment::LimitReached(current));
        }

        profile.usage_period = period;
        profile.monthly_usage = current + 1;
        profile.updated_at = Utc::now();
        Ok(Increment::Applied(profile.monthly_usage))
    }

    async fn decrement_usage(&self, user_id: &UserId, period: UsagePeriod) -> Result<u32> {
        let mut inner = self.inner.write().await;
        let profile = inner.profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;

        if profile.usage_period != period {
            return Ok(0);
        }
        profile.monthly_usage = profile.monthly_usage.saturating_sub(1);
        profile.updated_at = Utc::now();
        Ok(profile.monthly_usage)
    }

    async fn try_increment_saved(&self, user_id: &UserId, limit: u32) -> Result<Increment> {
        let mut inner = self.inner.write().await;
        let profile = inner.profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;

        if profile.saved_recipes_count >= limit {
            return Ok(Increment::LimitReached(profile.saved_recipes_count));
        }
        profile.saved_recipes_count += 1;
        profile.updated_at = Utc::now();
        Ok(Increment::Applied(profile.saved_recipes_count))
    }

    async fn decrement_saved(&self, user_id: &UserId) -> Result<u32> {
        let mut inner = self.inner.write().await;
        let profile = inner.profiles.get_mut(user_id).ok_or(StoreError::NotFound)?;

        profile.saved_recipes_count = profile.saved_recipes_count.saturating_sub(1);
        profile.updated_at = Utc::now();
        Ok(profile.saved_recipes_count)
    }

    // =========================================================================
    // Recipe Operations
    // =========================================================================

    async fn insert_recipe(&self, recipe: &SavedRecipe) -> Result<()> {
        self.inner
            .write()
            .await
            .recipes
            .insert((recipe.user_id, recipe.id), recipe.clone());
        Ok(())
    }

    async fn delete_recipe(&self, user_id: &UserId, recipe_id: &RecipeId) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .recipes
            .remove(&(*user_id, *recipe_id))
            .is_some())
    }

    async fn list_recipes(&self, user_id: &UserId) -> Result<Vec<SavedRecipe>> {
        Ok(self
            .inner
            .read()
            .await
            .recipes
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, recipe)| recipe.clone())
            .collect())
    }
}
