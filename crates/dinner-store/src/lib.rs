//! Storage layer for Dinner Surprise billing.
//!
//! The [`Store`] trait is the single persistence seam for subscriptions,
//! profiles (tier mirror and usage counters) and saved recipes. Three
//! backends implement it:
//!
//! - [`MemoryStore`]: in-process maps, used in tests and when no database is
//!   configured.
//! - [`PgStore`]: PostgreSQL through `sqlx`. Upserts and counter updates are
//!   single statements.
//! - `RocksStore`: `RocksDB` column families with CBOR values (feature
//!   `rocksdb-backend`).
//!
//! # Example
//!
//! ```no_run
//! use dinner_core::{Profile, SubscriptionPatch, PlanType, SubscriptionStatus, UserId};
//! use dinner_store::{MemoryStore, Store};
//!
//! # async fn example() -> dinner_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store.put_profile(&Profile::new(user_id)).await?;
//!
//! let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::Active);
//! let subscription = store.upsert_subscription(&user_id, &patch).await?;
//! assert_eq!(subscription.plan_type, PlanType::Premium);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use dinner_core::{
    PlanType, Profile, RecipeId, SavedRecipe, Subscription, SubscriptionPatch, TierMismatch,
    UsagePeriod, UserId,
};

/// Outcome of a conditional counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// The counter was incremented; holds the new value.
    Applied(u32),
    /// The counter is at its limit and was left unchanged; holds its value.
    LimitReached(u32),
}

impl Increment {
    /// Whether the increment happened.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// The storage trait defining all database operations.
///
/// Every mutating method is a single atomic step in each backend, so
/// concurrent callers never observe or produce torn records.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Get the subscription for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Create the user's subscription if absent, otherwise merge `patch`
    /// into it field by field and bump `updated_at`.
    ///
    /// A fresh record starts as free/inactive before the patch applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription>;

    /// Find the subscription owning a billing customer reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Subscription>>;

    /// Find the subscription with a billing subscription reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_billing_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>>;

    /// List every subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    // =========================================================================
    // Profile Operations
    // =========================================================================

    /// Get a user's profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>>;

    /// Insert or replace a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_profile(&self, profile: &Profile) -> Result<()>;

    /// Overwrite the profile's tier mirror.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn set_tier(&self, user_id: &UserId, tier: PlanType) -> Result<()>;

    /// Every user whose profile tier differs from their subscription plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_tier_mismatches(&self) -> Result<Vec<TierMismatch>>;

    // =========================================================================
    // Counter Operations
    // =========================================================================

    /// Increment the monthly generation counter unless it has reached
    /// `limit` (`None` = unlimited).
    ///
    /// A profile whose stored period differs from `period` is reset to
    /// zero in the same step.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn try_increment_usage(
        &self,
        user_id: &UserId,
        period: UsagePeriod,
        limit: Option<u32>,
    ) -> Result<Increment>;

    /// Decrement the monthly generation counter, saturating at zero.
    ///
    /// Nothing is released when the stored period differs from `period`.
    /// Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn decrement_usage(&self, user_id: &UserId, period: UsagePeriod) -> Result<u32>;

    /// Increment the saved recipe counter unless it has reached `limit`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn try_increment_saved(&self, user_id: &UserId, limit: u32) -> Result<Increment>;

    /// Decrement the saved recipe counter, saturating at zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn decrement_saved(&self, user_id: &UserId) -> Result<u32>;

    // =========================================================================
    // Recipe Operations
    // =========================================================================

    /// Insert a saved recipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_recipe(&self, recipe: &SavedRecipe) -> Result<()>;

    /// Delete one of a user's saved recipes. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_recipe(&self, user_id: &UserId, recipe_id: &RecipeId) -> Result<bool>;

    /// List a user's saved recipes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_recipes(&self, user_id: &UserId) -> Result<Vec<SavedRecipe>>;
}

/// Build the record `upsert_subscription` stores when `existing` is merged
/// with `patch` at `now`.
pub(crate) fn merged_subscription(
    user_id: &UserId,
    existing: Option<Subscription>,
    patch: &SubscriptionPatch,
    now: chrono::DateTime<chrono::Utc>,
) -> Subscription {
    let mut subscription = existing.unwrap_or_else(|| {
        let mut fresh = Subscription::free(*user_id);
        fresh.created_at = now;
        fresh
    });
    subscription.merge(patch);
    subscription.updated_at = now;
    subscription
}

/// Tier mismatches between a set of subscriptions and their profiles.
pub(crate) fn mismatches<'a>(
    subscriptions: impl IntoIterator<Item = &'a Subscription>,
    tier_of: impl Fn(&UserId) -> Option<PlanType>,
) -> Vec<TierMismatch> {
    let mut out: Vec<TierMismatch> = subscriptions
        .into_iter()
        .filter_map(|sub| {
            let tier = tier_of(&sub.user_id)?;
            (tier != sub.plan_type).then_some(TierMismatch {
                user_id: sub.user_id,
                tier,
                plan_type: sub.plan_type,
            })
        })
        .collect();
    out.sort_by_key(|m| m.user_id);
    out
}
