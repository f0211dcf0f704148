//! PostgreSQL storage implementation.
//!
//! Every mutating operation is one SQL statement, so concurrent webhook
//! deliveries, syncs and quota checks are serialized by row locks in the
//! database rather than in the process.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use dinner_core::{
    PlanType, Profile, RecipeId, SavedRecipe, Subscription, SubscriptionPatch, TierMismatch,
    UsagePeriod, UserId,
};

use crate::error::{Result, StoreError};
use crate::{Increment, Store};

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database migration failed");
                StoreError::Migration(e.to_string())
            })?;
        tracing::debug!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn require_profile(&self, user_id: &UserId) -> Result<Profile> {
        self.get_profile(user_id).await?.ok_or(StoreError::NotFound)
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    user_id: Uuid,
    plan_type: String,
    status: String,
    billing_customer_ref: Option<String>,
    billing_subscription_ref: Option<String>,
    price_ref: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    trial_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            plan_type: row.plan_type.parse().map_err(dinner_core::BillingError::from)?,
            status: row.status.parse().map_err(dinner_core::BillingError::from)?,
            billing_customer_ref: row.billing_customer_ref,
            billing_subscription_ref: row.billing_subscription_ref,
            price_ref: row.price_ref,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            trial_end: row.trial_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: Uuid,
    display_name: Option<String>,
    tier: String,
    monthly_usage: i32,
    usage_period: String,
    saved_recipes_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            display_name: row.display_name,
            tier: row.tier.parse().map_err(dinner_core::BillingError::from)?,
            monthly_usage: to_count(row.monthly_usage),
            usage_period: row
                .usage_period
                .parse()
                .map_err(dinner_core::BillingError::from)?,
            saved_recipes_count: to_count(row.saved_recipes_count),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecipeRow {
    id: String,
    user_id: Uuid,
    title: String,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecipeRow> for SavedRecipe {
    type Error = StoreError;

    fn try_from(row: RecipeRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse().map_err(dinner_core::BillingError::from)?,
            user_id: UserId::from_uuid(row.user_id),
            title: row.title,
            body: row.body,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MismatchRow {
    user_id: Uuid,
    tier: String,
    plan_type: String,
}

fn to_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn to_limit(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription> {
        // Odd parameters flag whether a nullable column is part of the patch,
        // the following even parameter carries its new value.
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r"
            INSERT INTO subscriptions (
                user_id, plan_type, status,
                billing_customer_ref, billing_subscription_ref, price_ref,
                current_period_start, current_period_end, trial_end,
                created_at, updated_at
            )
            VALUES (
                $1, COALESCE($2::TEXT, 'free'), COALESCE($3::TEXT, 'inactive'),
                $5, $7, $9, $11, $13, $15,
                now(), now()
            )
            ON CONFLICT (user_id) DO UPDATE SET
                plan_type = COALESCE($2::TEXT, subscriptions.plan_type),
                status = COALESCE($3::TEXT, subscriptions.status),
                billing_customer_ref = CASE WHEN $4 THEN $5 ELSE subscriptions.billing_customer_ref END,
                billing_subscription_ref = CASE WHEN $6 THEN $7 ELSE subscriptions.billing_subscription_ref END,
                price_ref = CASE WHEN $8 THEN $9 ELSE subscriptions.price_ref END,
                current_period_start = CASE WHEN $10 THEN $11 ELSE subscriptions.current_period_start END,
                current_period_end = CASE WHEN $12 THEN $13 ELSE subscriptions.current_period_end END,
                trial_end = CASE WHEN $14 THEN $15 ELSE subscriptions.trial_end END,
                updated_at = now()
            RETURNING *
            ",
        )
        .bind(user_id.as_uuid())
        .bind(patch.plan_type.map(|p| p.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.billing_customer_ref.is_some())
        .bind(patch.billing_customer_ref.clone().flatten())
        .bind(patch.billing_subscription_ref.is_some())
        .bind(patch.billing_subscription_ref.clone().flatten())
        .bind(patch.price_ref.is_some())
        .bind(patch.price_ref.clone().flatten())
        .bind(patch.current_period_start.is_some())
        .bind(patch.current_period_start.flatten())
        .bind(patch.current_period_end.is_some())
        .bind(patch.current_period_end.flatten())
        .bind(patch.trial_end.is_some())
        .bind(patch.trial_end.flatten())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_subscription_by_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE billing_customer_ref = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(customer_ref)
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn find_subscription_by_billing_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE billing_subscription_ref = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(subscription_ref)
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    // =========================================================================
    // Profile Operations
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>> {
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Profile::try_from)
            .transpose()
    }

    async fn put_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO profiles (
                user_id, display_name, tier, monthly_usage, usage_period,
                saved_recipes_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                tier = EXCLUDED.tier,
                monthly_usage = EXCLUDED.monthly_usage,
                usage_period = EXCLUDED.usage_period,
                saved_recipes_count = EXCLUDED.saved_recipes_count,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(profile.user_id.as_uuid())
        .bind(profile.display_name.as_deref())
        .bind(profile.tier.as_str())
        .bind(to_limit(profile.monthly_usage))
        .bind(profile.usage_period.to_string())
        .bind(to_limit(profile.saved_recipes_count))
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_tier(&self, user_id: &UserId, tier: PlanType) -> Result<()> {
        let result =
            sqlx::query("UPDATE profiles SET tier = $2, updated_at = now() WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .bind(tier.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_tier_mismatches(&self) -> Result<Vec<TierMismatch>> {
        let rows = sqlx::query_as::<_, MismatchRow>(
            r"
            SELECT s.user_id, p.tier, s.plan_type
            FROM subscriptions s
            JOIN profiles p ON p.user_id = s.user_id
            WHERE p.tier <> s.plan_type
            ORDER BY s.user_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TierMismatch {
                    user_id: UserId::from_uuid(row.user_id),
                    tier: row.tier.parse().map_err(dinner_core::BillingError::from)?,
                    plan_type: row
                        .plan_type
                        .parse()
                        .map_err(dinner_core::BillingError::from)?,
                })
            })
            .collect()
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
        let updated: Option<i32> = sqlx::query_scalar(
            r"
            UPDATE profiles SET
                monthly_usage = CASE WHEN usage_period = $2 THEN monthly_usage + 1 ELSE 1 END,
                usage_period = $2,
                updated_at = now()
            WHERE user_id = $1
              AND (
                $3::INTEGER IS NULL
                OR (CASE WHEN usage_period = $2 THEN monthly_usage ELSE 0 END) < $3::INTEGER
              )
            RETURNING monthly_usage
            ",
        )
        .bind(user_id.as_uuid())
        .bind(period.to_string())
        .bind(limit.map(to_limit))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(count) => Ok(Increment::Applied(to_count(count))),
            None => {
                let profile = self.require_profile(user_id).await?;
                Ok(Increment::LimitReached(profile.usage_in(period)))
            }
        }
    }

    async fn decrement_usage(&self, user_id: &UserId, period: UsagePeriod) -> Result<u32> {
        let updated: Option<i32> = sqlx::query_scalar(
            r"
            UPDATE profiles SET
                monthly_usage = GREATEST(monthly_usage - 1, 0),
                updated_at = now()
            WHERE user_id = $1 AND usage_period = $2
            RETURNING monthly_usage
            ",
        )
        .bind(user_id.as_uuid())
        .bind(period.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(count) => Ok(to_count(count)),
            None => self.require_profile(user_id).await.map(|_| 0),
        }
    }

    async fn try_increment_saved(&self, user_id: &UserId, limit: u32) -> Result<Increment> {
        let updated: Option<i32> = sqlx::query_scalar(
            r"
            UPDATE profiles SET
                saved_recipes_count = saved_recipes_count + 1,
                updated_at = now()
            WHERE user_id = $1 AND saved_recipes_count < $2
            RETURNING saved_recipes_count
            ",
        )
        .bind(user_id.as_uuid())
        .bind(to_limit(limit))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(count) => Ok(Increment::Applied(to_count(count))),
            None => {
                let profile = self.require_profile(user_id).await?;
                Ok(Increment::LimitReached(profile.saved_recipes_count))
            }
        }
    }

    async fn decrement_saved(&self, user_id: &UserId) -> Result<u32> {
        let updated: Option<i32> = sqlx::query_scalar(
            r"
            UPDATE profiles SET
                saved_recipes_count = GREATEST(saved_recipes_count - 1, 0),
                updated_at = now()
            WHERE user_id = $1
            RETURNING saved_recipes_count
            ",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        updated.map(to_count).ok_or(StoreError::NotFound)
    }

    // =========================================================================
    // Recipe Operations
    // =========================================================================

    async fn insert_recipe(&self, recipe: &SavedRecipe) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipes (id, user_id, title, body, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(recipe.id.to_string())
        .bind(recipe.user_id.as_uuid())
        .bind(&recipe.title)
        .bind(&recipe.body)
        .bind(recipe.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_recipe(&self, user_id: &UserId, recipe_id: &RecipeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recipes WHERE id = $1 AND user_id = $2")
            .bind(recipe_id.to_string())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_recipes(&self, user_id: &UserId) -> Result<Vec<SavedRecipe>> {
        sqlx::query_as::<_, RecipeRow>("SELECT * FROM recipes WHERE user_id = $1 ORDER BY id")
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(SavedRecipe::try_from)
            .collect()
    }
}
