//! `RocksDB` storage implementation.
//!
//! Values are CBOR-encoded. Read-modify-write operations hold a store-wide
//! write lock and commit through a single `WriteBatch`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tokio::sync::Mutex;

use dinner_core::{
    PlanType, Profile, RecipeId, SavedRecipe, Subscription, SubscriptionPatch, TierMismatch,
    UsagePeriod, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{merged_subscription, mismatches, Increment, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write<T: serde::Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db
            .put_cf(&cf, key, Self::serialize(value)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect every value under `prefix` (all values when empty).
    fn scan<T: serde::de::DeserializeOwned>(&self, family: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(Self::deserialize(&value)?);
        }
        Ok(values)
    }

    fn find_by_index(&self, index: &str, reference: &str) -> Result<Option<Subscription>> {
        let cf = self.cf(index)?;
        let Some(value) = self
            .db
            .get_cf(&cf, keys::reference_key(reference))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        match keys::decode_user_id(&value) {
            Some(user_id) => self.read(cf::SUBSCRIPTIONS, &keys::user_key(&user_id)),
            None => Err(StoreError::Serialization("corrupt index entry".into())),
        }
    }

    fn update_profile<F>(&self, user_id: &UserId, update: F) -> Result<Profile>
    where
        F: FnOnce(&mut Profile) -> bool,
    {
        let key = keys::user_key(user_id);
        let mut profile: Profile = self.read(cf::PROFILES, &key)?.ok_or(StoreError::NotFound)?;
        if update(&mut profile) {
            profile.updated_at = Utc::now();
            self.write(cf::PROFILES, &key, &profile)?;
        }
        Ok(profile)
    }
}

/// Stage index maintenance for one reference column.
fn reindex(
    batch: &mut WriteBatch,
    index: &Arc<BoundColumnFamily<'_>>,
    old: Option<&str>,
    new: Option<&str>,
    user_key: &[u8],
) {
    if old == new {
        return;
    }
    if let Some(old) = old {
        batch.delete_cf(index, keys::reference_key(old));
    }
    if let Some(new) = new {
        batch.put_cf(index, keys::reference_key(new), user_key);
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        self.read(cf::SUBSCRIPTIONS, &keys::user_key(user_id))
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription> {
        let _guard = self.write_lock.lock().await;

        let key = keys::user_key(user_id);
        let existing: Option<Subscription> = self.read(cf::SUBSCRIPTIONS, &key)?;
        let old_customer = existing.as_ref().and_then(|s| s.billing_customer_ref.clone());
        let old_ref = existing.as_ref().and_then(|s| s.billing_subscription_ref.clone());

        let subscription = merged_subscription(user_id, existing, patch, Utc::now());

        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_by_customer = self.cf(cf::SUBSCRIPTIONS_BY_CUSTOMER)?;
        let cf_by_ref = self.cf(cf::SUBSCRIPTIONS_BY_BILLING_REF)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_subs, &key, Self::serialize(&subscription)?);
        reindex(
            &mut batch,
            &cf_by_customer,
            old_customer.as_deref(),
            subscription.billing_customer_ref.as_deref(),
            &key,
        );
        reindex(
            &mut batch,
            &cf_by_ref,
            old_ref.as_deref(),
            subscription.billing_subscription_ref.as_deref(),
            &key,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(subscription)
    }

    async fn find_subscription_by_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Subscription>> {
        self.find_by_index(cf::SUBSCRIPTIONS_BY_CUSTOMER, customer_ref)
    }

    async fn find_subscription_by_billing_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>> {
        self.find_by_index(cf::SUBSCRIPTIONS_BY_BILLING_REF, subscription_ref)
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.scan(cf::SUBSCRIPTIONS, &[])
    }

    // =========================================================================
    // Profile Operations
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>> {
        self.read(cf::PROFILES, &keys::user_key(user_id))
    }

    async fn put_profile(&self, profile: &Profile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(cf::PROFILES, &keys::user_key(&profile.user_id), profile)
    }

    async fn set_tier(&self, user_id: &UserId, tier: PlanType) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.update_profile(user_id, |p| {
            p.tier = tier;
            true
        })
        .map(|_| ())
    }

    async fn list_tier_mismatches(&self) -> Result<Vec<TierMismatch>> {
        let subscriptions: Vec<Subscription> = self.scan(cf::SUBSCRIPTIONS, &[])?;
        let profiles: Vec<Profile> = self.scan(cf::PROFILES, &[])?;
        Ok(mismatches(&subscriptions, |id| {
            profiles.iter().find(|p| p.user_id == *id).map(|p| p.tier)
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
        let _guard = self.write_lock.lock().await;
        let mut outcome = Increment::LimitReached(0);
        self.update_profile(user_id, |p| {
            let current = p.usage_in(period);
            if limit.is_some_and(|l| current >= l) {
                outcome = Increment::LimitReached(current);
                return false;
            }
            p.usage_period = period;
            p.monthly_usage = current + 1;
            outcome = Increment::Applied(p.monthly_usage);
            true
        })?;
        Ok(outcome)
    }

    async fn decrement_usage(&self, user_id: &UserId, period: UsagePeriod) -> Result<u32> {
        let _guard = self.write_lock.lock().await;
        let profile = self.update_profile(user_id, |p| {
            if p.usage_period != period {
                return false;
            }
            p.monthly_usage = p.monthly_usage.saturating_sub(1);
            true
        })?;
        Ok(profile.usage_in(period))
    }

    async fn try_increment_saved(&self, user_id: &UserId, limit: u32) -> Result<Increment> {
        let _guard = self.write_lock.lock().await;
        let mut applied = false;
        let profile = self.update_profile(user_id, |p| {
            if p.saved_recipes_count >= limit {
                return false;
            }
            p.saved_recipes_count += 1;
            applied = true;
            true
        })?;

        Ok(if applied {
            Increment::Applied(profile.saved_recipes_count)
        } else {
            Increment::LimitReached(profile.saved_recipes_count)
        })
    }

    async fn decrement_saved(&self, user_id: &UserId) -> Result<u32> {
        let _guard = self.write_lock.lock().await;
        let profile = self.update_profile(user_id, |p| {
            p.saved_recipes_count = p.saved_recipes_count.saturating_sub(1);
            true
        })?;
        Ok(profile.saved_recipes_count)
    }

    // =========================================================================
    // Recipe Operations
    // =========================================================================

    async fn insert_recipe(&self, recipe: &SavedRecipe) -> Result<()> {
        self.write(
            cf::RECIPES,
            &keys::recipe_key(&recipe.user_id, &recipe.id),
            recipe,
        )
    }

    async fn delete_recipe(&self, user_id: &UserId, recipe_id: &RecipeId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = keys::recipe_key(user_id, recipe_id);
        let cf = self.cf(cf::RECIPES)?;

        let exists = self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            self.db
                .delete_cf(&cf, &key)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(exists)
    }

    async fn list_recipes(&self, user_id: &UserId) -> Result<Vec<SavedRecipe>> {
        self.scan(cf::RECIPES, &keys::recipes_prefix(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dinner_core::SubscriptionStatus;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn subscription_upsert_and_indexes() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::Active)
            .with_customer("cus_1")
            .with_subscription_ref("sub_1");
        store.upsert_subscription(&user_id, &patch).await.unwrap();

        let by_customer = store.find_subscription_by_customer("cus_1").await.unwrap();
        assert_eq!(by_customer.map(|s| s.user_id), Some(user_id));

        // Replacing the reference drops the old index entry.
        let patch = SubscriptionPatch::default().with_subscription_ref("sub_2");
        store.upsert_subscription(&user_id, &patch).await.unwrap();
        assert!(store
            .find_subscription_by_billing_ref("sub_1")
            .await
            .unwrap()
            .is_none());
        let by_ref = store.find_subscription_by_billing_ref("sub_2").await.unwrap();
        assert_eq!(by_ref.map(|s| s.plan_type), Some(PlanType::Premium));

        assert_eq!(store.list_subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn profile_counters() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.put_profile(&Profile::new(user_id)).await.unwrap();

        let period = UsagePeriod::current();
        assert_eq!(
            store.try_increment_usage(&user_id, period, Some(1)).await.unwrap(),
            Increment::Applied(1)
        );
        assert_eq!(
            store.try_increment_usage(&user_id, period, Some(1)).await.unwrap(),
            Increment::LimitReached(1)
        );
        assert_eq!(store.decrement_usage(&user_id, period).await.unwrap(), 0);

        assert_eq!(
            store.try_increment_saved(&user_id, 1).await.unwrap(),
            Increment::Applied(1)
        );
        assert_eq!(
            store.try_increment_saved(&user_id, 1).await.unwrap(),
            Increment::LimitReached(1)
        );
        assert_eq!(store.decrement_saved(&user_id).await.unwrap(), 0);
        assert_eq!(store.decrement_saved(&user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tier_mirror_and_mismatches() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.put_profile(&Profile::new(user_id)).await.unwrap();
        let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::Active);
        store.upsert_subscription(&user_id, &patch).await.unwrap();

        assert_eq!(store.list_tier_mismatches().await.unwrap().len(), 1);
        store.set_tier(&user_id, PlanType::Premium).await.unwrap();
        assert!(store.list_tier_mismatches().await.unwrap().is_empty());

        let missing = store.set_tier(&UserId::generate(), PlanType::Free).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn recipes_roundtrip() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let first = SavedRecipe::new(user_id, serde_json::json!({"title": "A"}));
        let second = SavedRecipe::new(user_id, serde_json::json!({"title": "B"}));
        store.insert_recipe(&first).await.unwrap();
        store.insert_recipe(&second).await.unwrap();

        let listed = store.list_recipes(&user_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(store.delete_recipe(&user_id, &first.id).await.unwrap());
        assert!(!store.delete_recipe(&user_id, &first.id).await.unwrap());
        let remaining = store.list_recipes(&user_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }
}
