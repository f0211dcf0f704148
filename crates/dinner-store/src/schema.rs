//! Column families of the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Subscription records, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Index: billing customer reference to `user_id`.
    pub const SUBSCRIPTIONS_BY_CUSTOMER: &str = "subscriptions_by_customer";

    /// Index: billing subscription reference to `user_id`.
    pub const SUBSCRIPTIONS_BY_BILLING_REF: &str = "subscriptions_by_billing_ref";

    /// Profiles, keyed by `user_id`.
    pub const PROFILES: &str = "profiles";

    /// Saved recipes, keyed by `user_id || recipe_id`.
    pub const RECIPES: &str = "recipes";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SUBSCRIPTIONS,
        cf::SUBSCRIPTIONS_BY_CUSTOMER,
        cf::SUBSCRIPTIONS_BY_BILLING_REF,
        cf::PROFILES,
        cf::RECIPES,
    ]
}
