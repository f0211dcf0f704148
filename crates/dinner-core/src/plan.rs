//! Plan tiers, subscription statuses and plan derivation.
//!
//! A user's plan is derived from several billing-provider signals that do not
//! always agree. [`PlanResolver`] applies one fixed precedence order so that
//! webhook ingestion and reconciliation always derive the same plan from the
//! same inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Monthly recipe generations allowed on the free plan.
pub const FREE_MONTHLY_GENERATIONS: u32 = 3;

/// Saved recipes allowed on the free plan.
pub const FREE_SAVED_RECIPES: u32 = 5;

/// Saved recipes allowed on paid plans.
pub const PAID_SAVED_RECIPES: u32 = 100;

/// The tier a user is entitled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Free tier: 3 generations per month, 5 saved recipes.
    #[default]
    Free,

    /// Premium tier: unlimited generations, 100 saved recipes.
    Premium,

    /// Family tier: same quotas as premium.
    Family,
}

impl PlanType {
    /// Get the plan name as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Family => "family",
        }
    }

    /// Whether this plan is paid for.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Monthly generation quota (`None` means unlimited).
    #[must_use]
    pub const fn monthly_generation_limit(&self) -> Option<u32> {
        match self {
            Self::Free => Some(FREE_MONTHLY_GENERATIONS),
            Self::Premium | Self::Family => None,
        }
    }

    /// Saved recipe quota.
    #[must_use]
    pub const fn saved_recipe_limit(&self) -> u32 {
        match self {
            Self::Free => FREE_SAVED_RECIPES,
            Self::Premium | Self::Family => PAID_SAVED_RECIPES,
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "family" => Ok(Self::Family),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Local subscription status.
///
/// This is a superset of the billing provider's statuses: `Inactive` marks
/// free users that never paid and `ActiveUntilPeriodEnd` marks a paid
/// subscription that will not renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// No paid subscription.
    #[default]
    Inactive,

    /// Paid and renewing.
    Active,

    /// Paid, cancelled by the user, entitled until the period ends.
    ActiveUntilPeriodEnd,

    /// Renewal payment failed; access is kept during the grace period.
    PastDue,

    /// Cancelled or deleted upstream.
    Canceled,

    /// Paused upstream.
    Paused,

    /// In a trial period.
    Trialing,
}

impl SubscriptionStatus {
    /// Get the status as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::ActiveUntilPeriodEnd => "active_until_period_end",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Paused => "paused",
            Self::Trialing => "trialing",
        }
    }

    /// Map a billing-provider status string onto a local status.
    ///
    /// Provider statuses without a local counterpart collapse onto the
    /// closest entitlement: `unpaid` keeps the grace-period semantics of
    /// `past_due`, `incomplete_expired` is a cancellation and `incomplete`
    /// never granted access.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "incomplete_expired" => Self::Canceled,
            "paused" => Self::Paused,
            _ => Self::Inactive,
        }
    }

    /// Whether this status grants the stored plan (before period-end checks).
    #[must_use]
    pub const fn grants_access(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::ActiveUntilPeriodEnd | Self::PastDue | Self::Trialing
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "inactive" => Ok(Self::Inactive),
            "active" => Ok(Self::Active),
            "active_until_period_end" => Ok(Self::ActiveUntilPeriodEnd),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "paused" => Ok(Self::Paused),
            "trialing" => Ok(Self::Trialing),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// A stored enum value that does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

// ============================================================================
// Plan derivation
// ============================================================================

/// Configured billing-provider price identifiers per paid plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceCatalog {
    /// Price IDs that grant the premium plan (monthly, yearly, ...).
    pub premium: Vec<String>,
    /// Price IDs that grant the family plan.
    pub family: Vec<String>,
}

impl PriceCatalog {
    /// Look up the plan for an exact price identifier.
    #[must_use]
    pub fn plan_for_price(&self, price_ref: &str) -> Option<PlanType> {
        if self.family.iter().any(|p| p == price_ref) {
            Some(PlanType::Family)
        } else if self.premium.iter().any(|p| p == price_ref) {
            Some(PlanType::Premium)
        } else {
            None
        }
    }
}

/// Everything the billing provider tells us that hints at a plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanSignals<'a> {
    /// `planType` metadata on the subscription or checkout session.
    pub metadata_plan: Option<&'a str>,
    /// Name of the product behind the price.
    pub product_name: Option<&'a str>,
    /// Nickname or lookup key of the price.
    pub price_name: Option<&'a str>,
    /// The price identifier itself.
    pub price_ref: Option<&'a str>,
}

/// Derives a [`PlanType`] from [`PlanSignals`].
///
/// Precedence:
/// 1. explicit `planType` metadata,
/// 2. keyword in the product or price name (`family`, then `premium`),
/// 3. exact match against the configured [`PriceCatalog`],
/// 4. `premium` for any other price,
/// 5. `free` when no price is attached.
#[derive(Debug, Clone, Default)]
pub struct PlanResolver {
    catalog: PriceCatalog,
}

impl PlanResolver {
    /// Create a resolver over a price catalog.
    #[must_use]
    pub fn new(catalog: PriceCatalog) -> Self {
        Self { catalog }
    }

    /// The configured price catalog.
    #[must_use]
    pub fn catalog(&self) -> &PriceCatalog {
        &self.catalog
    }

    /// Derive the plan for a set of signals.
    #[must_use]
    pub fn resolve(&self, signals: &PlanSignals<'_>) -> PlanType {
        if let Some(plan) = signals.metadata_plan.and_then(|m| m.parse().ok()) {
            return plan;
        }

        let by_keyword = [signals.product_name, signals.price_name]
            .into_iter()
            .flatten()
            .find_map(keyword_plan);
        if let Some(plan) = by_keyword {
            return plan;
        }

        match signals.price_ref {
            Some(price) => self
                .catalog
                .plan_for_price(price)
                .unwrap_or(PlanType::Premium),
            None => PlanType::Free,
        }
    }
}

fn keyword_plan(name: &str) -> Option<PlanType> {
    let name = name.to_ascii_lowercase();
    if name.contains("family") {
        Some(PlanType::Family)
    } else if name.contains("premium") {
        Some(PlanType::Premium)
    } else {
        None
    }
}
