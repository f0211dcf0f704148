//! User profiles: the tier mirror and the usage counters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanType;
use crate::UserId;

/// A user's profile.
///
/// `tier` mirrors [`crate::Subscription::plan_type`] and is only written by
/// reconciliation. The counters back the usage ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Owner of the profile.
    pub user_id: UserId,

    /// Name shown in the UI.
    pub display_name: Option<String>,

    /// Denormalized copy of the subscription's plan.
    pub tier: PlanType,

    /// Generations consumed during `usage_period`.
    pub monthly_usage: u32,

    /// The calendar month `monthly_usage` counts for.
    pub usage_period: UsagePeriod,

    /// Number of recipes currently saved.
    pub saved_recipes_count: u32,

    /// When the profile was created.
    pub created_at: DateTime<Utc>,

    /// When the profile was last written.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A new free-tier profile with zeroed counters.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            display_name: None,
            tier: PlanType::Free,
            monthly_usage: 0,
            usage_period: UsagePeriod::for_date(now),
            saved_recipes_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the tier.
    #[must_use]
    pub fn with_tier(mut self, tier: PlanType) -> Self {
        self.tier = tier;
        self
    }

    /// Generations used in `period`. A stale period counts as zero.
    #[must_use]
    pub fn usage_in(&self, period: UsagePeriod) -> u32 {
        if self.usage_period == period {
            self.monthly_usage
        } else {
            0
        }
    }

    /// Summarize usage against the quotas of `plan`.
    #[must_use]
    pub fn usage_summary(&self, plan: PlanType, period: UsagePeriod) -> UsageSummary {
        let generations_used = self.usage_in(period);
        let generations_limit = plan.monthly_generation_limit();
        let saved_recipes_limit = plan.saved_recipe_limit();
        UsageSummary {
            plan,
            period,
            generations_used,
            generations_limit,
            generations_remaining: generations_limit.map(|l| l.saturating_sub(generations_used)),
            saved_recipes: self.saved_recipes_count,
            saved_recipes_limit,
        }
    }
}

/// Usage counters measured against a plan's quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Plan the quotas come from.
    pub plan: PlanType,
    /// Month the generation counter covers.
    pub period: UsagePeriod,
    /// Generations used this month.
    pub generations_used: u32,
    /// Monthly generation quota (`None` = unlimited).
    pub generations_limit: Option<u32>,
    /// Generations left this month (`None` = unlimited).
    pub generations_remaining: Option<u32>,
    /// Recipes currently saved.
    pub saved_recipes: u32,
    /// Saved recipe quota.
    pub saved_recipes_limit: u32,
}

/// The quota a request draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
    /// Monthly recipe generations.
    Generations,
    /// Saved recipe slots.
    SavedRecipes,
}

impl Quota {
    /// Message shown to users who hit this quota.
    #[must_use]
    pub const fn upgrade_message(&self) -> &'static str {
        match self {
            Self::Generations => {
                "You have reached your monthly recipe limit. Upgrade to Premium for unlimited recipes."
            }
            Self::SavedRecipes => {
                "You have reached your saved recipe limit. Upgrade to Premium to save more recipes."
            }
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generations => "generations",
            Self::SavedRecipes => "saved_recipes",
        })
    }
}

/// A calendar month in UTC, rendered as `YYYY-MM`.
///
/// Monthly generation counters reset when the period rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsagePeriod {
    year: i32,
    month: u32,
}

impl UsagePeriod {
    /// The current month.
    #[must_use]
    pub fn current() -> Self {
        Self::for_date(Utc::now())
    }

    /// The month containing `at`.
    #[must_use]
    pub fn for_date(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The year.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// The month (1-12).
    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for UsagePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for UsagePeriod {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| InvalidPeriod(s.to_string()))?;
        let year = year.parse().map_err(|_| InvalidPeriod(s.to_string()))?;
        let month: u32 = month.parse().map_err(|_| InvalidPeriod(s.to_string()))?;
        if !(1..=12).contains(&month) {
            return Err(InvalidPeriod(s.to_string()));
        }
        Ok(Self { year, month })
    }
}

impl TryFrom<String> for UsagePeriod {
    type Error = InvalidPeriod;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsagePeriod> for String {
    fn from(period: UsagePeriod) -> Self {
        period.to_string()
    }
}

/// A usage period string that is not `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid usage period: {0}")]
pub struct InvalidPeriod(pub String);
