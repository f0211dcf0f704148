//! Core types for Dinner Surprise subscription billing.
//!
//! This crate holds the domain model shared by the store, the service and
//! the client SDK. It does no I/O.
//!
//! - **Identifiers**: `UserId`, `RecipeId`
//! - **Plans**: `PlanType`, `SubscriptionStatus`, `PlanResolver`
//! - **Subscriptions**: `Subscription`, `SubscriptionPatch`
//! - **Profiles**: `Profile` (tier mirror + usage counters), `UsagePeriod`
//! - **Recipes**: `SavedRecipe`
//!
//! # Quotas
//!
//! | Plan | generations / month | saved recipes |
//! |---|---|---|
//! | free | 3 | 5 |
//! | premium | unlimited | 100 |
//! | family | unlimited | 100 |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod plan;
pub mod profile;
pub mod recipe;
pub mod subscription;

pub use error::{BillingError, Result};
pub use ids::{IdError, RecipeId, UserId};
pub use plan::{
    PlanResolver, PlanSignals, PlanType, PriceCatalog, SubscriptionStatus, UnknownValue,
    FREE_MONTHLY_GENERATIONS, FREE_SAVED_RECIPES, PAID_SAVED_RECIPES,
};
pub use profile::{InvalidPeriod, Profile, Quota, UsagePeriod, UsageSummary};
pub use recipe::SavedRecipe;
pub use subscription::{
    Subscription, SubscriptionPatch, TierMismatch, MANUAL_SUBSCRIPTION_PREFIX,
};
