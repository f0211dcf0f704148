//! The canonical subscription record and partial updates to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{PlanType, SubscriptionStatus};
use crate::UserId;

/// Prefix of synthetic subscription references for manually granted plans.
///
/// Manual references never reach the billing provider.
pub const MANUAL_SUBSCRIPTION_PREFIX: &str = "manual_subscription_";

/// A user's billing relationship. Exactly one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Owner of the record.
    pub user_id: UserId,

    /// Plan the user is entitled to.
    pub plan_type: PlanType,

    /// Local subscription status.
    pub status: SubscriptionStatus,

    /// Billing provider customer ID.
    pub billing_customer_ref: Option<String>,

    /// Billing provider subscription ID, or a manual token.
    pub billing_subscription_ref: Option<String>,

    /// Billing provider price ID.
    pub price_ref: Option<String>,

    /// Start of the current billing period.
    pub current_period_start: Option<DateTime<Utc>>,

    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,

    /// End of the trial, when one is running.
    pub trial_end: Option<DateTime<Utc>>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A fresh free/inactive record with no billing references.
    #[must_use]
    pub fn free(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            plan_type: PlanType::Free,
            status: SubscriptionStatus::Inactive,
            billing_customer_ref: None,
            billing_subscription_ref: None,
            price_ref: None,
            current_period_start: None,
            current_period_end: None,
            trial_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the subscription reference is a manual token (or absent).
    ///
    /// Only non-manual references are ever queried upstream.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.provider_subscription_ref().is_none()
    }

    /// The billing-provider subscription ID, if this record has a real one.
    #[must_use]
    pub fn provider_subscription_ref(&self) -> Option<&str> {
        self.billing_subscription_ref
            .as_deref()
            .filter(|r| !r.is_empty() && !r.starts_with(MANUAL_SUBSCRIPTION_PREFIX))
    }

    /// Whether a cancel-at-period-end subscription has run past its period.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::ActiveUntilPeriodEnd
            && self.current_period_end.is_some_and(|end| end <= now)
    }

    /// The plan that quota checks should use at `now`.
    ///
    /// An expired period-end cancellation, or a status that grants nothing,
    /// yields the free plan even while `plan_type` still reads paid.
    #[must_use]
    pub fn effective_plan_at(&self, now: DateTime<Utc>) -> PlanType {
        if self.is_expired_at(now) || !self.status.grants_access() {
            PlanType::Free
        } else {
            self.plan_type
        }
    }

    /// Merge a patch into this record. Returns `true` when any field changed.
    ///
    /// `updated_at` is left to the caller so that a no-op merge stays a no-op.
    pub fn merge(&mut self, patch: &SubscriptionPatch) -> bool {
        let before = self.clone();

        if let Some(plan) = patch.plan_type {
            self.plan_type = plan;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(v) = &patch.billing_customer_ref {
            self.billing_customer_ref.clone_from(v);
        }
        if let Some(v) = &patch.billing_subscription_ref {
            self.billing_subscription_ref.clone_from(v);
        }
        if let Some(v) = &patch.price_ref {
            self.price_ref.clone_from(v);
        }
        if let Some(v) = patch.current_period_start {
            self.current_period_start = v;
        }
        if let Some(v) = patch.current_period_end {
            self.current_period_end = v;
        }
        if let Some(v) = patch.trial_end {
            self.trial_end = v;
        }

        *self != before
    }

    /// Build the patch that turns `self` into `target` (changed fields only).
    #[must_use]
    pub fn diff(&self, target: &Self) -> SubscriptionPatch {
        fn changed<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            (a != b).then(|| b.clone())
        }

        SubscriptionPatch {
            plan_type: changed(&self.plan_type, &target.plan_type),
            status: changed(&self.status, &target.status),
            billing_customer_ref: changed(&self.billing_customer_ref, &target.billing_customer_ref),
            billing_subscription_ref: changed(
                &self.billing_subscription_ref,
                &target.billing_subscription_ref,
            ),
            price_ref: changed(&self.price_ref, &target.price_ref),
            current_period_start: changed(&self.current_period_start, &target.current_period_start),
            current_period_end: changed(&self.current_period_end, &target.current_period_end),
            trial_end: changed(&self.trial_end, &target.trial_end),
        }
    }
}

/// A partial update to a [`Subscription`].
///
/// `None` leaves a field untouched. Nullable fields are `Option<Option<_>>`
/// so a patch can explicitly clear them with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    /// New plan.
    pub plan_type: Option<PlanType>,
    /// New status.
    pub status: Option<SubscriptionStatus>,
    /// New customer reference.
    pub billing_customer_ref: Option<Option<String>>,
    /// New subscription reference.
    pub billing_subscription_ref: Option<Option<String>>,
    /// New price reference.
    pub price_ref: Option<Option<String>>,
    /// New period start.
    pub current_period_start: Option<Option<DateTime<Utc>>>,
    /// New period end.
    pub current_period_end: Option<Option<DateTime<Utc>>>,
    /// New trial end.
    pub trial_end: Option<Option<DateTime<Utc>>>,
}

impl SubscriptionPatch {
    /// A patch setting plan and status.
    #[must_use]
    pub fn plan(plan_type: PlanType, status: SubscriptionStatus) -> Self {
        Self {
            plan_type: Some(plan_type),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the patch touches no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set the customer reference.
    #[must_use]
    pub fn with_customer(mut self, customer_ref: impl Into<String>) -> Self {
        self.billing_customer_ref = Some(Some(customer_ref.into()));
        self
    }

    /// Set the subscription reference.
    #[must_use]
    pub fn with_subscription_ref(mut self, subscription_ref: impl Into<String>) -> Self {
        self.billing_subscription_ref = Some(Some(subscription_ref.into()));
        self
    }

    /// Set the price reference.
    #[must_use]
    pub fn with_price(mut self, price_ref: Option<String>) -> Self {
        self.price_ref = Some(price_ref);
        self
    }

    /// Set the current period end.
    #[must_use]
    pub fn with_period_end(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.current_period_end = Some(end);
        self
    }

    /// Set both period bounds.
    #[must_use]
    pub fn with_period(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.current_period_start = Some(start);
        self.current_period_end = Some(end);
        self
    }
}

/// A user whose profile tier disagrees with their subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMismatch {
    /// The affected user.
    pub user_id: UserId,
    /// The profile's mirrored tier.
    pub tier: PlanType,
    /// The subscription's plan.
    pub plan_type: PlanType,
}
