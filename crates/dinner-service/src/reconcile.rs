//! Subscription reconciliation.
//!
//! [`ReconciliationEngine`] converges a user's subscription record with the
//! billing provider and keeps the profile tier mirror equal to the
//! subscription plan. [`ReconciliationEngine::commit`] is the only place
//! that writes the tier mirror.

use std::sync::Arc;

use chrono::Utc;
use dinner_core::{
    PlanResolver, PlanType, Profile, Subscription, SubscriptionPatch, SubscriptionStatus, UserId,
};
use dinner_store::{Store, StoreError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::stripe::{BillingProvider, StripeError};

/// Users reconciled concurrently by [`ReconciliationEngine::reconcile_all`].
const SWEEP_CONCURRENCY: usize = 8;

/// Errors from reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The billing provider could not be reached or failed. Nothing was
    /// written.
    #[error("billing provider unavailable: {0}")]
    Provider(#[from] StripeError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The records a reconciliation starts from and the subscription it
/// resolves to.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Stored subscription, if any.
    pub current: Option<Subscription>,
    /// Stored profile, if any.
    pub profile: Option<Profile>,
    /// The subscription the user should have.
    pub target: Subscription,
}

impl Resolution {
    fn new(
        user_id: &UserId,
        current: Option<Subscription>,
        profile: Option<Profile>,
        patch: &SubscriptionPatch,
    ) -> Self {
        let mut target = current
            .clone()
            .unwrap_or_else(|| Subscription::free(*user_id));
        target.merge(patch);
        Self {
            current,
            profile,
            target,
        }
    }

    /// Fields of the stored subscription that must change.
    #[must_use]
    pub fn subscription_patch(&self) -> SubscriptionPatch {
        match &self.current {
            Some(current) => current.diff(&self.target),
            None => Subscription::free(self.target.user_id).diff(&self.target),
        }
    }

    /// Whether the subscription record needs a write.
    #[must_use]
    pub fn subscription_changes(&self) -> bool {
        self.current.is_none() || !self.subscription_patch().is_empty()
    }

    /// The mirror tier to write, if it differs from the target plan.
    #[must_use]
    pub fn tier_change(&self) -> Option<PlanType> {
        self.profile
            .as_ref()
            .filter(|p| p.tier != self.target.plan_type)
            .map(|_| self.target.plan_type)
    }
}

/// Per-user result of a sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    /// The user.
    pub user_id: UserId,
    /// Plan before the sweep.
    pub plan_before: PlanType,
    /// Plan after the sweep (or that would be written in a dry run).
    pub plan_after: PlanType,
    /// Mirror tier before the sweep.
    pub tier_before: Option<PlanType>,
    /// Whether any write was (or would be) made.
    pub changed: bool,
    /// Failure, if the user could not be reconciled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`ReconciliationEngine::reconcile_all`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Whether writes were skipped.
    pub dry_run: bool,
    /// Number of subscriptions examined.
    pub checked: usize,
    /// Number of users whose records changed (or would change).
    pub changed: usize,
    /// Number of users that failed.
    pub failed: usize,
    /// Users that changed or failed.
    pub outcomes: Vec<SweepOutcome>,
}

/// Reconciles subscriptions against the billing provider.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn BillingProvider>>,
    resolver: PlanResolver,
}

impl ReconciliationEngine {
    /// Create an engine.
    ///
    /// Without a provider, records with provider references are treated as
    /// locally authoritative.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn BillingProvider>>,
        resolver: PlanResolver,
    ) -> Self {
        Self {
            store,
            provider,
            resolver,
        }
    }

    /// The store the engine writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The billing provider, if configured.
    #[must_use]
    pub fn provider(&self) -> Option<&Arc<dyn BillingProvider>> {
        self.provider.as_ref()
    }

    /// The plan resolver.
    #[must_use]
    pub fn resolver(&self) -> &PlanResolver {
        &self.resolver
    }

    async fn load(
        &self,
        user_id: &UserId,
    ) -> Result<(Option<Subscription>, Option<Profile>), StoreError> {
        tokio::try_join!(
            self.store.get_subscription(user_id),
            self.store.get_profile(user_id)
        )
    }

    /// Work out what the user's subscription should be, without writing.
    ///
    /// # Errors
    ///
    /// Returns `Provider` when the billing provider fails, `Store` on
    /// storage failure.
    pub async fn resolve(&self, user_id: &UserId) -> Result<Resolution, ReconcileError> {
        let (subscription, profile) = self.load(user_id).await?;

        let Some(current) = subscription else {
            let patch = match &profile {
                Some(profile) if profile.tier.is_paid() => {
                    SubscriptionPatch::plan(profile.tier, SubscriptionStatus::Active)
                }
                _ => SubscriptionPatch::default(),
            };
            return Ok(Resolution::new(user_id, None, profile, &patch));
        };

        let patch = match (current.provider_subscription_ref(), &self.provider) {
            (Some(subscription_ref), Some(provider)) => {
                match provider.fetch_subscription(subscription_ref).await {
                    Ok(Some(upstream)) => upstream.to_patch(&self.resolver),
                    Ok(None) => {
                        info!(
                            user_id = %user_id,
                            subscription_ref = %subscription_ref,
                            "Subscription no longer exists upstream"
                        );
                        SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Canceled)
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Billing provider lookup failed");
                        return Err(e.into());
                    }
                }
            }
            (Some(subscription_ref), None) => {
                debug!(
                    user_id = %user_id,
                    subscription_ref = %subscription_ref,
                    "No billing provider configured, keeping local state"
                );
                Self::local_patch(&current)
            }
            (None, _) => Self::local_patch(&current),
        };

        Ok(Resolution::new(user_id, Some(current), profile, &patch))
    }

    /// Local records are authoritative except for a lapsed period-end
    /// cancellation.
    fn local_patch(current: &Subscription) -> SubscriptionPatch {
        if current.is_expired_at(Utc::now()) {
            SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Canceled)
        } else {
            SubscriptionPatch::default()
        }
    }

    /// Reconcile one user and return the resolved subscription.
    ///
    /// A user with neither a subscription nor a profile gets a synthesized
    /// free/inactive record and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `Provider` when the billing provider fails (state untouched),
    /// `Store` on storage failure.
    pub async fn reconcile(&self, user_id: &UserId) -> Result<Subscription, ReconcileError> {
        let resolution = self.resolve(user_id).await?;
        if resolution.current.is_none() && resolution.profile.is_none() {
            return Ok(resolution.target);
        }
        self.commit(&resolution).await
    }

    /// Merge `patch` over the user's subscription and commit it.
    ///
    /// This is the write path for webhooks, cancellations and downgrades.
    ///
    /// # Errors
    ///
    /// Returns `Store` on storage failure.
    pub async fn apply(
        &self,
        user_id: &UserId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription, ReconcileError> {
        let (current, profile) = self.load(user_id).await?;
        let resolution = Resolution::new(user_id, current, profile, patch);
        self.commit(&resolution).await
    }

    /// Write a resolution: the subscription only when a field differs, the
    /// tier mirror only when it disagrees with the plan.
    ///
    /// # Errors
    ///
    /// Returns `Store` on storage failure.
    pub async fn commit(&self, resolution: &Resolution) -> Result<Subscription, ReconcileError> {
        let user_id = resolution.target.user_id;

        let subscription = if resolution.subscription_changes() {
            let patch = resolution.subscription_patch();
            let written = self.store.upsert_subscription(&user_id, &patch).await?;
            info!(
                user_id = %user_id,
                plan = %written.plan_type,
                status = %written.status,
                "Subscription updated"
            );
            written
        } else {
            resolution
                .current
                .clone()
                .unwrap_or_else(|| resolution.target.clone())
        };

        if let Some(profile) = &resolution.profile {
            if profile.tier != subscription.plan_type {
                match self.store.set_tier(&user_id, subscription.plan_type).await {
                    Ok(()) => info!(
                        user_id = %user_id,
                        from = %profile.tier,
                        to = %subscription.plan_type,
                        "Profile tier synchronized"
                    ),
                    Err(StoreError::NotFound) => {
                        debug!(user_id = %user_id, "Profile disappeared before tier update");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(subscription)
    }

    /// Reconcile every stored subscription.
    ///
    /// With `dry_run` nothing is written; the report shows what would change.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the subscriptions cannot be listed. Per-user
    /// failures are reported in the outcome list instead.
    pub async fn reconcile_all(&self, dry_run: bool) -> Result<SweepReport, ReconcileError> {
        let subscriptions = self.store.list_subscriptions().await?;
        let checked = subscriptions.len();

        let outcomes: Vec<SweepOutcome> = stream::iter(subscriptions)
            .map(|subscription| self.sweep_one(subscription, dry_run))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .filter(|outcome| futures::future::ready(outcome.changed || outcome.error.is_some()))
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        let report = SweepReport {
            dry_run,
            checked,
            changed: outcomes.len() - failed,
            failed,
            outcomes,
        };

        info!(
            dry_run,
            checked = report.checked,
            changed = report.changed,
            failed = report.failed,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn sweep_one(&self, subscription: Subscription, dry_run: bool) -> SweepOutcome {
        let user_id = subscription.user_id;
        let mut outcome = SweepOutcome {
            user_id,
            plan_before: subscription.plan_type,
            plan_after: subscription.plan_type,
            tier_before: None,
            changed: false,
            error: None,
        };

        let resolution = match self.resolve(&user_id).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Sweep could not resolve user");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        outcome.tier_before = resolution.profile.as_ref().map(|p| p.tier);
        outcome.plan_after = resolution.target.plan_type;
        outcome.changed = resolution.subscription_changes() || resolution.tier_change().is_some();

        if outcome.changed && !dry_run {
            if let Err(e) = self.commit(&resolution).await {
                warn!(user_id = %user_id, error = %e, "Sweep could not commit user");
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}
