//! Billing webhook events.
//!
//! A verified [`WebhookEvent`] is parsed into a [`BillingEvent`] and then
//! applied through the reconciliation engine. Every handler is idempotent:
//! redelivering an event produces no further writes.

use dinner_core::{PlanType, Subscription, SubscriptionPatch, SubscriptionStatus, UserId};
use dinner_store::StoreError;
use tracing::{debug, info, warn};

use crate::reconcile::{ReconcileError, ReconciliationEngine};
use crate::stripe::{CheckoutSession, Invoice, StripeSubscription, WebhookEvent};

/// A billing event the service acts on.
#[derive(Debug, Clone)]
pub enum BillingEvent {
    /// `checkout.session.completed`.
    CheckoutCompleted(CheckoutSession),
    /// `customer.subscription.created`, `.updated` or `.resumed`.
    SubscriptionChanged(StripeSubscription),
    /// `customer.subscription.deleted` or `.paused`.
    SubscriptionEnded {
        /// The subscription.
        subscription: StripeSubscription,
        /// Whether it was paused rather than deleted.
        paused: bool,
    },
    /// `invoice.payment_succeeded` or `invoice.paid`.
    PaymentSucceeded(Invoice),
    /// `invoice.payment_failed`.
    PaymentFailed(Invoice),
    /// `customer.subscription.trial_will_end`.
    TrialEnding(StripeSubscription),
    /// Any other event type.
    Ignored(String),
}

impl BillingEvent {
    /// Parse the event's data object according to its type.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't have the shape its type implies.
    pub fn from_webhook(event: &WebhookEvent) -> Result<Self, serde_json::Error> {
        fn object<T: serde::de::DeserializeOwned>(
            event: &WebhookEvent,
        ) -> Result<T, serde_json::Error> {
            serde_json::from_value(event.data.object.clone())
        }

        Ok(match event.event_type.as_str() {
            "checkout.session.completed" => Self::CheckoutCompleted(object(event)?),
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.resumed" => Self::SubscriptionChanged(object(event)?),
            "customer.subscription.deleted" => Self::SubscriptionEnded {
                subscription: object(event)?,
                paused: false,
            },
            "customer.subscription.paused" => Self::SubscriptionEnded {
                subscription: object(event)?,
                paused: true,
            },
            "invoice.payment_succeeded" | "invoice.paid" => Self::PaymentSucceeded(object(event)?),
            "invoice.payment_failed" => Self::PaymentFailed(object(event)?),
            "customer.subscription.trial_will_end" => Self::TrialEnding(object(event)?),
            other => Self::Ignored(other.to_string()),
        })
    }
}

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was applied to this user.
    Applied(UserId),
    /// The event concerns a subscription this user no longer tracks; the
    /// tracked one was reconciled instead.
    Superseded(UserId),
    /// No local user owns the referenced customer or subscription.
    UnknownOwner,
    /// The event carries nothing to act on (e.g. an unpaid checkout).
    Skipped,
    /// The event type isn't handled.
    Ignored,
}

/// Errors from applying an event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event is missing data it must carry.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Applying the event failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        Self::Reconcile(err.into())
    }
}

/// Apply an event.
///
/// # Errors
///
/// Returns `Malformed` for events missing required data and `Reconcile` when
/// the write path fails.
pub async fn dispatch(
    engine: &ReconciliationEngine,
    event: BillingEvent,
) -> Result<EventOutcome, EventError> {
    match event {
        BillingEvent::CheckoutCompleted(session) => apply_checkout(engine, &session).await,
        BillingEvent::SubscriptionChanged(subscription) => {
            apply_subscription_changed(engine, &subscription).await
        }
        BillingEvent::SubscriptionEnded {
            subscription,
            paused,
        } => apply_subscription_ended(engine, &subscription, paused).await,
        BillingEvent::PaymentSucceeded(invoice) => apply_payment_succeeded(engine, &invoice).await,
        BillingEvent::PaymentFailed(invoice) => apply_payment_failed(engine, &invoice).await,
        BillingEvent::TrialEnding(subscription) => apply_trial_ending(engine, &subscription).await,
        BillingEvent::Ignored(event_type) => {
            debug!(event_type = %event_type, "Unhandled billing event");
            Ok(EventOutcome::Ignored)
        }
    }
}

/// A billing reference to resolve a local owner from.
#[derive(Debug, Clone, Copy)]
enum OwnerRef<'a> {
    Customer(&'a str),
    Subscription(&'a str),
}

/// The first local user owning any of `refs`, tried in order.
async fn find_owner(
    engine: &ReconciliationEngine,
    refs: &[Option<OwnerRef<'_>>],
) -> Result<Option<UserId>, StoreError> {
    let store = engine.store();
    for owner_ref in refs.iter().flatten() {
        let found = match owner_ref {
            OwnerRef::Customer(customer) => store.find_subscription_by_customer(customer).await?,
            OwnerRef::Subscription(subscription) => {
                store.find_subscription_by_billing_ref(subscription).await?
            }
        };
        if let Some(subscription) = found {
            return Ok(Some(subscription.user_id));
        }
    }
    Ok(None)
}

/// Owner of a provider subscription: by customer, then subscription ID,
/// then a `userId` in its metadata.
async fn subscription_owner(
    engine: &ReconciliationEngine,
    subscription: &StripeSubscription,
) -> Result<Option<UserId>, StoreError> {
    let owner = find_owner(
        engine,
        &[
            subscription.customer.as_deref().map(OwnerRef::Customer),
            Some(OwnerRef::Subscription(&subscription.id)),
        ],
    )
    .await?;

    Ok(owner.or_else(|| {
        subscription
            .metadata
            .get("userId")
            .and_then(|id| id.parse().ok())
    }))
}

async fn apply_checkout(
    engine: &ReconciliationEngine,
    session: &CheckoutSession,
) -> Result<EventOutcome, EventError> {
    if !session.is_paid() {
        info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid yet, skipping"
        );
        return Ok(EventOutcome::Skipped);
    }

    let user_id = checkout_user(session)?;
    complete_checkout(engine, &user_id, session).await?;
    Ok(EventOutcome::Applied(user_id))
}

/// The user a checkout session was opened for.
///
/// # Errors
///
/// Returns `Malformed` when the session carries no parseable user.
pub fn checkout_user(session: &CheckoutSession) -> Result<UserId, EventError> {
    let user_ref = session
        .user_ref()
        .ok_or_else(|| EventError::Malformed("checkout session has no userId".into()))?;
    user_ref
        .parse()
        .map_err(|_| EventError::Malformed(format!("invalid userId: {user_ref}")))
}

/// Record a paid checkout for `user_id`, then reconcile it with the
/// provider. The plan is `metadata.planType` when it names a paid plan,
/// premium otherwise.
///
/// # Errors
///
/// Returns `Provider` when the follow-up lookup fails and `Store` on storage
/// failure.
pub async fn complete_checkout(
    engine: &ReconciliationEngine,
    user_id: &UserId,
    session: &CheckoutSession,
) -> Result<Subscription, ReconcileError> {
    let plan = session
        .metadata
        .get("planType")
        .and_then(|p| p.parse::<PlanType>().ok())
        .filter(PlanType::is_paid)
        .unwrap_or(PlanType::Premium);

    let mut patch = SubscriptionPatch::plan(plan, SubscriptionStatus::Active);
    if let Some(customer) = &session.customer {
        patch = patch.with_customer(customer.clone());
    }
    if let Some(subscription) = &session.subscription {
        patch = patch.with_subscription_ref(subscription.clone());
    }

    info!(
        user_id = %user_id,
        session_id = %session.id,
        plan = %plan,
        "Processing checkout completion"
    );

    engine.apply(user_id, &patch).await?;
    engine.reconcile(user_id).await
}

/// The provider subscription `user_id` tracks, when it isn't `subscription`.
async fn tracked_elsewhere(
    engine: &ReconciliationEngine,
    user_id: &UserId,
    subscription: &StripeSubscription,
) -> Result<Option<String>, StoreError> {
    Ok(engine
        .store()
        .get_subscription(user_id)
        .await?
        .and_then(|stored| stored.provider_subscription_ref().map(str::to_owned))
        .filter(|tracked| *tracked != subscription.id))
}

/// Reconcile the subscription the user actually tracks instead of applying
/// an event about another one.
async fn reconcile_tracked(
    engine: &ReconciliationEngine,
    user_id: UserId,
    tracked: &str,
    subscription: &StripeSubscription,
) -> Result<EventOutcome, EventError> {
    info!(
        user_id = %user_id,
        event_subscription = %subscription.id,
        tracked_subscription = %tracked,
        "Event for a superseded subscription, reconciling the tracked one"
    );
    engine.reconcile(&user_id).await?;
    Ok(EventOutcome::Superseded(user_id))
}

async fn apply_subscription_changed(
    engine: &ReconciliationEngine,
    subscription: &StripeSubscription,
) -> Result<EventOutcome, EventError> {
    let Some(user_id) = subscription_owner(engine, subscription).await? else {
        warn!(subscription_id = %subscription.id, "No user for subscription update");
        return Ok(EventOutcome::UnknownOwner);
    };

    // A live subscription always wins; a lapsed one only replaces itself.
    if !subscription.grants_access() {
        if let Some(tracked) = tracked_elsewhere(engine, &user_id, subscription).await? {
            return reconcile_tracked(engine, user_id, &tracked, subscription).await;
        }
    }

    let patch = subscription.to_patch(engine.resolver());
    engine.apply(&user_id, &patch).await?;
    Ok(EventOutcome::Applied(user_id))
}

async fn apply_subscription_ended(
    engine: &ReconciliationEngine,
    subscription: &StripeSubscription,
    paused: bool,
) -> Result<EventOutcome, EventError> {
    let Some(user_id) = subscription_owner(engine, subscription).await? else {
        warn!(subscription_id = %subscription.id, "No user for ended subscription");
        return Ok(EventOutcome::UnknownOwner);
    };

    if let Some(tracked) = tracked_elsewhere(engine, &user_id, subscription).await? {
        return reconcile_tracked(engine, user_id, &tracked, subscription).await;
    }

    let status = if paused {
        SubscriptionStatus::Paused
    } else {
        SubscriptionStatus::Canceled
    };
    engine
        .apply(&user_id, &SubscriptionPatch::plan(PlanType::Free, status))
        .await?;
    Ok(EventOutcome::Applied(user_id))
}

async fn invoice_owner(
    engine: &ReconciliationEngine,
    invoice: &Invoice,
) -> Result<Option<UserId>, StoreError> {
    find_owner(
        engine,
        &[
            invoice.subscription_ref().map(OwnerRef::Subscription),
            invoice.customer.as_deref().map(OwnerRef::Customer),
        ],
    )
    .await
}

async fn apply_payment_succeeded(
    engine: &ReconciliationEngine,
    invoice: &Invoice,
) -> Result<EventOutcome, EventError> {
    let Some(subscription_ref) = invoice.subscription_ref() else {
        debug!(invoice_id = %invoice.id, "Invoice without subscription, skipping");
        return Ok(EventOutcome::Skipped);
    };
    let Some(user_id) = invoice_owner(engine, invoice).await? else {
        warn!(invoice_id = %invoice.id, "No user for paid invoice");
        return Ok(EventOutcome::UnknownOwner);
    };

    let period_end = match invoice.period_end() {
        Some(end) => Some(end),
        None => match engine.provider() {
            Some(provider) => provider
                .fetch_subscription(subscription_ref)
                .await
                .map_err(ReconcileError::from)?
                .and_then(|s| s.period_end()),
            None => None,
        },
    };

    let mut patch = SubscriptionPatch {
        status: Some(SubscriptionStatus::Active),
        ..SubscriptionPatch::default()
    };
    if period_end.is_some() {
        patch = patch.with_period_end(period_end);
    }

    engine.apply(&user_id, &patch).await?;
    Ok(EventOutcome::Applied(user_id))
}

async fn apply_payment_failed(
    engine: &ReconciliationEngine,
    invoice: &Invoice,
) -> Result<EventOutcome, EventError> {
    let Some(user_id) = invoice_owner(engine, invoice).await? else {
        warn!(invoice_id = %invoice.id, "No user for failed invoice");
        return Ok(EventOutcome::UnknownOwner);
    };

    let patch = SubscriptionPatch {
        status: Some(SubscriptionStatus::PastDue),
        ..SubscriptionPatch::default()
    };
    engine.apply(&user_id, &patch).await?;
    Ok(EventOutcome::Applied(user_id))
}

async fn apply_trial_ending(
    engine: &ReconciliationEngine,
    subscription: &StripeSubscription,
) -> Result<EventOutcome, EventError> {
    let Some(user_id) = subscription_owner(engine, subscription).await? else {
        warn!(subscription_id = %subscription.id, "No user for trial ending");
        return Ok(EventOutcome::UnknownOwner);
    };

    let patch = SubscriptionPatch {
        trial_end: Some(subscription.to_patch(engine.resolver()).trial_end.flatten()),
        ..SubscriptionPatch::default()
    };
    engine.apply(&user_id, &patch).await?;
    Ok(EventOutcome::Applied(user_id))
}
