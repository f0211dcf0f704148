//! Stripe API types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dinner_core::{PlanResolver, PlanSignals, PlanType, SubscriptionPatch, SubscriptionStatus};
use serde::Deserialize;

/// A field Stripe returns either as an ID or, when expanded, as an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    /// Unexpanded ID.
    Id(String),
    /// Expanded object.
    Object(Box<T>),
}

impl<T> Expandable<T> {
    /// The expanded object, if present.
    #[must_use]
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Object(obj) => Some(obj),
        }
    }
}

/// Stripe product object.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    /// Product ID.
    pub id: String,
    /// Product name.
    #[serde(default)]
    pub name: Option<String>,
    /// Metadata attached to the product.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe price object.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
    /// Human-readable nickname.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Lookup key.
    #[serde(default)]
    pub lookup_key: Option<String>,
    /// Product ID or expanded product.
    #[serde(default)]
    pub product: Option<Expandable<Product>>,
}

/// Stripe subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Price of the item.
    #[serde(default)]
    pub price: Option<Price>,
    /// Item-level period start (newer API versions).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Item-level period end (newer API versions).
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    /// Subscription ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Provider status (active, trialing, `past_due`, canceled, ...).
    pub status: String,
    /// Whether the subscription ends when the current period does.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Period start (Unix).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Period end (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Trial end (Unix).
    #[serde(default)]
    pub trial_end: Option<i64>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Subscription items.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
}

impl StripeSubscription {
    fn first_item(&self) -> Option<&SubscriptionItem> {
        self.items.as_ref().and_then(|items| items.data.first())
    }

    /// Price of the first subscription item.
    #[must_use]
    pub fn price(&self) -> Option<&Price> {
        self.first_item().and_then(|item| item.price.as_ref())
    }

    /// Period start, falling back to the first item's.
    #[must_use]
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|i| i.current_period_start))
            .and_then(from_unix)
    }

    /// Period end, falling back to the first item's.
    #[must_use]
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|i| i.current_period_end))
            .and_then(from_unix)
    }

    /// Everything on the subscription that hints at a plan.
    #[must_use]
    pub fn plan_signals(&self) -> PlanSignals<'_> {
        let price = self.price();
        let product = price
            .and_then(|p| p.product.as_ref())
            .and_then(Expandable::as_object);

        PlanSignals {
            metadata_plan: self
                .metadata
                .get("planType")
                .or_else(|| product.and_then(|p| p.metadata.get("planType")))
                .map(String::as_str),
            product_name: product.and_then(|p| p.name.as_deref()),
            price_name: price.and_then(|p| p.nickname.as_deref().or(p.lookup_key.as_deref())),
            price_ref: price.map(|p| p.id.as_str()),
        }
    }

    /// Local status for this subscription.
    ///
    /// A subscription set to cancel at period end keeps access until then.
    #[must_use]
    pub fn local_status(&self) -> SubscriptionStatus {
        let status = SubscriptionStatus::from_provider(&self.status);
        if self.cancel_at_period_end && status.grants_access() && status != SubscriptionStatus::PastDue
        {
            SubscriptionStatus::ActiveUntilPeriodEnd
        } else {
            status
        }
    }

    /// Whether this subscription currently entitles the customer to a paid
    /// plan. `unpaid` keeps the provider status but not the plan.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        self.status != "unpaid" && self.local_status().grants_access()
    }

    /// The local record fields this subscription resolves to.
    ///
    /// Subscriptions that no longer grant access, and `unpaid` ones, resolve
    /// to the free plan.
    #[must_use]
    pub fn to_patch(&self, resolver: &PlanResolver) -> SubscriptionPatch {
        let status = self.local_status();
        let plan = if self.grants_access() {
            resolver.resolve(&self.plan_signals())
        } else {
            PlanType::Free
        };

        let mut patch = SubscriptionPatch::plan(plan, status)
            .with_subscription_ref(self.id.clone())
            .with_price(self.price().map(|p| p.id.clone()))
            .with_period(self.period_start(), self.period_end());
        if let Some(customer) = &self.customer {
            patch = patch.with_customer(customer.clone());
        }
        patch.trial_end = Some(self.trial_end.and_then(from_unix));
        patch
    }
}

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Payment status (paid, unpaid, `no_payment_required`).
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription ID created by the session.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Client reference ID (our `user_id`).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    /// Whether the session has been paid for.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// The purchasing user: `metadata.userId`, else `client_reference_id`.
    #[must_use]
    pub fn user_ref(&self) -> Option<&str> {
        self.metadata
            .get("userId")
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Billing period of an invoice line.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LinePeriod {
    /// Start (Unix).
    pub start: i64,
    /// End (Unix).
    pub end: i64,
}

/// Stripe invoice line item.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    /// Period covered by the line.
    #[serde(default)]
    pub period: Option<LinePeriod>,
    /// Subscription the line bills for.
    #[serde(default)]
    pub subscription: Option<String>,
}

/// Stripe invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription ID.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Line items.
    #[serde(default)]
    pub lines: Option<StripeList<InvoiceLine>>,
}

impl Invoice {
    fn lines(&self) -> &[InvoiceLine] {
        self.lines.as_ref().map_or(&[], |l| l.data.as_slice())
    }

    /// The subscription billed, from the invoice or its first subscription line.
    #[must_use]
    pub fn subscription_ref(&self) -> Option<&str> {
        self.subscription
            .as_deref()
            .or_else(|| self.lines().iter().find_map(|l| l.subscription.as_deref()))
    }

    /// End of the billed period, from the invoice lines.
    #[must_use]
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.lines()
            .iter()
            .filter_map(|l| l.period)
            .map(|p| p.end)
            .max()
            .and_then(from_unix)
    }
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
