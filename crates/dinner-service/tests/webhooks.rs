//! Stripe webhook integration tests.

mod common;

use std::future::IntoFuture;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use common::{
    bearer, sign_now, signature_header, stripe_subscription, webhook_event, TestHarness,
};
use dinner_core::{PlanType, Subscription, SubscriptionPatch, SubscriptionStatus, UserId};
use dinner_store::Store;

const PERIOD_END: i64 = 4_102_444_800; // 2100-01-01

async fn premium_user(harness: &TestHarness) -> UserId {
    let user_id = harness.create_user(PlanType::Premium).await;
    let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::Active)
        .with_customer("cus_paid")
        .with_subscription_ref("sub_paid")
        .with_period_end(Utc.timestamp_opt(PERIOD_END, 0).single());
    harness
        .store
        .upsert_subscription(&user_id, &patch)
        .await
        .unwrap();
    user_id
}

fn checkout_session(user_id: &UserId) -> serde_json::Value {
    common::checkout_session("cs_test_1", user_id, "cus_new", "sub_new")
}

/// `stripe_subscription` on the family price.
fn family_subscription(id: &str, customer: &str, status: &str, period_end: i64) -> Value {
    let mut subscription = stripe_subscription(id, customer, status, period_end);
    subscription["items"]["data"][0]["price"] = json!({
        "id": "price_family_monthly",
        "nickname": "Family Monthly",
        "product": {"id": "prod_family", "name": "Dinner Surprise Family"}
    });
    subscription
}

async fn deliver(harness: &TestHarness, payload: String) {
    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();
}

async fn stored(harness: &TestHarness, user_id: &UserId) -> Subscription {
    harness
        .store
        .get_subscription(user_id)
        .await
        .unwrap()
        .expect("subscription stored")
}

async fn tier(harness: &TestHarness, user_id: &UserId) -> PlanType {
    harness
        .store
        .get_profile(user_id)
        .await
        .unwrap()
        .unwrap()
        .tier
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test]
async fn rejects_missing_signature() {
    let harness = TestHarness::new().await;
    let payload = webhook_event("evt_1", "checkout.session.completed", json!({}));

    let response = harness.server.post("/webhooks/billing").text(payload).await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejects_bad_signature_without_writing() {
    let harness = TestHarness::new().await;
    let writes_before = harness.store.write_count();
    let payload = webhook_event(
        "evt_1",
        "checkout.session.completed",
        checkout_session(&harness.test_user_id),
    );
    let forged = sign_now("some other body");

    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), forged)
        .text(payload)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(harness.store.write_count(), writes_before);
    assert!(harness
        .store
        .get_subscription(&harness.test_user_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn acknowledges_unhandled_event_types() {
    let harness = TestHarness::new().await;
    let payload = webhook_event("evt_1", "customer.created", json!({"id": "cus_1"}));

    let response = harness
        .server
        .post("/webhooks/stripe")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn paid_checkout_upgrades_user() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    harness
        .billing
        .insert(stripe_subscription("sub_new", "cus_new", "active", PERIOD_END));

    let payload = webhook_event(
        "evt_checkout",
        "checkout.session.completed",
        checkout_session(&user_id),
    );
    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await;

    response.assert_status_ok();

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .expect("subscription written");
    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.billing_customer_ref.as_deref(), Some("cus_new"));
    assert_eq!(subscription.billing_subscription_ref.as_deref(), Some("sub_new"));
    assert_eq!(
        subscription.current_period_end.map(|t| t.timestamp()),
        Some(PERIOD_END)
    );

    let profile = harness.store.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(profile.tier, PlanType::Premium);
}

#[tokio::test]
async fn replayed_checkout_writes_nothing() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    harness
        .billing
        .insert(stripe_subscription("sub_new", "cus_new", "active", PERIOD_END));
    let payload = webhook_event(
        "evt_checkout",
        "checkout.session.completed",
        checkout_session(&user_id),
    );

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload.clone())
        .await
        .assert_status_ok();
    let first = harness.store.get_subscription(&user_id).await.unwrap();
    let writes_after_first = harness.store.write_count();

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    assert_eq!(harness.store.write_count(), writes_after_first);
    assert_eq!(harness.store.get_subscription(&user_id).await.unwrap(), first);
}

#[tokio::test]
async fn unpaid_checkout_is_skipped() {
    let harness = TestHarness::new().await;
    let mut session = checkout_session(&harness.test_user_id);
    session["payment_status"] = json!("unpaid");
    let payload = webhook_event("evt_1", "checkout.session.completed", session);

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    assert!(harness
        .store
        .get_subscription(&harness.test_user_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn checkout_without_user_is_rejected() {
    let harness = TestHarness::new().await;
    let session = json!({
        "id": "cs_test_2",
        "payment_status": "paid",
        "customer": "cus_x",
        "subscription": "sub_x",
        "metadata": {}
    });
    let payload = webhook_event("evt_1", "checkout.session.completed", session);

    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Subscription lifecycle
// ============================================================================

#[tokio::test]
async fn deleted_subscription_downgrades_and_keeps_refs() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let payload = webhook_event(
        "evt_deleted",
        "customer.subscription.deleted",
        stripe_subscription("sub_paid", "cus_paid", "canceled", PERIOD_END),
    );

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.plan_type, PlanType::Free);
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);
    assert_eq!(subscription.billing_customer_ref.as_deref(), Some("cus_paid"));
    assert_eq!(subscription.billing_subscription_ref.as_deref(), Some("sub_paid"));

    let profile = harness.store.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(profile.tier, PlanType::Free);
}

#[tokio::test]
async fn paused_subscription_is_recorded_as_paused() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let payload = webhook_event(
        "evt_paused",
        "customer.subscription.paused",
        stripe_subscription("sub_paid", "cus_paid", "paused", PERIOD_END),
    );

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.plan_type, PlanType::Free);
    assert_eq!(subscription.status, SubscriptionStatus::Paused);
}

#[tokio::test]
async fn unknown_customer_is_acknowledged_without_writes() {
    let harness = TestHarness::new().await;
    let writes_before = harness.store.write_count();
    let payload = webhook_event(
        "evt_updated",
        "customer.subscription.updated",
        stripe_subscription("sub_ghost", "cus_ghost", "active", PERIOD_END),
    );

    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await;

    response.assert_status_ok();
    assert_eq!(harness.store.write_count(), writes_before);
}

#[tokio::test]
async fn payment_failure_marks_past_due_and_keeps_plan() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let invoice = json!({
        "id": "in_1",
        "customer": "cus_paid",
        "subscription": "sub_paid",
        "lines": {"data": [], "has_more": false}
    });
    let payload = webhook_event("evt_failed", "invoice.payment_failed", invoice);

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::PastDue);
    assert_eq!(subscription.plan_type, PlanType::Premium);
}

#[tokio::test]
async fn payment_success_extends_period_from_invoice_lines() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let next_end = PERIOD_END + 30 * 24 * 3600;
    let invoice = json!({
        "id": "in_2",
        "customer": "cus_paid",
        "subscription": "sub_paid",
        "lines": {
            "data": [{
                "subscription": "sub_paid",
                "period": {"start": PERIOD_END, "end": next_end}
            }],
            "has_more": false
        }
    });
    let payload = webhook_event("evt_paid", "invoice.payment_succeeded", invoice);

    harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(
        subscription.current_period_end.map(|t| t.timestamp()),
        Some(next_end)
    );
}

#[tokio::test]
async fn provider_outage_during_checkout_returns_server_error() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    harness.billing.set_failing(true);
    let payload = webhook_event(
        "evt_checkout",
        "checkout.session.completed",
        checkout_session(&user_id),
    );

    let response = harness
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Subscription changes
// ============================================================================

#[tokio::test]
async fn subscription_update_derives_family_plan() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let payload = webhook_event(
        "evt_family",
        "customer.subscription.updated",
        family_subscription("sub_paid", "cus_paid", "active", PERIOD_END),
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.plan_type, PlanType::Family);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.price_ref.as_deref(), Some("price_family_monthly"));
    assert_eq!(tier(&harness, &user_id).await, PlanType::Family);
}

#[tokio::test]
async fn cancel_at_period_end_keeps_access_until_period_end() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let mut upstream = stripe_subscription("sub_paid", "cus_paid", "active", PERIOD_END);
    upstream["cancel_at_period_end"] = json!(true);
    let payload = webhook_event("evt_cancel", "customer.subscription.updated", upstream);

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.status, SubscriptionStatus::ActiveUntilPeriodEnd);
    assert_eq!(
        subscription.current_period_end.map(|t| t.timestamp()),
        Some(PERIOD_END)
    );
    assert_eq!(tier(&harness, &user_id).await, PlanType::Premium);
}

#[tokio::test]
async fn resumed_subscription_restores_paid_plan() {
    let harness = TestHarness::new().await;
    let user_id = harness.create_user(PlanType::Free).await;
    let patch = SubscriptionPatch::plan(PlanType::Free, SubscriptionStatus::Paused)
        .with_customer("cus_paid")
        .with_subscription_ref("sub_paid");
    harness
        .store
        .upsert_subscription(&user_id, &patch)
        .await
        .unwrap();
    let payload = webhook_event(
        "evt_resumed",
        "customer.subscription.resumed",
        stripe_subscription("sub_paid", "cus_paid", "active", PERIOD_END),
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(tier(&harness, &user_id).await, PlanType::Premium);
}

#[tokio::test]
async fn trial_ending_records_trial_end() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let trial_end = PERIOD_END - 3 * 24 * 3600;
    let mut upstream = stripe_subscription("sub_paid", "cus_paid", "trialing", PERIOD_END);
    upstream["trial_end"] = json!(trial_end);
    let payload = webhook_event(
        "evt_trial",
        "customer.subscription.trial_will_end",
        upstream,
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.trial_end.map(|t| t.timestamp()), Some(trial_end));
    assert_eq!(subscription.plan_type, PlanType::Premium);
}

// ============================================================================
// Superseded subscriptions
// ============================================================================

#[tokio::test]
async fn update_for_superseded_subscription_keeps_live_one() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    harness
        .billing
        .insert(stripe_subscription("sub_paid", "cus_paid", "active", PERIOD_END));
    let payload = webhook_event(
        "evt_old_updated",
        "customer.subscription.updated",
        stripe_subscription("sub_old", "cus_paid", "canceled", PERIOD_END),
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.billing_subscription_ref.as_deref(), Some("sub_paid"));
    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.status, SubscriptionStatus::Active);

    let response = harness
        .server
        .post("/user/sync-subscription")
        .add_header(AUTHORIZATION, bearer(&user_id))
        .json(&json!({"userId": user_id.to_string()}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["subscription"]["plan_type"], "premium");
    assert_eq!(body["subscription"]["billing_subscription_ref"], "sub_paid");
    assert_eq!(tier(&harness, &user_id).await, PlanType::Premium);
}

#[tokio::test]
async fn deleting_superseded_subscription_keeps_live_one() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    harness
        .billing
        .insert(stripe_subscription("sub_paid", "cus_paid", "active", PERIOD_END));
    let payload = webhook_event(
        "evt_old_deleted",
        "customer.subscription.deleted",
        stripe_subscription("sub_old", "cus_paid", "canceled", PERIOD_END),
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(subscription.billing_subscription_ref.as_deref(), Some("sub_paid"));
    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(tier(&harness, &user_id).await, PlanType::Premium);
}

#[tokio::test]
async fn live_replacement_subscription_is_adopted() {
    let harness = TestHarness::new().await;
    let user_id = premium_user(&harness).await;
    let payload = webhook_event(
        "evt_replacement",
        "customer.subscription.created",
        family_subscription("sub_replacement", "cus_paid", "active", PERIOD_END),
    );

    deliver(&harness, payload).await;

    let subscription = stored(&harness, &user_id).await;
    assert_eq!(
        subscription.billing_subscription_ref.as_deref(),
        Some("sub_replacement")
    );
    assert_eq!(subscription.plan_type, PlanType::Family);
    assert_eq!(tier(&harness, &user_id).await, PlanType::Family);
}

// ============================================================================
// Convergence
// ============================================================================

/// The provider-derived fields of a stored subscription.
type Snapshot = (
    PlanType,
    SubscriptionStatus,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    PlanType,
);

async fn snapshot(harness: &TestHarness, user_id: &UserId) -> Snapshot {
    let subscription = stored(harness, user_id).await;
    (
        subscription.plan_type,
        subscription.status,
        subscription.billing_customer_ref,
        subscription.billing_subscription_ref,
        subscription.price_ref,
        subscription.current_period_end.map(|t| t.timestamp()),
        tier(harness, user_id).await,
    )
}

/// A premium user whose subscription moved to the family price upstream,
/// plus the matching webhook payload.
async fn upgraded_upstream(harness: &TestHarness) -> (UserId, String) {
    let user_id = premium_user(harness).await;
    let upstream = family_subscription("sub_paid", "cus_paid", "active", PERIOD_END);
    harness.billing.insert(upstream.clone());
    let payload = webhook_event("evt_upgrade", "customer.subscription.updated", upstream);
    (user_id, payload)
}

async fn sync(harness: &TestHarness, user_id: &UserId) {
    harness
        .server
        .post("/user/sync-subscription")
        .add_header(AUTHORIZATION, bearer(user_id))
        .json(&json!({"userId": user_id.to_string()}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn webhook_and_sync_converge_in_either_order() {
    let webhook_first = TestHarness::new().await;
    let (user_a, payload) = upgraded_upstream(&webhook_first).await;
    deliver(&webhook_first, payload).await;
    sync(&webhook_first, &user_a).await;

    let sync_first = TestHarness::new().await;
    let (user_b, payload) = upgraded_upstream(&sync_first).await;
    sync(&sync_first, &user_b).await;
    deliver(&sync_first, payload).await;

    let concurrent = TestHarness::new().await;
    let (user_c, payload) = upgraded_upstream(&concurrent).await;
    let webhook = concurrent
        .server
        .post("/webhooks/billing")
        .add_header(signature_header(), sign_now(&payload))
        .text(payload)
        .into_future();
    let synced = concurrent
        .server
        .post("/user/sync-subscription")
        .add_header(AUTHORIZATION, bearer(&user_c))
        .json(&json!({"userId": user_c.to_string()}))
        .into_future();
    let (webhook, synced) = tokio::join!(webhook, synced);
    webhook.assert_status_ok();
    synced.assert_status_ok();

    let expected = snapshot(&webhook_first, &user_a).await;
    assert_eq!(expected.0, PlanType::Family);
    assert_eq!(expected.1, SubscriptionStatus::Active);
    assert_eq!(expected.6, PlanType::Family);
    assert_eq!(snapshot(&sync_first, &user_b).await, expected);
    assert_eq!(snapshot(&concurrent, &user_c).await, expected);
}
