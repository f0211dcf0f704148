//! Admin endpoint tests.

mod common;

use axum::http::{HeaderValue, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::Value;

use common::{admin_key_header, stripe_subscription, TestHarness, ADMIN_KEY};
use dinner_core::{PlanType, SubscriptionPatch, SubscriptionStatus, UserId};
use dinner_store::Store;

const PERIOD_END: i64 = 4_102_444_800; // 2100-01-01

fn admin_key() -> HeaderValue {
    HeaderValue::from_static(ADMIN_KEY)
}

async fn lapsed_stripe_user(harness: &TestHarness) -> UserId {
    let user_id = harness.create_user(PlanType::Premium).await;
    let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::Active)
        .with_customer("cus_sweep")
        .with_subscription_ref("sub_sweep")
        .with_period_end(Utc.timestamp_opt(PERIOD_END, 0).single());
    harness
        .store
        .upsert_subscription(&user_id, &patch)
        .await
        .unwrap();
    harness.billing.insert(stripe_subscription(
        "sub_sweep",
        "cus_sweep",
        "canceled",
        PERIOD_END,
    ));
    user_id
}

#[tokio::test]
async fn admin_routes_require_key() {
    let harness = TestHarness::new().await;

    harness
        .server
        .get("/admin/subscription-mismatches")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    harness
        .server
        .post("/admin/reconcile-all")
        .add_header(admin_key_header(), HeaderValue::from_static("wrong-key"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lists_tier_mismatches() {
    let harness = TestHarness::new().await;
    let user_id = harness.create_user(PlanType::Free).await;
    harness
        .store
        .upsert_subscription(
            &user_id,
            &SubscriptionPatch::plan(PlanType::Family, SubscriptionStatus::Active),
        )
        .await
        .unwrap();

    let response = harness
        .server
        .get("/admin/subscription-mismatches")
        .add_header(admin_key_header(), admin_key())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["mismatches"][0]["user_id"], user_id.to_string());
    assert_eq!(body["mismatches"][0]["tier"], "free");
    assert_eq!(body["mismatches"][0]["plan_type"], "family");
}

#[tokio::test]
async fn reconcile_all_defaults_to_dry_run() {
    let harness = TestHarness::new().await;
    let user_id = lapsed_stripe_user(&harness).await;
    let before = harness.store.get_subscription(&user_id).await.unwrap();

    let response = harness
        .server
        .post("/admin/reconcile-all")
        .add_header(admin_key_header(), admin_key())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["dryRun"], true);
    assert_eq!(body["checked"], 1);
    assert_eq!(body["changed"], 1);
    assert_eq!(harness.store.get_subscription(&user_id).await.unwrap(), before);
}

#[tokio::test]
async fn reconcile_all_applies_and_then_settles() {
    let harness = TestHarness::new().await;
    let user_id = lapsed_stripe_user(&harness).await;

    let response = harness
        .server
        .post("/admin/reconcile-all?apply=true")
        .add_header(admin_key_header(), admin_key())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["dryRun"], false);
    assert_eq!(body["changed"], 1);

    let subscription = harness
        .store
        .get_subscription(&user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.plan_type, PlanType::Free);
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);
    let profile = harness.store.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(profile.tier, PlanType::Free);

    let again: Value = harness
        .server
        .post("/admin/reconcile-all?apply=true")
        .add_header(admin_key_header(), admin_key())
        .await
        .json();
    assert_eq!(again["changed"], 0);
    assert_eq!(again["failed"], 0);
}

#[tokio::test]
async fn reconcile_all_reports_provider_failures() {
    let harness = TestHarness::new().await;
    lapsed_stripe_user(&harness).await;
    harness.billing.set_failing(true);

    let response = harness
        .server
        .post("/admin/reconcile-all?apply=true")
        .add_header(admin_key_header(), admin_key())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["failed"], 1);
    assert_eq!(body["changed"], 0);
}
