//! Recipe generation and saved recipe tests.

mod common;

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use common::{bearer, TestHarness};
use dinner_core::{PlanType, SubscriptionPatch, SubscriptionStatus, UsagePeriod, UserId};
use dinner_service::ai::AiError;
use dinner_service::UsageLedger;
use dinner_store::{MemoryStore, Store};

fn generate_body(user_id: &UserId) -> Value {
    json!({
        "userId": user_id.to_string(),
        "ingredients": ["rice", {"name": "onion", "quantity": 2, "unit": "pieces"}],
        "servings": 2
    })
}

async fn generations_used(harness: &TestHarness, user_id: &UserId) -> u32 {
    harness
        .store
        .get_profile(user_id)
        .await
        .unwrap()
        .unwrap()
        .usage_in(UsagePeriod::current())
}

async fn saved_count(harness: &TestHarness, user_id: &UserId) -> u32 {
    harness
        .store
        .get_profile(user_id)
        .await
        .unwrap()
        .unwrap()
        .saved_recipes_count
}

// ============================================================================
// Generation
// ============================================================================

#[tokio::test]
async fn generates_recipe_and_reports_usage() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;

    let response = harness
        .server
        .post("/generate-recipe")
        .add_header(AUTHORIZATION, harness.user_auth())
        .json(&generate_body(&user_id))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["recipe"]["title"], "Pantry Surprise");
    assert_eq!(body["recipe"]["ingredients"][1], "onion (2 pieces)");
    assert_eq!(body["usage"]["plan"], "free");
    assert_eq!(body["usage"]["used"], 1);
    assert_eq!(body["usage"]["limit"], 3);
    assert_eq!(generations_used(&harness, &user_id).await, 1);
}

#[tokio::test]
async fn free_plan_stops_after_monthly_limit() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;

    for _ in 0..3 {
        harness
            .server
            .post("/generate-recipe")
            .json(&generate_body(&user_id))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&user_id))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "quota_exceeded");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Upgrade to Premium"));
    assert_eq!(body["error"]["details"]["limit"], 3);
    assert_eq!(harness.generator.calls(), 3);
    assert_eq!(generations_used(&harness, &user_id).await, 3);
}

#[tokio::test]
async fn paid_plan_is_unlimited() {
    let harness = TestHarness::new().await;
    let user_id = harness.create_user(PlanType::Premium).await;

    for _ in 0..5 {
        harness
            .server
            .post("/generate-recipe")
            .json(&generate_body(&user_id))
            .await
            .assert_status_ok();
    }

    assert_eq!(generations_used(&harness, &user_id).await, 5);
}

#[tokio::test]
async fn lapsed_cancellation_falls_back_to_free_quota() {
    let harness = TestHarness::new().await;
    let user_id = harness.create_user(PlanType::Premium).await;
    let patch = SubscriptionPatch::plan(PlanType::Premium, SubscriptionStatus::ActiveUntilPeriodEnd)
        .with_subscription_ref("manual_subscription_promo")
        .with_period_end(Some(Utc::now() - Duration::hours(1)));
    harness
        .store
        .upsert_subscription(&user_id, &patch)
        .await
        .unwrap();

    for _ in 0..3 {
        harness
            .server
            .post("/generate-recipe")
            .json(&generate_body(&user_id))
            .await
            .assert_status_ok();
    }

    harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&user_id))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn failed_generation_gives_quota_back() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    harness.generator.fail_with(|| AiError::InsufficientBalance);

    let response = harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&user_id))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(generations_used(&harness, &user_id).await, 0);
}

#[tokio::test]
async fn provider_outage_is_unavailable_and_free() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    harness.generator.fail_with(|| AiError::Api {
        status: 502,
        message: "bad gateway".into(),
    });

    let response = harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&user_id))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "ai_unavailable");
    assert_eq!(generations_used(&harness, &user_id).await, 0);
}

#[tokio::test]
async fn generation_without_provider_consumes_nothing() {
    let harness = TestHarness::without_generator().await;
    let user_id = harness.test_user_id;

    let response = harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&user_id))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(generations_used(&harness, &user_id).await, 0);
}

#[tokio::test]
async fn generation_requires_ingredients() {
    let harness = TestHarness::new().await;

    for body in [
        json!({"userId": harness.test_user_id.to_string()}),
        json!({"userId": harness.test_user_id.to_string(), "ingredients": []}),
        json!({"ingredients": ["rice"]}),
    ] {
        harness
            .server
            .post("/generate-recipe")
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    assert_eq!(harness.generator.calls(), 0);
}

#[tokio::test]
async fn generation_for_unknown_user_is_not_found() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post("/generate-recipe")
        .json(&generate_body(&UserId::generate()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generation_rejects_mismatched_session() {
    let harness = TestHarness::new().await;
    let other = harness.create_user(PlanType::Free).await;

    harness
        .server
        .post("/generate-recipe")
        .add_header(AUTHORIZATION, bearer(&other))
        .json(&generate_body(&harness.test_user_id))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    assert_eq!(generations_used(&harness, &harness.test_user_id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_never_exceed_the_limit() {
    let store = Arc::new(MemoryStore::new());
    let user_id = UserId::generate();
    let mut profile = dinner_core::Profile::new(user_id);
    profile.monthly_usage = 2;
    profile.usage_period = UsagePeriod::current();
    store.put_profile(&profile).await.unwrap();
    let ledger = UsageLedger::new(store.clone());

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.try_consume_generation(&user_id).await.is_ok() })
        })
        .collect();

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    let profile = store.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(profile.usage_in(UsagePeriod::current()), 3);
}

// ============================================================================
// Saved recipes
// ============================================================================

async fn save(harness: &TestHarness, user_id: &UserId, title: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/recipes/save")
        .json(&json!({
            "userId": user_id.to_string(),
            "recipe": {"title": title, "ingredients": ["rice"], "instructions": ["Cook."]}
        }))
        .await
}

#[tokio::test]
async fn saves_and_lists_recipes() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;

    let response = save(&harness, &user_id, "Fried Rice").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["recipe"]["title"], "Fried Rice");
    assert_eq!(saved_count(&harness, &user_id).await, 1);

    let listed = harness
        .server
        .get("/recipes")
        .add_header(AUTHORIZATION, harness.user_auth())
        .await;
    listed.assert_status_ok();
    let listed: Value = listed.json();
    assert_eq!(listed["recipes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn free_plan_saves_at_most_five() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;

    for i in 0..5 {
        save(&harness, &user_id, &format!("Recipe {i}"))
            .await
            .assert_status_ok();
    }

    let response = save(&harness, &user_id, "One too many").await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["details"]["quota"], "saved_recipes");
    assert_eq!(saved_count(&harness, &user_id).await, 5);
    assert_eq!(
        harness.store.list_recipes(&user_id).await.unwrap().len(),
        5
    );
}

#[tokio::test]
async fn save_requires_recipe() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post("/recipes/save")
        .json(&json!({"userId": harness.test_user_id.to_string()}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(saved_count(&harness, &harness.test_user_id).await, 0);
}

#[tokio::test]
async fn delete_frees_a_slot() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    for i in 0..5 {
        save(&harness, &user_id, &format!("Recipe {i}"))
            .await
            .assert_status_ok();
    }
    let recipe_id = harness.store.list_recipes(&user_id).await.unwrap()[0]
        .id
        .to_string();

    let response = harness
        .server
        .delete("/recipes/delete")
        .json(&json!({"userId": user_id.to_string(), "recipeId": recipe_id}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(saved_count(&harness, &user_id).await, 4);

    save(&harness, &user_id, "Room again").await.assert_status_ok();
}

#[tokio::test]
async fn deleting_twice_is_not_found() {
    let harness = TestHarness::new().await;
    let user_id = harness.test_user_id;
    save(&harness, &user_id, "Soup").await.assert_status_ok();
    let recipe_id = harness.store.list_recipes(&user_id).await.unwrap()[0]
        .id
        .to_string();
    let body = json!({"userId": user_id.to_string(), "recipeId": recipe_id});

    harness
        .server
        .delete("/recipes/delete")
        .json(&body)
        .await
        .assert_status_ok();
    harness
        .server
        .delete("/recipes/delete")
        .json(&body)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    assert_eq!(saved_count(&harness, &user_id).await, 0);
}

#[tokio::test]
async fn delete_rejects_bad_recipe_id() {
    let harness = TestHarness::new().await;

    harness
        .server
        .delete("/recipes/delete")
        .json(&json!({"userId": harness.test_user_id.to_string(), "recipeId": "nope"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
