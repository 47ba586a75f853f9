//! HTTP integration tests for the Sightline REST API
//!
//! Runs against an in-memory store with scripted providers. Uses both the inner
//! function approach and the Axum `oneshot` approach for full handler dispatch.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use sightline_core::models::ProviderId;
use sightline_server::http::{build_router, health_inner, run_prompt_inner, HttpState, RunRequest};
use tower::ServiceExt;

use common::{app, seed_org, ScriptedAdapter};

async fn send(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// ===========================================================================
// TEST 1: health_inner reports the store and configured providers
// ===========================================================================
#[tokio::test]
async fn test_health_inner() {
    let t = app(vec![Arc::new(ScriptedAdapter::answering(ProviderId::Gemini, "x"))]);
    let (status, body) = health_inner(&t.ctx).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["providers"], json!(["gemini"]));
}

// ===========================================================================
// TEST 2: run_prompt_inner — missing provider is a 400
// ===========================================================================
#[tokio::test]
async fn test_run_prompt_inner_requires_provider() {
    let t = app(vec![]);
    let (status, body) = run_prompt_inner(&t.ctx, uuid::Uuid::new_v4(), RunRequest { provider: None }).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

// ===========================================================================
// TEST 3: catalog writes, a run, and the read endpoints end to end
// ===========================================================================
#[tokio::test]
async fn test_end_to_end_over_http() {
    let t = app(vec![Arc::new(ScriptedAdapter::answering(
        ProviderId::OpenAi,
        "1. Acme Runner is excellent. More at https://acme.com/run",
    ))]);
    let router = build_router(Arc::new(HttpState { ctx: t.ctx.clone() }));
    let org_id = uuid::Uuid::new_v4();

    let (status, body) = send(
        &router,
        "POST",
        "/brands",
        Some(json!({"org_id": org_id, "name": "Acme", "domains": ["www.Acme.com"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["brand"]["domains"], json!(["acme.com"]));
    let brand_id = body["brand"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "POST",
        &format!("/brands/{}/competitors", brand_id),
        Some(json!({"name": "Globex"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &router,
        "POST",
        "/prompts",
        Some(json!({"org_id": org_id, "text": "best running shoes?", "topic": "shoes"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["prompt"]["locale"], "en");
    let prompt_id = body["prompt"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        "POST",
        &format!("/prompts/{}/run", prompt_id),
        Some(json!({"provider": "openai"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["status"], "succeeded");
    assert_eq!(body["citations"][0]["domain"], "acme.com");

    let (status, body) = send(&router, "GET", &format!("/prompts/{}/answers/latest", prompt_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answers"].as_array().unwrap().len(), 3);

    let (status, body) = send(&router, "GET", &format!("/insights?org_id={}&provider=openai", org_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prompts"][0]["visibility_pct"], 100.0);
    assert_eq!(body["prompts"][0]["avg_position"], 1.0);

    let (status, body) = send(&router, "POST", "/jobs/visibility", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);

    let (status, body) = send(&router, "POST", "/jobs/rankings", Some(json!({"date": "2025-03-01"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["written"], 1);

    let (status, _) = send(&router, "DELETE", &format!("/prompts/{}", prompt_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&router, "DELETE", &format!("/prompts/{}", prompt_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

// ===========================================================================
// TEST 4: run errors map to HTTP statuses
// ===========================================================================
#[tokio::test]
async fn test_run_error_statuses() {
    let t = app(vec![]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    let router = build_router(Arc::new(HttpState { ctx: t.ctx.clone() }));
    let uri = format!("/prompts/{}/run", org.prompts[0].id);

    let (status, _) = send(&router, "POST", &uri, Some(json!({"provider": "mistral"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "POST", &uri, Some(json!({"provider": "openai"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let missing = format!("/prompts/{}/run", uuid::Uuid::new_v4());
    let (status, _) = send(&router, "POST", &missing, Some(json!({"provider": "openai"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

// ===========================================================================
// TEST 5: ranking rows and the visibility trend are readable after the jobs
// ===========================================================================
#[tokio::test]
async fn test_rankings_and_visibility_trend_endpoints() {
    let t = app(vec![Arc::new(ScriptedAdapter::answering(ProviderId::OpenAi, "Acme leads the pack."))]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    let router = build_router(Arc::new(HttpState { ctx: t.ctx.clone() }));
    t.ctx.orchestrator.run_prompt(org.prompts[0].id, "openai").await.unwrap();

    send(&router, "POST", "/jobs/visibility", None).await;
    t.clock.advance(chrono::Duration::days(1));
    send(&router, "POST", "/jobs/visibility", None).await;
    let (status, body) = send(&router, "POST", "/jobs/rankings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["written"], 1);

    let trend_uri = format!("/brands/{}/visibility?days=7", org.brand.id);
    let (status, body) = send(&router, "GET", &trend_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let points = body["points"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["date"], "2025-03-01");
    assert_eq!(points[1]["date"], "2025-03-02");
    assert_eq!(points[1]["openai"], 100.0);
    assert!(points[1].get("gemini").is_none());

    let bad_uri = format!("/brands/{}/visibility?days=0", org.brand.id);
    let (status, _) = send(&router, "GET", &bad_uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, "GET", "/rankings?topic=shoes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rankings"][0]["brand_name"], "Acme");
    assert_eq!(body["rankings"][0]["provider"], "openai");
    assert_eq!(body["rankings"][0]["date"], "2025-03-02");
    assert_eq!(body["rankings"][0]["rank"], 1);

    let (_, body) = send(&router, "GET", "/rankings?provider=gemini", None).await;
    assert_eq!(body["rankings"], json!([]));
}
