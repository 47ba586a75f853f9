//! Sightline HTTP REST API
//!
//! Axum server exposing the same operations as the Unix socket. Each endpoint is
//! a thin axum handler over an `*_inner` function that builds a
//! `SightlineRequest`, dispatches it through the router and maps the response
//! code to an HTTP status. Inner functions are called directly in tests.
//!
//! Endpoints:
//! - GET    /health                        — store and provider status
//! - GET    /version                       — server version info
//! - POST   /prompts                       — create a prompt
//! - DELETE /prompts/:id                   — delete a prompt and its runs
//! - POST   /prompts/:id/run               — run against one provider
//! - POST   /prompts/:id/run-all           — fan out to several providers
//! - GET    /prompts/:id/answers/latest    — latest answer per provider
//! - GET    /insights                      — per-prompt insights for an org
//! - POST   /brands                        — create a brand
//! - POST   /brands/:id/competitors        — add a competitor
//! - GET    /brands/:id/sources            — latest cited-domain shares
//! - GET    /brands/:id/visibility         — daily visibility per provider
//! - GET    /rankings                      — ranking rows for a provider
//! - POST   /jobs/visibility|rankings|sources — trigger a recompute

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use sightline_core::ipc::{SightlineRequest, SightlineResponse, PROTOCOL_VERSION};
use sightline_core::models::{JoinPolicy, NewBrand, NewCompetitor, NewPrompt, ProviderId, RunFilter};

use crate::AppContext;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ctx: AppContext,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/prompts", post(create_prompt_handler))
        .route("/prompts/:id", delete(delete_prompt_handler))
        .route("/prompts/:id/run", post(run_prompt_handler))
        .route("/prompts/:id/run-all", post(run_all_handler))
        .route("/prompts/:id/answers/latest", get(latest_answers_handler))
        .route("/insights", get(insights_handler))
        .route("/brands", post(create_brand_handler))
        .route("/brands/:id/competitors", post(create_competitor_handler))
        .route("/brands/:id/sources", get(source_shares_handler))
        .route("/brands/:id/visibility", get(visibility_trend_handler))
        .route("/rankings", get(rankings_handler))
        .route("/jobs/visibility", post(visibility_job_handler))
        .route("/jobs/rankings", post(rankings_job_handler))
        .route("/jobs/sources", post(sources_job_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(ctx: AppContext, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);
    let state = Arc::new(HttpState { ctx });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Sightline HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RunAllRequest {
    pub providers: Option<Vec<ProviderId>>,
    #[serde(default)]
    pub policy: JoinPolicy,
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub org_id: Uuid,
    pub topic: Option<String>,
    pub provider: Option<ProviderId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SourcesQuery {
    pub provider: Option<ProviderId>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RankingsQuery {
    pub provider: Option<ProviderId>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TrendQuery {
    pub provider: Option<ProviderId>,
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct VisibilityJobRequest {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RankingsJobRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SourcesJobRequest {
    pub window_days: Option<i64>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check — returns 503 when the store is unreachable.
pub async fn health_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    match ctx.store.health().await {
        Ok(backend) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": backend,
                "providers": ctx.orchestrator.registry().configured(),
                "socket": ctx.config.service.socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
    })
}

pub async fn run_prompt_inner(
    ctx: &AppContext,
    prompt_id: Uuid,
    req: RunRequest,
) -> (StatusCode, serde_json::Value) {
    let provider = match req.provider {
        Some(p) if !p.trim().is_empty() => p,
        _ => return bad_request("provider field is required"),
    };
    dispatch(ctx, SightlineRequest::RunPrompt { prompt_id, provider }, StatusCode::OK).await
}

pub async fn run_all_inner(
    ctx: &AppContext,
    prompt_id: Uuid,
    req: RunAllRequest,
) -> (StatusCode, serde_json::Value) {
    let request = SightlineRequest::RunAll {
        prompt_id,
        providers: req.providers,
        policy: req.policy,
    };
    dispatch(ctx, request, StatusCode::OK).await
}

pub async fn latest_answers_inner(ctx: &AppContext, prompt_id: Uuid) -> (StatusCode, serde_json::Value) {
    dispatch(ctx, SightlineRequest::LatestAnswers { prompt_id }, StatusCode::OK).await
}

pub async fn insights_inner(ctx: &AppContext, query: InsightsQuery) -> (StatusCode, serde_json::Value) {
    let request = SightlineRequest::PromptInsights {
        org_id: query.org_id,
        filter: RunFilter {
            topic: query.topic,
            provider: query.provider,
            since: query.since,
            until: query.until,
        },
    };
    dispatch(ctx, request, StatusCode::OK).await
}

pub async fn source_shares_inner(
    ctx: &AppContext,
    brand_id: Uuid,
    query: SourcesQuery,
) -> (StatusCode, serde_json::Value) {
    let request = SightlineRequest::SourceShares {
        brand_id,
        provider: query.provider,
    };
    dispatch(ctx, request, StatusCode::OK).await
}

/// Rankings default to OpenAI when no provider is given.
pub async fn rankings_inner(ctx: &AppContext, query: RankingsQuery) -> (StatusCode, serde_json::Value) {
    let request = SightlineRequest::Rankings {
        provider: query.provider.unwrap_or(ProviderId::OpenAi),
        topic: query.topic.filter(|t| !t.trim().is_empty()),
    };
    dispatch(ctx, request, StatusCode::OK).await
}

pub async fn visibility_trend_inner(
    ctx: &AppContext,
    brand_id: Uuid,
    query: TrendQuery,
) -> (StatusCode, serde_json::Value) {
    let request = SightlineRequest::VisibilityTrend {
        brand_id,
        provider: query.provider,
        days: query.days,
    };
    dispatch(ctx, request, StatusCode::OK).await
}

pub async fn create_prompt_inner(ctx: &AppContext, prompt: NewPrompt) -> (StatusCode, serde_json::Value) {
    dispatch(ctx, SightlineRequest::CreatePrompt { prompt }, StatusCode::CREATED).await
}

pub async fn delete_prompt_inner(ctx: &AppContext, prompt_id: Uuid) -> (StatusCode, serde_json::Value) {
    dispatch(ctx, SightlineRequest::DeletePrompt { prompt_id }, StatusCode::OK).await
}

pub async fn create_brand_inner(ctx: &AppContext, brand: NewBrand) -> (StatusCode, serde_json::Value) {
    dispatch(ctx, SightlineRequest::CreateBrand { brand }, StatusCode::CREATED).await
}

pub async fn create_competitor_inner(
    ctx: &AppContext,
    brand_id: Uuid,
    competitor: NewCompetitor,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        ctx,
        SightlineRequest::CreateCompetitor { brand_id, competitor },
        StatusCode::CREATED,
    )
    .await
}

async fn dispatch(
    ctx: &AppContext,
    request: SightlineRequest,
    success: StatusCode,
) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(request, ctx).await;
    let status = status_for(&response, success);
    match response_to_http(response) {
        Ok(data) => (status, data),
        Err(e) => (status, serde_json::json!({ "error": e, "status": "error" })),
    }
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": msg, "status": "error" }),
    )
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn run_prompt_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RunRequest>,
) -> impl IntoResponse {
    let (status, body) = run_prompt_inner(&state.ctx, id, req).await;
    (status, Json(body))
}

pub async fn run_all_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<RunAllRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = run_all_inner(&state.ctx, id, req).await;
    (status, Json(body))
}

pub async fn latest_answers_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = latest_answers_inner(&state.ctx, id).await;
    (status, Json(body))
}

pub async fn insights_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<InsightsQuery>,
) -> impl IntoResponse {
    let (status, body) = insights_inner(&state.ctx, query).await;
    (status, Json(body))
}

pub async fn source_shares_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<SourcesQuery>,
) -> impl IntoResponse {
    let (status, body) = source_shares_inner(&state.ctx, id, query).await;
    (status, Json(body))
}

pub async fn rankings_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<RankingsQuery>,
) -> impl IntoResponse {
    let (status, body) = rankings_inner(&state.ctx, query).await;
    (status, Json(body))
}

pub async fn visibility_trend_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<TrendQuery>,
) -> impl IntoResponse {
    let (status, body) = visibility_trend_inner(&state.ctx, id, query).await;
    (status, Json(body))
}

pub async fn create_prompt_handler(
    State(state): State<Arc<HttpState>>,
    Json(prompt): Json<NewPrompt>,
) -> impl IntoResponse {
    let (status, body) = create_prompt_inner(&state.ctx, prompt).await;
    (status, Json(body))
}

pub async fn delete_prompt_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = delete_prompt_inner(&state.ctx, id).await;
    (status, Json(body))
}

pub async fn create_brand_handler(
    State(state): State<Arc<HttpState>>,
    Json(brand): Json<NewBrand>,
) -> impl IntoResponse {
    let (status, body) = create_brand_inner(&state.ctx, brand).await;
    (status, Json(body))
}

pub async fn create_competitor_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(competitor): Json<NewCompetitor>,
) -> impl IntoResponse {
    let (status, body) = create_competitor_inner(&state.ctx, id, competitor).await;
    (status, Json(body))
}

pub async fn visibility_job_handler(
    State(state): State<Arc<HttpState>>,
    body: Option<Json<VisibilityJobRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let request = SightlineRequest::RecomputeVisibility { as_of: req.as_of };
    let (status, body) = dispatch(&state.ctx, request, StatusCode::OK).await;
    (status, Json(body))
}

pub async fn rankings_job_handler(
    State(state): State<Arc<HttpState>>,
    body: Option<Json<RankingsJobRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let request = SightlineRequest::RecomputeRankings { date: req.date };
    let (status, body) = dispatch(&state.ctx, request, StatusCode::OK).await;
    (status, Json(body))
}

pub async fn sources_job_handler(
    State(state): State<Arc<HttpState>>,
    body: Option<Json<SourcesJobRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let request = SightlineRequest::RecomputeSources {
        window_days: req.window_days,
    };
    let (status, body) = dispatch(&state.ctx, request, StatusCode::OK).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an IPC `SightlineResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: SightlineResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

/// HTTP status for a router response, keyed on its error code.
pub fn status_for(response: &SightlineResponse, success: StatusCode) -> StatusCode {
    if response.is_ok() {
        return success;
    }
    match response.code.as_deref() {
        Some("prompt_not_found") | Some("not_found") => StatusCode::NOT_FOUND,
        Some("invalid") | Some("provider_unsupported") | Some("bad_request") => StatusCode::BAD_REQUEST,
        Some("provider_not_configured") => StatusCode::SERVICE_UNAVAILABLE,
        Some("run_failed") => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
