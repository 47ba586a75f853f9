use serde_json::json;
use uuid::Uuid;

use sightline_core::ipc::{SightlineRequest, SightlineResponse};
use sightline_core::models::{NewBrand, NewCompetitor, NewPrompt};
use sightline_core::SightlineError;

use crate::subsystems::insights;
use crate::subsystems::orchestrator::RunError;
use crate::AppContext;

pub async fn handle_request(request: SightlineRequest, ctx: &AppContext) -> SightlineResponse {
    match request {
        SightlineRequest::Ping => SightlineResponse::pong(),
        SightlineRequest::Health => match ctx.store.health().await {
            Ok(backend) => SightlineResponse::ok(json!({
                "status": "healthy",
                "store": backend,
                "providers": ctx.orchestrator.registry().configured(),
            })),
            Err(e) => store_error(e),
        },
        SightlineRequest::RunPrompt { prompt_id, provider } => {
            match ctx.orchestrator.run_prompt(prompt_id, &provider).await {
                Ok(outcome) => SightlineResponse::ok(json!({
                    "run": outcome.run,
                    "answer": outcome.answer,
                    "citations": outcome.citations,
                })),
                Err(e) => run_error(e),
            }
        }
        SightlineRequest::RunAll {
            prompt_id,
            providers,
            policy,
        } => match ctx
            .orchestrator
            .run_all(prompt_id, providers.as_deref(), policy)
            .await
        {
            Ok(report) => SightlineResponse::ok(report.to_json()),
            Err(e) => run_error(e),
        },
        SightlineRequest::RecomputeVisibility { as_of } => {
            match ctx.jobs.recompute_visibility(as_of).await {
                Ok(r) => SightlineResponse::ok(json!({
                    "updated": r.updated,
                    "skipped": r.skipped,
                    "failed": r.failed,
                })),
                Err(e) => SightlineResponse::err_with_code("job_failed", e.to_string()),
            }
        }
        SightlineRequest::RecomputeRankings { date } => match ctx.jobs.recompute_rankings(date).await {
            Ok(r) => SightlineResponse::ok(json!({
                "written": r.written,
                "failed": r.failed,
            })),
            Err(e) => SightlineResponse::err_with_code("job_failed", e.to_string()),
        },
        SightlineRequest::RecomputeSources { window_days } => {
            match ctx.jobs.recompute_sources(window_days).await {
                Ok(r) => SightlineResponse::ok(json!({
                    "written": r.written,
                    "failed": r.failed,
                })),
                Err(e) => SightlineResponse::err_with_code("job_failed", e.to_string()),
            }
        }
        SightlineRequest::PromptInsights { org_id, filter } => {
            match insights::prompt_insights(ctx.store.as_ref(), org_id, &filter).await {
                Ok(rows) => SightlineResponse::ok(json!({ "prompts": rows })),
                Err(e) => store_error(e),
            }
        }
        SightlineRequest::LatestAnswers { prompt_id } => {
            match insights::latest_answers(ctx.store.as_ref(), prompt_id).await {
                Ok(slots) => SightlineResponse::ok(json!({ "answers": slots })),
                Err(e) => store_error(e),
            }
        }
        SightlineRequest::SourceShares { brand_id, provider } => {
            match insights::source_shares(ctx.store.as_ref(), brand_id, provider).await {
                Ok(sources) => SightlineResponse::ok(json!({ "sources": sources })),
                Err(e) => store_error(e),
            }
        }
        SightlineRequest::Rankings { provider, topic } => {
            match insights::rankings(ctx.store.as_ref(), provider, topic.as_deref()).await {
                Ok(rows) => SightlineResponse::ok(json!({ "rankings": rows })),
                Err(e) => store_error(e),
            }
        }
        SightlineRequest::VisibilityTrend {
            brand_id,
            provider,
            days,
        } => {
            let days = days.unwrap_or(insights::DEFAULT_TREND_DAYS);
            match insights::visibility_trend(ctx.store.as_ref(), brand_id, provider, days, ctx.clock.now())
                .await
            {
                Ok(points) => SightlineResponse::ok(json!({ "days": days, "points": points })),
                Err(e) => store_error(e),
            }
        }
        SightlineRequest::CreatePrompt { prompt } => create_prompt(prompt, ctx).await,
        SightlineRequest::DeletePrompt { prompt_id } => delete_prompt(prompt_id, ctx).await,
        SightlineRequest::CreateBrand { brand } => create_brand(brand, ctx).await,
        SightlineRequest::CreateCompetitor { brand_id, competitor } => {
            create_competitor(brand_id, competitor, ctx).await
        }
    }
}

async fn create_prompt(new: NewPrompt, ctx: &AppContext) -> SightlineResponse {
    if let Err(e) = new.validate() {
        return store_error(e);
    }
    let prompt = new.into_prompt(ctx.clock.now());
    match ctx.store.insert_prompt(&prompt).await {
        Ok(()) => {
            tracing::info!(prompt_id = %prompt.id, topic = %prompt.topic, "Prompt created");
            SightlineResponse::ok(json!({ "prompt": prompt }))
        }
        Err(e) => store_error(e),
    }
}

async fn delete_prompt(prompt_id: Uuid, ctx: &AppContext) -> SightlineResponse {
    match ctx.store.delete_prompt(prompt_id).await {
        Ok(true) => {
            tracing::info!(prompt_id = %prompt_id, "Prompt deleted");
            SightlineResponse::ok(json!({ "deleted": true, "id": prompt_id }))
        }
        Ok(false) => SightlineResponse::err_with_code(
            "prompt_not_found",
            format!("Prompt not found: {}", prompt_id),
        ),
        Err(e) => store_error(e),
    }
}

async fn create_brand(new: NewBrand, ctx: &AppContext) -> SightlineResponse {
    let brand = match new.into_brand() {
        Ok(b) => b,
        Err(e) => return store_error(e),
    };
    match ctx.store.insert_brand(&brand).await {
        Ok(()) => SightlineResponse::ok(json!({ "brand": brand })),
        Err(e) => store_error(e),
    }
}

async fn create_competitor(brand_id: Uuid, new: NewCompetitor, ctx: &AppContext) -> SightlineResponse {
    let competitor = match new.into_competitor(brand_id) {
        Ok(c) => c,
        Err(e) => return store_error(e),
    };
    match ctx.store.insert_competitor(&competitor).await {
        Ok(()) => SightlineResponse::ok(json!({ "competitor": competitor })),
        Err(e) => store_error(e),
    }
}

fn run_error(e: RunError) -> SightlineResponse {
    match e {
        RunError::Store(inner) => store_error(inner),
        other => SightlineResponse::err_with_code(other.code(), other.to_string()),
    }
}

fn store_error(e: SightlineError) -> SightlineResponse {
    let code = match &e {
        SightlineError::NotFound(_) => "not_found",
        SightlineError::Invalid(_) => "invalid",
        _ => "store_error",
    };
    SightlineResponse::err_with_code(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::{MemoryStore, ProviderRegistry, SightlineConfig, SystemClock};
    use std::sync::Arc;

    fn ctx() -> AppContext {
        AppContext::new(
            Arc::new(MemoryStore::new()),
            ProviderRegistry::new(),
            Arc::new(SystemClock),
            SightlineConfig::in_memory(),
        )
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = handle_request(SightlineRequest::Ping, &ctx()).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_create_prompt_rejects_blank_text() {
        let req = SightlineRequest::CreatePrompt {
            prompt: NewPrompt {
                org_id: Uuid::new_v4(),
                text: " ".into(),
                topic: "shoes".into(),
                locale: "en".into(),
            },
        };
        let resp = handle_request(req, &ctx()).await;
        assert_eq!(resp.code.as_deref(), Some("invalid"));
    }

    #[tokio::test]
    async fn test_run_prompt_unknown_prompt() {
        let req = SightlineRequest::RunPrompt {
            prompt_id: Uuid::new_v4(),
            provider: "openai".into(),
        };
        let resp = handle_request(req, &ctx()).await;
        assert!(!resp.is_ok());
        assert_eq!(resp.code.as_deref(), Some("prompt_not_found"));
    }

    #[tokio::test]
    async fn test_visibility_trend_rejects_non_positive_days() {
        let req = SightlineRequest::VisibilityTrend {
            brand_id: Uuid::new_v4(),
            provider: None,
            days: Some(0),
        };
        let resp = handle_request(req, &ctx()).await;
        assert_eq!(resp.code.as_deref(), Some("invalid"));
    }

    #[tokio::test]
    async fn test_rankings_empty_store() {
        let req = SightlineRequest::Rankings {
            provider: sightline_core::models::ProviderId::Gemini,
            topic: None,
        };
        let resp = handle_request(req, &ctx()).await;
        assert!(resp.is_ok());
        assert_eq!(resp.data.unwrap()["rankings"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_competitor_requires_existing_brand() {
        let req = SightlineRequest::CreateCompetitor {
            brand_id: Uuid::new_v4(),
            competitor: NewCompetitor {
                name: "Globex".into(),
                aliases: vec![],
                domains: vec![],
            },
        };
        let resp = handle_request(req, &ctx()).await;
        assert!(!resp.is_ok());
    }
}
