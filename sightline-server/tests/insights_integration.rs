//! Read-model integration tests: prompt insights and latest answers.

mod common;

use std::sync::Arc;

use chrono::Duration;
use sightline_core::models::{ProviderId, RunFilter};
use sightline_core::{ProviderError, ProviderOutput, SightlineError};
use sightline_server::subsystems::insights::{latest_answers, prompt_insights, EntityKind};

use common::{app, seed_org, start_time, ScriptedAdapter};

fn reply(text: &str) -> Result<ProviderOutput, ProviderError> {
    Ok(ProviderOutput {
        text: text.to_string(),
        tokens_in: None,
        tokens_out: None,
        raw_citations: vec![],
        model: "scripted-model".into(),
    })
}

#[tokio::test]
async fn test_prompt_insights_summarize_runs() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::OpenAi, "unused")
            .then(reply("Top picks:\n1. Globex Trail\n2. Acme Runner is excellent and reliable"))
            .then(reply("Nothing about shoes brands here.")),
    );
    let t = app(vec![adapter]);
    let org = seed_org(
        t.store.as_ref(),
        "Acme",
        &["acme.com"],
        &["Globex"],
        &[("shoes", "best shoes?")],
    )
    .await;
    let prompt_id = org.prompts[0].id;

    t.ctx.orchestrator.run_prompt(prompt_id, "openai").await.unwrap();
    t.clock.advance(Duration::minutes(5));
    t.ctx.orchestrator.run_prompt(prompt_id, "openai").await.unwrap();

    let rows = prompt_insights(t.store.as_ref(), org.org_id, &RunFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.runs, 2);
    assert_eq!(row.visibility_pct, 50.0);
    assert_eq!(row.avg_position, Some(2.0));
    assert!(row.sentiment.unwrap() > 60, "strong positive wording in a list line");
    // Latest answer mentions nobody.
    assert!(row.top_entities.is_empty());

    // Narrowing the window to the first run surfaces its entities.
    let filter = RunFilter {
        until: Some(start_time()),
        ..Default::default()
    };
    let rows = prompt_insights(t.store.as_ref(), org.org_id, &filter).await.unwrap();
    assert_eq!(rows[0].runs, 1);
    assert_eq!(rows[0].visibility_pct, 100.0);
    let kinds: Vec<EntityKind> = rows[0].top_entities.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EntityKind::Competitor, EntityKind::Brand]);
}

#[tokio::test]
async fn test_prompt_insights_without_runs() {
    let t = app(vec![]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "a"), ("boots", "b")]).await;

    let filter = RunFilter {
        topic: Some("boots".into()),
        ..Default::default()
    };
    let rows = prompt_insights(t.store.as_ref(), org.org_id, &filter).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].topic, "boots");
    assert_eq!(rows[0].runs, 0);
    assert_eq!(rows[0].visibility_pct, 0.0);
    assert_eq!(rows[0].avg_position, None);
    assert_eq!(rows[0].sentiment, None);
}

#[tokio::test]
async fn test_latest_answers_has_a_slot_per_provider() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::Anthropic, "unused")
            .then(reply("first answer"))
            .then(reply("second answer https://rei.com/x")),
    );
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    let prompt_id = org.prompts[0].id;

    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();
    t.clock.advance(Duration::minutes(1));
    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();

    let slots = latest_answers(t.store.as_ref(), prompt_id).await.unwrap();
    assert_eq!(slots.len(), 3);

    let anthropic = slots.iter().find(|s| s.provider == ProviderId::Anthropic).unwrap();
    assert_eq!(anthropic.answer.as_ref().unwrap().text, "second answer https://rei.com/x");
    assert_eq!(anthropic.citations.len(), 1);

    let openai = slots.iter().find(|s| s.provider == ProviderId::OpenAi).unwrap();
    assert!(openai.run.is_none());
    assert!(openai.answer.is_none());
    assert!(openai.citations.is_empty());
}

#[tokio::test]
async fn test_latest_answers_unknown_prompt() {
    let t = app(vec![]);
    let err = latest_answers(t.store.as_ref(), uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SightlineError::NotFound(_)));
}
