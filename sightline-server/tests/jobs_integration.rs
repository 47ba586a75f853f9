//! Aggregation job integration tests: visibility, rankings, sources.

mod common;

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use sightline_core::models::{ProviderId, OVERALL_TOPIC};
use sightline_core::{Clock, ProviderError, ProviderOutput, Store};

use sightline_server::subsystems::insights::{rankings, source_shares, visibility_trend};

use common::{app, seed_org, start_time, ScriptedAdapter};

fn reply(text: &str) -> Result<ProviderOutput, ProviderError> {
    Ok(ProviderOutput {
        text: text.to_string(),
        tokens_in: Some(10),
        tokens_out: Some(20),
        raw_citations: vec![],
        model: "scripted-model".into(),
    })
}

// ===========================================================================
// TEST 1: visibility snapshot is the mean over prompts; idle providers skipped
// ===========================================================================
#[tokio::test]
async fn test_visibility_snapshot_written_per_provider_with_runs() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::OpenAi, "unused")
            .then(reply("Acme is the top pick."))
            .then(reply("Try Globex instead.")),
    );
    let t = app(vec![adapter]);
    let org = seed_org(
        t.store.as_ref(),
        "Acme",
        &["acme.com"],
        &["Globex"],
        &[("shoes", "best shoes?"), ("shoes", "cheap shoes?")],
    )
    .await;

    for prompt in &org.prompts {
        t.ctx.orchestrator.run_prompt(prompt.id, "openai").await.unwrap();
    }

    let report = t.ctx.jobs.recompute_visibility(None).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2, "anthropic and gemini have no runs");
    assert_eq!(report.failed, 0);

    let snapshots = t
        .store
        .list_visibility_snapshots(org.brand.id, Some(ProviderId::OpenAi))
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].visibility_pct, 50.0);
    assert_eq!(snapshots[0].topic, OVERALL_TOPIC);
    assert_eq!(snapshots[0].date, start_time().date_naive());

    // Append-only: a second pass adds a row instead of replacing the first.
    t.ctx.jobs.recompute_visibility(None).await.unwrap();
    let snapshots = t
        .store
        .list_visibility_snapshots(org.brand.id, Some(ProviderId::OpenAi))
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 2);
}

// ===========================================================================
// TEST 2: citation-only visibility counts for the brand
// ===========================================================================
#[tokio::test]
async fn test_visibility_from_citation_only() {
    let adapter = Arc::new(ScriptedAdapter::answering(
        ProviderId::Gemini,
        "See https://shop.acme.com/deals for details.",
    ));
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Zenith", &["acme.com"], &[], &[("shoes", "q")]).await;
    t.ctx.orchestrator.run_prompt(org.prompts[0].id, "gemini").await.unwrap();

    t.ctx.jobs.recompute_visibility(None).await.unwrap();
    let snapshots = t
        .store
        .list_visibility_snapshots(org.brand.id, Some(ProviderId::Gemini))
        .await
        .unwrap();
    assert_eq!(snapshots[0].visibility_pct, 100.0);
}

// ===========================================================================
// TEST 3: rankings order brands and pick up the previous day's rank
// ===========================================================================
#[tokio::test]
async fn test_daily_rankings_with_previous_rank() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::OpenAi, "unused")
            .then(reply("Nothing relevant here."))
            .then(reply("Initech makes the best shoes.")),
    );
    let t = app(vec![adapter]);
    let acme = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q1")]).await;
    let initech = seed_org(t.store.as_ref(), "Initech", &[], &[], &[("shoes", "q2")]).await;

    t.ctx.orchestrator.run_prompt(acme.prompts[0].id, "openai").await.unwrap();
    t.ctx.orchestrator.run_prompt(initech.prompts[0].id, "openai").await.unwrap();

    let day1 = start_time().date_naive();
    let day2 = day1 + Duration::days(1);

    let first = t.ctx.jobs.recompute_rankings(Some(day1)).await.unwrap();
    assert_eq!(first.written, 2);
    let second = t.ctx.jobs.recompute_rankings(Some(day2)).await.unwrap();
    assert_eq!(second.written, 2);

    let rows = t
        .store
        .list_ranking_snapshots("shoes", ProviderId::OpenAi, day2)
        .await
        .unwrap();
    let initech_row = rows.iter().find(|r| r.brand_id == initech.brand.id).unwrap();
    let acme_row = rows.iter().find(|r| r.brand_id == acme.brand.id).unwrap();
    assert_eq!(initech_row.rank, 1);
    assert_eq!(initech_row.visibility_pct, 100.0);
    assert_eq!(initech_row.created_at, t.clock.now(), "stamped by the injected clock");
    assert_eq!(initech_row.prev_rank, Some(1));
    assert_eq!(acme_row.rank, 2);
    assert_eq!(acme_row.prev_rank, Some(2));

    let day1_rows = t
        .store
        .list_ranking_snapshots("shoes", ProviderId::OpenAi, day1)
        .await
        .unwrap();
    assert!(day1_rows.iter().all(|r| r.prev_rank.is_none()));

    let listed = rankings(t.store.as_ref(), ProviderId::OpenAi, Some("shoes")).await.unwrap();
    let order: Vec<(NaiveDate, &str)> = listed.iter().map(|r| (r.date, r.brand_name.as_str())).collect();
    assert_eq!(
        order,
        vec![(day2, "Initech"), (day2, "Acme"), (day1, "Initech"), (day1, "Acme")]
    );
}

// ===========================================================================
// TEST 4: rankings ignore runs finished after the ranked day
// ===========================================================================
#[tokio::test]
async fn test_rankings_skip_future_runs() {
    let adapter = Arc::new(ScriptedAdapter::answering(ProviderId::OpenAi, "Acme"));
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    t.ctx.orchestrator.run_prompt(org.prompts[0].id, "openai").await.unwrap();

    let before = NaiveDate::from_ymd_opt(2025, 2, 27).unwrap();
    let report = t.ctx.jobs.recompute_rankings(Some(before)).await.unwrap();
    assert_eq!(report.written, 0);
}

// ===========================================================================
// TEST 5: source aggregates count cited domains inside the window only
// ===========================================================================
#[tokio::test]
async fn test_source_aggregates_respect_window() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::Anthropic, "unused")
            .then(reply("Old: https://stale.com/a"))
            .then(reply("New: https://rei.com/a https://runnersworld.com/b"))
            .then(reply("Again: https://rei.com/c")),
    );
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    let prompt_id = org.prompts[0].id;

    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();
    t.clock.advance(Duration::days(10));
    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();
    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();

    let report = t.ctx.jobs.recompute_sources(Some(7)).await.unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.failed, 0);

    let aggs = t
        .store
        .list_source_aggs(org.brand.id, Some(ProviderId::Anthropic))
        .await
        .unwrap();
    let counts: Vec<(&str, i32)> = aggs.iter().map(|a| (a.domain.as_str(), a.citations)).collect();
    assert_eq!(counts, vec![("rei.com", 2), ("runnersworld.com", 1)]);
    assert_eq!(aggs[0].window_end - aggs[0].window_start, Duration::days(7));

    let sources = source_shares(t.store.as_ref(), org.brand.id, None).await.unwrap();
    assert_eq!(sources.len(), 1, "only anthropic has aggregates");
    assert_eq!(sources[0].provider, ProviderId::Anthropic);
    assert_eq!(sources[0].shares[0].domain, "rei.com");
    assert_eq!(sources[0].shares[0].share_pct, 66.7);
    assert_eq!(sources[0].shares[1].share_pct, 33.3);
}

// ===========================================================================
// TEST 6: concurrent manual triggers are serialized, both complete
// ===========================================================================
#[tokio::test]
async fn test_concurrent_triggers_do_not_deadlock() {
    let adapter = Arc::new(ScriptedAdapter::answering(ProviderId::OpenAi, "Acme"));
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    t.ctx.orchestrator.run_prompt(org.prompts[0].id, "openai").await.unwrap();

    let (a, b) = tokio::join!(
        t.ctx.jobs.recompute_visibility(None),
        t.ctx.jobs.recompute_visibility(None)
    );
    assert_eq!(a.unwrap().updated + b.unwrap().updated, 2);
    assert!(t.ctx.jobs.run_cycle().await.is_ok());
}

// ===========================================================================
// TEST 7: the visibility trend keeps one point per day inside the window
// ===========================================================================
#[tokio::test]
async fn test_visibility_trend_window_and_same_day_overwrite() {
    let adapter = Arc::new(
        ScriptedAdapter::answering(ProviderId::Anthropic, "unused")
            .then(reply("Globex only."))
            .then(reply("Acme wins.")),
    );
    let t = app(vec![adapter]);
    let org = seed_org(t.store.as_ref(), "Acme", &[], &[], &[("shoes", "q")]).await;
    let prompt_id = org.prompts[0].id;

    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();
    t.ctx.jobs.recompute_visibility(None).await.unwrap();

    t.clock.advance(Duration::days(3));
    t.ctx.jobs.recompute_visibility(None).await.unwrap();
    t.ctx.orchestrator.run_prompt(prompt_id, "anthropic").await.unwrap();
    t.ctx.jobs.recompute_visibility(None).await.unwrap();

    let all = visibility_trend(t.store.as_ref(), org.brand.id, None, 30, t.clock.now())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].anthropic, Some(0.0));
    assert_eq!(all[1].anthropic, Some(50.0), "latest snapshot of the day wins");
    assert_eq!(all[1].openai, None);

    let recent = visibility_trend(t.store.as_ref(), org.brand.id, None, 1, t.clock.now())
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].date, t.clock.now().date_naive());
}
