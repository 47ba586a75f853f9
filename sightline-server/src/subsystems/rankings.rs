//! Daily brand rankings
//!
//! For every prompt topic and provider, each brand's visibility is computed from
//! the latest succeeded run of each of its org's prompts in that topic. Brands
//! are ranked within the (topic, provider) group and compared against the
//! snapshots written for the previous day.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use sightline_core::config::AggregationConfig;
use sightline_core::models::{Brand, BrandRankingSnapshot, ProviderId, RunRecord};
use sightline_core::ranking::{compute_ranks, VisibilityRow};
use sightline_core::{RunQuery, Store};

use super::visibility::visibility_pct;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingReport {
    pub written: usize,
    pub failed: usize,
}

/// Ranks every brand for `date`. Rows are stamped with `now`.
pub async fn recompute_daily_rankings(
    store: &dyn Store,
    config: &AggregationConfig,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<RankingReport> {
    let brands = store.list_brands().await?;
    let topics = store.list_topics().await?;
    let mut report = RankingReport::default();

    for topic in &topics {
        for provider in ProviderId::ALL {
            let mut rows = Vec::new();
            for brand in &brands {
                match brand_visibility(store, config, brand, topic, provider, date).await {
                    Ok(Some(pct)) => rows.push(VisibilityRow {
                        brand_id: brand.id,
                        topic: topic.clone(),
                        provider,
                        visibility_pct: pct,
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            brand_id = %brand.id,
                            topic = %topic,
                            provider = %provider,
                            error = %e,
                            "Ranking visibility failed"
                        );
                        report.failed += 1;
                    }
                }
            }
            if rows.is_empty() {
                continue;
            }

            let prev = match previous_rows(store, topic, provider, date).await {
                Ok(prev) => prev,
                Err(e) => {
                    tracing::warn!(topic = %topic, provider = %provider, error = %e, "Previous rankings unavailable");
                    Vec::new()
                }
            };

            for ranked in compute_ranks(&rows, &prev) {
                let snapshot = BrandRankingSnapshot {
                    id: Uuid::new_v4(),
                    brand_id: ranked.brand_id,
                    topic: ranked.topic,
                    provider: ranked.provider,
                    date,
                    visibility_pct: ranked.visibility_pct,
                    rank: ranked.rank,
                    prev_rank: ranked.prev_rank,
                    created_at: now,
                };
                match store.append_ranking_snapshot(&snapshot).await {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        tracing::warn!(brand_id = %snapshot.brand_id, error = %e, "Ranking snapshot write failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        date = %date,
        written = report.written,
        failed = report.failed,
        "Daily rankings complete"
    );
    Ok(report)
}

/// Visibility of `brand` in one topic/provider, `None` when there is nothing to rank.
async fn brand_visibility(
    store: &dyn Store,
    config: &AggregationConfig,
    brand: &Brand,
    topic: &str,
    provider: ProviderId,
    date: NaiveDate,
) -> Result<Option<f64>> {
    let prompts = store.list_prompts(brand.org_id, Some(topic)).await?;
    if prompts.is_empty() {
        return Ok(None);
    }

    let end_of_day = date
        .and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN))
        .and_utc();
    let query = RunQuery::succeeded()
        .prompts(prompts.iter().map(|p| p.id).collect())
        .provider(provider)
        .finished_between(None, Some(end_of_day))
        .limit(config.run_window);
    let latest = latest_per_prompt(store.list_runs(&query).await?);

    Ok(visibility_pct(&latest, brand, config.citation_weight))
}

/// Keeps the first record per prompt of a newest-first list.
fn latest_per_prompt(records: Vec<RunRecord>) -> Vec<RunRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.run.prompt_id))
        .collect()
}

/// Prior-day rows, keeping only each brand's most recent snapshot when the job
/// ran more than once that day.
async fn previous_rows(
    store: &dyn Store,
    topic: &str,
    provider: ProviderId,
    date: NaiveDate,
) -> Result<Vec<VisibilityRow>> {
    let Some(prev_date) = date.pred_opt() else {
        return Ok(Vec::new());
    };
    let snapshots = store.list_ranking_snapshots(topic, provider, prev_date).await?;
    Ok(dedupe_latest(snapshots))
}

fn dedupe_latest(snapshots: Vec<BrandRankingSnapshot>) -> Vec<VisibilityRow> {
    let mut seen = HashSet::new();
    let mut rows: Vec<VisibilityRow> = snapshots
        .into_iter()
        .rev()
        .filter(|s| seen.insert(s.brand_id))
        .map(|s| VisibilityRow {
            brand_id: s.brand_id,
            topic: s.topic,
            provider: s.provider,
            visibility_pct: s.visibility_pct,
        })
        .collect();
    rows.reverse();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(brand_id: Uuid, pct: f64, rank: i32) -> BrandRankingSnapshot {
        BrandRankingSnapshot {
            id: Uuid::new_v4(),
            brand_id,
            topic: "shoes".into(),
            provider: ProviderId::OpenAi,
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            visibility_pct: pct,
            rank,
            prev_rank: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_dedupe_keeps_latest_per_brand() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = dedupe_latest(vec![
            snapshot(a, 10.0, 2),
            snapshot(b, 20.0, 1),
            snapshot(a, 40.0, 1),
            snapshot(b, 20.0, 2),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].brand_id, a);
        assert_eq!(rows[0].visibility_pct, 40.0);
        assert_eq!(rows[1].brand_id, b);
    }
}
