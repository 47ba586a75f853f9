//! Visibility Aggregator
//!
//! Folds persisted runs into one `VisibilitySnapshot` per brand and provider.
//! Snapshots are appended, never updated; a brand with no eligible runs for a
//! provider gets no row at all, which readers treat as "no data".

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use sightline_core::config::AggregationConfig;
use sightline_core::models::{Brand, ProviderId, RunRecord, VisibilitySnapshot, OVERALL_TOPIC};
use sightline_core::{RunQuery, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Visibility contribution of one run: 1 when the brand is mentioned or cited,
/// scaled by `citation_weight` when cited, never above 1.
pub fn run_visibility(record: &RunRecord, brand: &Brand, citation_weight: f64) -> f64 {
    let mentioned = record.mentions_brand(brand.id);
    let cited = record.cites_any(&brand.domains);
    if !mentioned && !cited {
        return 0.0;
    }
    let value = if cited { citation_weight } else { 1.0 };
    value.clamp(0.0, 1.0)
}

/// Mean over prompts of each prompt's mean run visibility, as a percentage
/// rounded to two decimals. `None` when `records` is empty.
pub fn visibility_pct(records: &[RunRecord], brand: &Brand, citation_weight: f64) -> Option<f64> {
    if records.is_empty() {
        return None;
    }

    let mut by_prompt: Vec<(Uuid, f64, usize)> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    for record in records {
        let value = run_visibility(record, brand, citation_weight);
        match index.get(&record.run.prompt_id) {
            Some(&i) => {
                by_prompt[i].1 += value;
                by_prompt[i].2 += 1;
            }
            None => {
                index.insert(record.run.prompt_id, by_prompt.len());
                by_prompt.push((record.run.prompt_id, value, 1));
            }
        }
    }

    let per_prompt_sum: f64 = by_prompt.iter().map(|(_, sum, n)| sum / *n as f64).sum();
    let mean = per_prompt_sum / by_prompt.len() as f64;
    Some(round2(mean * 100.0))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Appends one overall snapshot per brand and provider, dated `as_of`.
///
/// Failures for a single brand/provider are logged and counted; the batch keeps going.
pub async fn recompute_visibility_snapshots(
    store: &dyn Store,
    config: &AggregationConfig,
    as_of: DateTime<Utc>,
) -> Result<VisibilityReport> {
    let brands = store.list_brands().await?;
    let mut report = VisibilityReport::default();

    for brand in &brands {
        for provider in ProviderId::ALL {
            match snapshot_for(store, config, brand, provider, as_of).await {
                Ok(true) => report.updated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        brand_id = %brand.id,
                        provider = %provider,
                        error = %e,
                        "Visibility snapshot failed"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    tracing::info!(
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "Visibility recompute complete"
    );
    Ok(report)
}

async fn snapshot_for(
    store: &dyn Store,
    config: &AggregationConfig,
    brand: &Brand,
    provider: ProviderId,
    as_of: DateTime<Utc>,
) -> Result<bool> {
    let query = RunQuery::succeeded()
        .org(brand.org_id)
        .provider(provider)
        .finished_between(None, Some(as_of))
        .limit(config.run_window);
    let records = store.list_runs(&query).await?;

    let Some(pct) = visibility_pct(&records, brand, config.citation_weight) else {
        tracing::debug!(brand_id = %brand.id, provider = %provider, "No runs in window, skipping");
        return Ok(false);
    };

    store
        .append_visibility_snapshot(&VisibilitySnapshot {
            id: Uuid::new_v4(),
            brand_id: brand.id,
            topic: OVERALL_TOPIC.to_string(),
            provider,
            date: as_of.date_naive(),
            visibility_pct: pct,
            created_at: as_of,
        })
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sightline_core::models::{
        Answer, AnswerBundle, Citation, Mention, ProviderRun, RunStatus,
    };

    fn brand() -> Brand {
        Brand {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "Acme".into(),
            aliases: vec![],
            domains: vec!["acme.com".into()],
        }
    }

    fn record(prompt_id: Uuid, brand_id: Option<Uuid>, cited_domain: Option<&str>) -> RunRecord {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let run = ProviderRun {
            id: Uuid::new_v4(),
            prompt_id,
            provider: ProviderId::OpenAi,
            model: "m".into(),
            status: RunStatus::Succeeded,
            started_at: at,
            finished_at: Some(at),
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
        };
        let answer_id = Uuid::new_v4();
        RunRecord {
            answer: Some(AnswerBundle {
                answer: Answer {
                    id: answer_id,
                    run_id: run.id,
                    text: String::new(),
                    language: "en".into(),
                    created_at: at,
                },
                citations: cited_domain
                    .map(|d| Citation {
                        id: Uuid::new_v4(),
                        answer_id,
                        url: format!("https://{}/", d),
                        domain: d.to_string(),
                        title: None,
                        snippet: None,
                        rank_hint: Some(1),
                    })
                    .into_iter()
                    .collect(),
                mentions: brand_id
                    .map(|b| Mention {
                        id: Uuid::new_v4(),
                        answer_id,
                        brand_id: b,
                        competitor_id: None,
                        confidence: 0.9,
                        span_start: 0,
                        span_end: 4,
                    })
                    .into_iter()
                    .collect(),
            }),
            run,
        }
    }

    #[test]
    fn test_visibility_is_mean_of_prompt_means() {
        let b = brand();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let records = vec![
            record(p1, Some(b.id), None),
            record(p1, None, None),
            record(p2, None, Some("acme.com")),
        ];
        // p1 = 0.5, p2 = 1.0
        assert_eq!(visibility_pct(&records, &b, 1.0), Some(75.0));
    }

    #[test]
    fn test_citation_weight_is_clamped() {
        let b = brand();
        let records = vec![record(Uuid::new_v4(), None, Some("acme.com"))];
        assert_eq!(visibility_pct(&records, &b, 1.2), Some(100.0));
        assert_eq!(visibility_pct(&records, &b, 0.5), Some(50.0));
    }

    #[test]
    fn test_no_runs_is_no_data() {
        assert_eq!(visibility_pct(&[], &brand(), 1.0), None);
    }

    #[test]
    fn test_competitor_mention_does_not_count() {
        let b = brand();
        let mut r = record(Uuid::new_v4(), Some(b.id), None);
        if let Some(bundle) = r.answer.as_mut() {
            bundle.mentions[0].competitor_id = Some(Uuid::new_v4());
        }
        assert_eq!(visibility_pct(&[r], &b, 1.0), Some(0.0));
    }

    #[test]
    fn test_rounding_two_decimals() {
        let b = brand();
        let p = Uuid::new_v4();
        let records = vec![
            record(p, Some(b.id), None),
            record(p, None, None),
            record(p, None, None),
        ];
        assert_eq!(visibility_pct(&records, &b, 1.0), Some(33.33));
    }
}
