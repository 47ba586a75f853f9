//! Read models over persisted runs and aggregates: per-prompt insights, latest
//! answers, source shares, rankings and the visibility trend.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use sightline_core::models::{
    Answer, Brand, Citation, Competitor, Entity, Prompt, ProviderId, ProviderRun, RunFilter,
    RunRecord, OVERALL_TOPIC,
};
use sightline_core::position::resolve_position;
use sightline_core::sources::{compute_domain_shares, DomainShare};
use sightline_core::{score_sentiment, RunQuery, SightlineError, Store};

const TOP_ENTITY_LIMIT: usize = 3;
const RANKING_ROW_LIMIT: i64 = 100;
pub const DEFAULT_TREND_DAYS: i64 = 30;
const MAX_TREND_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Brand,
    Competitor,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptInsight {
    pub prompt_id: Uuid,
    pub text: String,
    pub topic: String,
    pub runs: usize,
    /// Share of answers that mention the brand or cite one of its domains.
    pub visibility_pct: f64,
    /// Mean list position over answers featuring the brand, one decimal.
    pub avg_position: Option<f64>,
    /// Mean 0–100 sentiment over answers featuring the brand.
    pub sentiment: Option<u32>,
    pub top_entities: Vec<TopEntity>,
}

/// Insights for every prompt of `org_id` matching `filter`, newest prompt first.
pub async fn prompt_insights(
    store: &dyn Store,
    org_id: Uuid,
    filter: &RunFilter,
) -> Result<Vec<PromptInsight>, SightlineError> {
    let mut prompts = store.list_prompts(org_id, filter.topic.as_deref()).await?;
    prompts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if prompts.is_empty() {
        return Ok(Vec::new());
    }

    let brand = store.owner_brand(org_id).await?;
    let competitors = match &brand {
        Some(b) => store.list_competitors(b.id).await?,
        None => Vec::new(),
    };

    let mut query = RunQuery::succeeded()
        .prompts(prompts.iter().map(|p| p.id).collect())
        .finished_between(filter.since, filter.until);
    if let Some(provider) = filter.provider {
        query = query.provider(provider);
    }

    let mut by_prompt: HashMap<Uuid, Vec<RunRecord>> = HashMap::new();
    for record in store.list_runs(&query).await? {
        by_prompt.entry(record.run.prompt_id).or_default().push(record);
    }

    Ok(prompts
        .iter()
        .map(|prompt| {
            let records = by_prompt.get(&prompt.id).map(Vec::as_slice).unwrap_or(&[]);
            insight_for(prompt, records, brand.as_ref(), &competitors)
        })
        .collect())
}

fn insight_for(
    prompt: &Prompt,
    records: &[RunRecord],
    brand: Option<&Brand>,
    competitors: &[Competitor],
) -> PromptInsight {
    let mut insight = PromptInsight {
        prompt_id: prompt.id,
        text: prompt.text.clone(),
        topic: prompt.topic.clone(),
        runs: records.len(),
        visibility_pct: 0.0,
        avg_position: None,
        sentiment: None,
        top_entities: Vec::new(),
    };
    let Some(brand) = brand else {
        return insight;
    };

    let featuring: Vec<&RunRecord> = records
        .iter()
        .filter(|r| r.mentions_brand(brand.id) || r.cites_any(&brand.domains))
        .collect();
    if !records.is_empty() {
        let pct = featuring.len() as f64 / records.len() as f64 * 100.0;
        insight.visibility_pct = super::visibility::round2(pct);
    }

    let mut names = vec![brand.name.as_str()];
    names.extend(competitors.iter().map(|c| c.name.as_str()));

    let texts: Vec<&str> = featuring
        .iter()
        .filter_map(|r| r.answer.as_ref())
        .map(|a| a.answer.text.as_str())
        .collect();

    let positions: Vec<usize> = texts
        .iter()
        .filter_map(|text| resolve_position(text, &names))
        .collect();
    if !positions.is_empty() {
        let avg = positions.iter().sum::<usize>() as f64 / positions.len() as f64;
        insight.avg_position = Some((avg * 10.0).round() / 10.0);
    }

    let scores: Vec<u32> = texts
        .iter()
        .filter_map(|text| score_sentiment(text, brand))
        .collect();
    if !scores.is_empty() {
        let avg = scores.iter().sum::<u32>() as f64 / scores.len() as f64;
        insight.sentiment = Some(avg.round() as u32);
    }

    // Records are newest first.
    if let Some(latest) = records.first().and_then(|r| r.answer.as_ref()) {
        insight.top_entities = top_entities(&latest.mentions, brand, competitors);
    }
    insight
}

/// Brand and competitors ordered by where they first appear in an answer.
fn top_entities(
    mentions: &[sightline_core::models::Mention],
    brand: &Brand,
    competitors: &[Competitor],
) -> Vec<TopEntity> {
    let mut first_seen: HashMap<Option<Uuid>, i32> = HashMap::new();
    for m in mentions.iter().filter(|m| m.brand_id == brand.id) {
        first_seen
            .entry(m.competitor_id)
            .and_modify(|start| *start = (*start).min(m.span_start))
            .or_insert(m.span_start);
    }

    let mut ordered: Vec<(i32, TopEntity)> = first_seen
        .into_iter()
        .filter_map(|(competitor_id, start)| {
            let entity = match competitor_id {
                None => TopEntity {
                    id: brand.id,
                    kind: EntityKind::Brand,
                    name: brand.name.clone(),
                    domain: brand.domains().first().cloned(),
                },
                Some(id) => {
                    let c = competitors.iter().find(|c| c.id == id)?;
                    TopEntity {
                        id: c.id,
                        kind: EntityKind::Competitor,
                        name: c.name.clone(),
                        domain: c.domains().first().cloned(),
                    }
                }
            };
            Some((start, entity))
        })
        .collect();
    ordered.sort_by_key(|(start, _)| *start);
    ordered
        .into_iter()
        .take(TOP_ENTITY_LIMIT)
        .map(|(_, e)| e)
        .collect()
}

/// The latest successful answer of one provider for a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAnswer {
    pub provider: ProviderId,
    pub run: Option<ProviderRun>,
    pub answer: Option<Answer>,
    pub citations: Vec<Citation>,
}

/// One slot per provider; providers that never succeeded get an empty slot.
pub async fn latest_answers(
    store: &dyn Store,
    prompt_id: Uuid,
) -> Result<Vec<ProviderAnswer>, SightlineError> {
    if store.get_prompt(prompt_id).await?.is_none() {
        return Err(SightlineError::NotFound(format!("prompt {}", prompt_id)));
    }

    let mut out = Vec::with_capacity(ProviderId::ALL.len());
    for provider in ProviderId::ALL {
        let query = RunQuery::succeeded()
            .prompts(vec![prompt_id])
            .provider(provider)
            .limit(1);
        let latest = store.list_runs(&query).await?.into_iter().next();

        out.push(match latest {
            Some(RunRecord { run, answer }) => {
                let (answer, mut citations) = match answer {
                    Some(bundle) => (Some(bundle.answer), bundle.citations),
                    None => (None, Vec::new()),
                };
                citations.sort_by_key(|c| c.rank_hint.unwrap_or(i32::MAX));
                ProviderAnswer {
                    provider,
                    run: Some(run),
                    answer,
                    citations,
                }
            }
            None => ProviderAnswer {
                provider,
                run: None,
                answer: None,
                citations: Vec::new(),
            },
        });
    }
    Ok(out)
}

/// Domain shares from the most recent source aggregation window of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSources {
    pub provider: ProviderId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub shares: Vec<DomainShare>,
}

/// Latest source breakdown per provider for `brand_id`. Providers without any
/// aggregate are left out.
pub async fn source_shares(
    store: &dyn Store,
    brand_id: Uuid,
    provider: Option<ProviderId>,
) -> Result<Vec<ProviderSources>, SightlineError> {
    let providers: Vec<ProviderId> = match provider {
        Some(p) => vec![p],
        None => ProviderId::ALL.to_vec(),
    };

    let mut out = Vec::new();
    for provider in providers {
        // Newest window first.
        let rows = store.list_source_aggs(brand_id, Some(provider)).await?;
        let Some(latest) = rows.first() else {
            continue;
        };
        let (window_start, window_end) = (latest.window_start, latest.window_end);
        let counts: Vec<(String, u64)> = rows
            .iter()
            .filter(|r| r.window_end == window_end)
            .map(|r| (r.domain.clone(), u64::try_from(r.citations).unwrap_or(0)))
            .collect();
        out.push(ProviderSources {
            provider,
            window_start,
            window_end,
            shares: compute_domain_shares(&counts),
        });
    }
    Ok(out)
}

/// One ranking row with the brand's display name resolved.
#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub brand_id: Uuid,
    pub brand_name: String,
    pub topic: String,
    pub provider: ProviderId,
    pub date: NaiveDate,
    pub visibility_pct: f64,
    pub rank: i32,
    pub prev_rank: Option<i32>,
}

/// Latest ranking rows for `provider`, optionally one topic. Newest day first,
/// then by rank.
pub async fn rankings(
    store: &dyn Store,
    provider: ProviderId,
    topic: Option<&str>,
) -> Result<Vec<RankingEntry>, SightlineError> {
    let names: HashMap<Uuid, String> = store
        .list_brands()
        .await?
        .into_iter()
        .map(|b| (b.id, b.name))
        .collect();
    let rows = store.recent_rankings(provider, topic, RANKING_ROW_LIMIT).await?;

    Ok(rows
        .into_iter()
        .map(|r| RankingEntry {
            brand_name: names
                .get(&r.brand_id)
                .cloned()
                .unwrap_or_else(|| r.brand_id.to_string()),
            brand_id: r.brand_id,
            topic: r.topic,
            provider: r.provider,
            date: r.date,
            visibility_pct: r.visibility_pct,
            rank: r.rank,
            prev_rank: r.prev_rank,
        })
        .collect())
}

/// Visibility of one brand on one day, one column per provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini: Option<f64>,
}

impl TrendPoint {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            openai: None,
            anthropic: None,
            gemini: None,
        }
    }

    fn set(&mut self, provider: ProviderId, pct: f64) {
        match provider {
            ProviderId::OpenAi => self.openai = Some(pct),
            ProviderId::Anthropic => self.anthropic = Some(pct),
            ProviderId::Gemini => self.gemini = Some(pct),
        }
    }
}

/// Daily overall visibility of `brand_id` over the last `days` days, oldest
/// first. When a day has several snapshots for a provider the latest wins.
pub async fn visibility_trend(
    store: &dyn Store,
    brand_id: Uuid,
    provider: Option<ProviderId>,
    days: i64,
    now: DateTime<Utc>,
) -> Result<Vec<TrendPoint>, SightlineError> {
    if !(1..=MAX_TREND_DAYS).contains(&days) {
        return Err(SightlineError::Invalid(format!(
            "days must be between 1 and {}, got {}",
            MAX_TREND_DAYS, days
        )));
    }
    let since = (now - Duration::days(days)).date_naive();

    // Oldest first, so later rows of the same day overwrite earlier ones.
    let snapshots = store.list_visibility_snapshots(brand_id, provider).await?;
    let mut points: Vec<TrendPoint> = Vec::new();
    for s in snapshots
        .iter()
        .filter(|s| s.topic == OVERALL_TOPIC && s.date >= since)
    {
        if let Some(point) = points.last_mut().filter(|p| p.date == s.date) {
            point.set(s.provider, s.visibility_pct);
            continue;
        }
        let mut point = TrendPoint::new(s.date);
        point.set(s.provider, s.visibility_pct);
        points.push(point);
    }
    Ok(points)
}
