use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RunCommit, RunQuery, Store, StoreResult};
use crate::error::SightlineError;
use crate::models::{
    Answer, AnswerBundle, Brand, BrandRankingSnapshot, Citation, Competitor, Mention, Prompt,
    ProviderId, ProviderRun, RunRecord, RunStatus, SourceAgg, VisibilitySnapshot,
};

#[derive(Default)]
struct Tables {
    prompts: Vec<Prompt>,
    brands: Vec<Brand>,
    competitors: Vec<Competitor>,
    runs: Vec<ProviderRun>,
    answers: HashMap<Uuid, Answer>,
    citations: Vec<Citation>,
    mentions: Vec<Mention>,
    visibility: Vec<VisibilitySnapshot>,
    rankings: Vec<BrandRankingSnapshot>,
    sources: Vec<SourceAgg>,
}

impl Tables {
    fn record(&self, run: &ProviderRun) -> RunRecord {
        let answer = self.answers.get(&run.id).map(|answer| AnswerBundle {
            answer: answer.clone(),
            citations: self
                .citations
                .iter()
                .filter(|c| c.answer_id == answer.id)
                .cloned()
                .collect(),
            mentions: self
                .mentions
                .iter()
                .filter(|m| m.answer_id == answer.id)
                .cloned()
                .collect(),
        });
        RunRecord {
            run: run.clone(),
            answer,
        }
    }

    fn matches(&self, run: &ProviderRun, query: &RunQuery) -> bool {
        if query.provider.is_some_and(|p| p != run.provider) {
            return false;
        }
        if query.status.is_some_and(|s| s != run.status) {
            return false;
        }
        if let Some(ids) = &query.prompt_ids {
            if !ids.contains(&run.prompt_id) {
                return false;
            }
        }
        if let Some(since) = query.finished_since {
            if !run.finished_at.is_some_and(|f| f >= since) {
                return false;
            }
        }
        if let Some(until) = query.finished_until {
            if !run.finished_at.is_some_and(|f| f <= until) {
                return false;
            }
        }
        if query.org_id.is_some() || query.topic.is_some() {
            let Some(prompt) = self.prompts.iter().find(|p| p.id == run.prompt_id) else {
                return false;
            };
            if query.org_id.is_some_and(|o| o != prompt.org_id) {
                return false;
            }
            if query.topic.as_deref().is_some_and(|t| t != prompt.topic) {
                return false;
            }
        }
        true
    }
}

/// Process-local store. One lock guards every table, so `commit_run` is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health(&self) -> StoreResult<String> {
        Ok("memory".to_string())
    }

    async fn insert_prompt(&self, prompt: &Prompt) -> StoreResult<()> {
        self.tables.write().await.prompts.push(prompt.clone());
        Ok(())
    }

    async fn get_prompt(&self, id: Uuid) -> StoreResult<Option<Prompt>> {
        let t = self.tables.read().await;
        Ok(t.prompts.iter().find(|p| p.id == id).cloned())
    }

    async fn delete_prompt(&self, id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let before = t.prompts.len();
        t.prompts.retain(|p| p.id != id);
        if t.prompts.len() == before {
            return Ok(false);
        }

        // Cascade: runs, answers, citations, mentions.
        let run_ids: Vec<Uuid> = t
            .runs
            .iter()
            .filter(|r| r.prompt_id == id)
            .map(|r| r.id)
            .collect();
        let answer_ids: Vec<Uuid> = run_ids
            .iter()
            .filter_map(|r| t.answers.remove(r).map(|a| a.id))
            .collect();
        t.runs.retain(|r| r.prompt_id != id);
        t.citations.retain(|c| !answer_ids.contains(&c.answer_id));
        t.mentions.retain(|m| !answer_ids.contains(&m.answer_id));
        Ok(true)
    }

    async fn list_prompts(&self, org_id: Uuid, topic: Option<&str>) -> StoreResult<Vec<Prompt>> {
        let t = self.tables.read().await;
        Ok(t.prompts
            .iter()
            .filter(|p| p.org_id == org_id && topic.map_or(true, |tp| tp == p.topic))
            .cloned()
            .collect())
    }

    async fn list_topics(&self) -> StoreResult<Vec<String>> {
        let t = self.tables.read().await;
        let mut topics: Vec<String> = t.prompts.iter().map(|p| p.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        Ok(topics)
    }

    async fn insert_brand(&self, brand: &Brand) -> StoreResult<()> {
        self.tables.write().await.brands.push(brand.clone());
        Ok(())
    }

    async fn insert_competitor(&self, competitor: &Competitor) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.brands.iter().any(|b| b.id == competitor.brand_id) {
            return Err(SightlineError::NotFound(format!(
                "brand {}",
                competitor.brand_id
            )));
        }
        t.competitors.push(competitor.clone());
        Ok(())
    }

    async fn list_brands(&self) -> StoreResult<Vec<Brand>> {
        Ok(self.tables.read().await.brands.clone())
    }

    async fn owner_brand(&self, org_id: Uuid) -> StoreResult<Option<Brand>> {
        let t = self.tables.read().await;
        Ok(t.brands.iter().find(|b| b.org_id == org_id).cloned())
    }

    async fn list_competitors(&self, brand_id: Uuid) -> StoreResult<Vec<Competitor>> {
        let t = self.tables.read().await;
        Ok(t.competitors
            .iter()
            .filter(|c| c.brand_id == brand_id)
            .cloned()
            .collect())
    }

    async fn insert_run(&self, run: &ProviderRun) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.prompts.iter().any(|p| p.id == run.prompt_id) {
            return Err(SightlineError::NotFound(format!("prompt {}", run.prompt_id)));
        }
        t.runs.push(run.clone());
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, finished_at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if let Some(run) = t
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == RunStatus::Running)
        {
            run.status = RunStatus::Failed;
            run.finished_at = Some(finished_at);
        }
        Ok(())
    }

    async fn commit_run(&self, commit: RunCommit) -> StoreResult<ProviderRun> {
        let mut t = self.tables.write().await;

        let run = t
            .runs
            .iter_mut()
            .find(|r| r.id == commit.run_id)
            .ok_or_else(|| SightlineError::NotFound(format!("run {}", commit.run_id)))?;
        if run.status.is_terminal() {
            return Err(SightlineError::Invalid(format!(
                "run {} is already {}",
                run.id,
                run.status.as_str()
            )));
        }

        run.status = RunStatus::Succeeded;
        run.model = commit.completion.model;
        run.finished_at = Some(commit.completion.finished_at);
        run.tokens_in = commit.completion.tokens_in;
        run.tokens_out = commit.completion.tokens_out;
        run.cost_usd = Some(commit.completion.cost_usd);
        let updated = run.clone();

        t.answers.insert(commit.run_id, commit.answer);
        t.citations.extend(commit.citations);
        t.mentions.extend(commit.mentions);

        Ok(updated)
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>> {
        let t = self.tables.read().await;
        Ok(t.runs.iter().find(|r| r.id == run_id).map(|r| t.record(r)))
    }

    async fn list_runs(&self, query: &RunQuery) -> StoreResult<Vec<RunRecord>> {
        let t = self.tables.read().await;
        let mut runs: Vec<&ProviderRun> = t.runs.iter().filter(|r| t.matches(r, query)).collect();

        // Newest first; unfinished runs sort after finished ones.
        runs.sort_by(|a, b| {
            b.finished_at
                .is_some()
                .cmp(&a.finished_at.is_some())
                .then(b.finished_at.cmp(&a.finished_at))
                .then(b.started_at.cmp(&a.started_at))
        });
        if let Some(limit) = query.limit {
            runs.truncate(limit.max(0) as usize);
        }

        Ok(runs.into_iter().map(|r| t.record(r)).collect())
    }

    async fn append_visibility_snapshot(&self, snapshot: &VisibilitySnapshot) -> StoreResult<()> {
        self.tables.write().await.visibility.push(snapshot.clone());
        Ok(())
    }

    async fn list_visibility_snapshots(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<VisibilitySnapshot>> {
        let t = self.tables.read().await;
        let mut rows: Vec<VisibilitySnapshot> = t
            .visibility
            .iter()
            .filter(|s| s.brand_id == brand_id && provider.map_or(true, |p| p == s.provider))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(rows)
    }

    async fn append_ranking_snapshot(&self, snapshot: &BrandRankingSnapshot) -> StoreResult<()> {
        self.tables.write().await.rankings.push(snapshot.clone());
        Ok(())
    }

    async fn list_ranking_snapshots(
        &self,
        topic: &str,
        provider: ProviderId,
        date: NaiveDate,
    ) -> StoreResult<Vec<BrandRankingSnapshot>> {
        let t = self.tables.read().await;
        Ok(t.rankings
            .iter()
            .filter(|s| s.topic == topic && s.provider == provider && s.date == date)
            .cloned()
            .collect())
    }

    async fn recent_rankings(
        &self,
        provider: ProviderId,
        topic: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<BrandRankingSnapshot>> {
        let t = self.tables.read().await;
        let mut rows: Vec<BrandRankingSnapshot> = t
            .rankings
            .iter()
            .filter(|s| s.provider == provider && topic.map_or(true, |topic| s.topic == topic))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.rank.cmp(&b.rank))
                .then(b.created_at.cmp(&a.created_at))
        });
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn append_source_agg(&self, agg: &SourceAgg) -> StoreResult<()> {
        self.tables.write().await.sources.push(agg.clone());
        Ok(())
    }

    async fn list_source_aggs(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<SourceAgg>> {
        let t = self.tables.read().await;
        let mut rows: Vec<SourceAgg> = t
            .sources
            .iter()
            .filter(|s| s.brand_id == brand_id && provider.map_or(true, |p| p == s.provider))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.window_end
                .cmp(&a.window_end)
                .then(b.citations.cmp(&a.citations))
        });
        Ok(rows)
    }
}
