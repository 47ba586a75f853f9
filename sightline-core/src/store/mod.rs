//! Persistence boundary
//!
//! `Store` covers create/read plus the range queries the jobs need, and exactly one
//! multi-write operation, `commit_run`, which must be atomic: either the run flips
//! to `succeeded` together with its answer, citations and mentions, or nothing is
//! written.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::SightlineError;
use crate::models::{
    Answer, Brand, BrandRankingSnapshot, Citation, Competitor, Mention, Prompt, ProviderId,
    ProviderRun, RunCompletion, RunRecord, RunStatus, SourceAgg, VisibilitySnapshot,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, SightlineError>;

/// Filter for `Store::list_runs`. Results are newest first (by finish time, then
/// start time) and truncated to `limit`.
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub org_id: Option<Uuid>,
    pub prompt_ids: Option<Vec<Uuid>>,
    pub topic: Option<String>,
    pub provider: Option<ProviderId>,
    pub status: Option<RunStatus>,
    pub finished_since: Option<DateTime<Utc>>,
    pub finished_until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl RunQuery {
    pub fn succeeded() -> Self {
        Self {
            status: Some(RunStatus::Succeeded),
            ..Default::default()
        }
    }

    pub fn org(mut self, org_id: Uuid) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn prompts(mut self, ids: Vec<Uuid>) -> Self {
        self.prompt_ids = Some(ids);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn finished_between(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.finished_since = since;
        self.finished_until = until;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Everything written when a run succeeds.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub run_id: Uuid,
    pub completion: RunCompletion,
    pub answer: Answer,
    pub citations: Vec<Citation>,
    pub mentions: Vec<Mention>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Backend description for health reporting.
    async fn health(&self) -> StoreResult<String>;

    // Prompts
    async fn insert_prompt(&self, prompt: &Prompt) -> StoreResult<()>;
    async fn get_prompt(&self, id: Uuid) -> StoreResult<Option<Prompt>>;
    async fn delete_prompt(&self, id: Uuid) -> StoreResult<bool>;
    async fn list_prompts(&self, org_id: Uuid, topic: Option<&str>) -> StoreResult<Vec<Prompt>>;
    /// Distinct prompt topics, sorted.
    async fn list_topics(&self) -> StoreResult<Vec<String>>;

    // Brands
    async fn insert_brand(&self, brand: &Brand) -> StoreResult<()>;
    async fn insert_competitor(&self, competitor: &Competitor) -> StoreResult<()>;
    async fn list_brands(&self) -> StoreResult<Vec<Brand>>;
    /// The brand tracked for an org (earliest created when several exist).
    async fn owner_brand(&self, org_id: Uuid) -> StoreResult<Option<Brand>>;
    async fn list_competitors(&self, brand_id: Uuid) -> StoreResult<Vec<Competitor>>;

    // Runs
    async fn insert_run(&self, run: &ProviderRun) -> StoreResult<()>;
    /// Moves a `running` run to `failed`. Terminal runs are left untouched.
    async fn fail_run(&self, run_id: Uuid, finished_at: DateTime<Utc>) -> StoreResult<()>;
    /// Atomically marks the run succeeded and writes its answer, citations and
    /// mentions. Fails without writing when the run is missing or already terminal.
    async fn commit_run(&self, commit: RunCommit) -> StoreResult<ProviderRun>;
    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>>;
    async fn list_runs(&self, query: &RunQuery) -> StoreResult<Vec<RunRecord>>;

    // Derived facts (append-only)
    async fn append_visibility_snapshot(&self, snapshot: &VisibilitySnapshot) -> StoreResult<()>;
    /// Snapshots of one brand, oldest date first.
    async fn list_visibility_snapshots(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<VisibilitySnapshot>>;
    async fn append_ranking_snapshot(&self, snapshot: &BrandRankingSnapshot) -> StoreResult<()>;
    /// Ranking rows for one group and day, oldest first.
    async fn list_ranking_snapshots(
        &self,
        topic: &str,
        provider: ProviderId,
        date: NaiveDate,
    ) -> StoreResult<Vec<BrandRankingSnapshot>>;
    /// Most recent ranking rows of a provider, newest day first then by rank.
    async fn recent_rankings(
        &self,
        provider: ProviderId,
        topic: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<BrandRankingSnapshot>>;
    async fn append_source_agg(&self, agg: &SourceAgg) -> StoreResult<()>;
    async fn list_source_aggs(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<SourceAgg>>;
}
