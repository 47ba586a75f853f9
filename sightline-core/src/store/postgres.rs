use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{RunCommit, RunQuery, Store, StoreResult};
use crate::db;
use crate::error::SightlineError;
use crate::models::{
    Answer, AnswerBundle, Brand, BrandRankingSnapshot, Citation, Competitor, Mention, Prompt,
    ProviderId, ProviderRun, RunRecord, RunStatus, SourceAgg, VisibilitySnapshot,
};

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

/// Postgres-backed store using runtime-checked queries.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema. Safe to call on every start.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn bundles_for(&self, run_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, AnswerBundle>> {
        if run_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let answers: Vec<Answer> =
            sqlx::query_as("SELECT * FROM answers WHERE run_id = ANY($1)")
                .bind(run_ids)
                .fetch_all(&self.pool)
                .await?;
        let answer_ids: Vec<Uuid> = answers.iter().map(|a| a.id).collect();

        let citations: Vec<Citation> = sqlx::query_as(
            "SELECT * FROM citations WHERE answer_id = ANY($1) ORDER BY rank_hint NULLS LAST",
        )
        .bind(&answer_ids)
        .fetch_all(&self.pool)
        .await?;
        let mentions: Vec<Mention> = sqlx::query_as(
            "SELECT * FROM mentions WHERE answer_id = ANY($1) ORDER BY span_start",
        )
        .bind(&answer_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_answer: HashMap<Uuid, AnswerBundle> = answers
            .into_iter()
            .map(|answer| {
                (
                    answer.id,
                    AnswerBundle {
                        answer,
                        citations: Vec::new(),
                        mentions: Vec::new(),
                    },
                )
            })
            .collect();
        for c in citations {
            if let Some(bundle) = by_answer.get_mut(&c.answer_id) {
                bundle.citations.push(c);
            }
        }
        for m in mentions {
            if let Some(bundle) = by_answer.get_mut(&m.answer_id) {
                bundle.mentions.push(m);
            }
        }

        Ok(by_answer
            .into_values()
            .map(|bundle| (bundle.answer.run_id, bundle))
            .collect())
    }

    async fn attach_answers(&self, runs: Vec<ProviderRun>) -> StoreResult<Vec<RunRecord>> {
        let ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
        let mut bundles = self.bundles_for(&ids).await?;
        Ok(runs
            .into_iter()
            .map(|run| RunRecord {
                answer: bundles.remove(&run.id),
                run,
            })
            .collect())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health(&self) -> StoreResult<String> {
        Ok(db::health_check(&self.pool).await?)
    }

    async fn insert_prompt(&self, prompt: &Prompt) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO prompts (id, org_id, text, topic, locale, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(prompt.id)
        .bind(prompt.org_id)
        .bind(&prompt.text)
        .bind(&prompt.topic)
        .bind(&prompt.locale)
        .bind(prompt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_prompt(&self, id: Uuid) -> StoreResult<Option<Prompt>> {
        Ok(sqlx::query_as("SELECT * FROM prompts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_prompt(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM prompts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_prompts(&self, org_id: Uuid, topic: Option<&str>) -> StoreResult<Vec<Prompt>> {
        Ok(sqlx::query_as(
            "SELECT * FROM prompts
             WHERE org_id = $1 AND ($2::text IS NULL OR topic = $2)
             ORDER BY created_at",
        )
        .bind(org_id)
        .bind(topic)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_topics(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT topic FROM prompts ORDER BY topic")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn insert_brand(&self, brand: &Brand) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO brands (id, org_id, name, aliases, domains) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(brand.id)
        .bind(brand.org_id)
        .bind(&brand.name)
        .bind(&brand.aliases)
        .bind(&brand.domains)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_competitor(&self, competitor: &Competitor) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO competitors (id, brand_id, name, aliases, domains)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(competitor.id)
        .bind(competitor.brand_id)
        .bind(&competitor.name)
        .bind(&competitor.aliases)
        .bind(&competitor.domains)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_brands(&self) -> StoreResult<Vec<Brand>> {
        Ok(sqlx::query_as("SELECT * FROM brands ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn owner_brand(&self, org_id: Uuid) -> StoreResult<Option<Brand>> {
        Ok(
            sqlx::query_as("SELECT * FROM brands WHERE org_id = $1 ORDER BY created_at LIMIT 1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_competitors(&self, brand_id: Uuid) -> StoreResult<Vec<Competitor>> {
        Ok(
            sqlx::query_as("SELECT * FROM competitors WHERE brand_id = $1 ORDER BY created_at")
                .bind(brand_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_run(&self, run: &ProviderRun) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO provider_runs
                (id, prompt_id, provider, model, status, started_at, finished_at,
                 tokens_in, tokens_out, cost_usd)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(run.id)
        .bind(run.prompt_id)
        .bind(run.provider.as_str())
        .bind(&run.model)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.tokens_in)
        .bind(run.tokens_out)
        .bind(run.cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, finished_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE provider_runs SET status = 'failed', finished_at = $2
             WHERE id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit_run(&self, commit: RunCommit) -> StoreResult<ProviderRun> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<ProviderRun> = sqlx::query_as(
            "UPDATE provider_runs
             SET status = 'succeeded', model = $2, finished_at = $3,
                 tokens_in = $4, tokens_out = $5, cost_usd = $6
             WHERE id = $1 AND status = 'running'
             RETURNING *",
        )
        .bind(commit.run_id)
        .bind(&commit.completion.model)
        .bind(commit.completion.finished_at)
        .bind(commit.completion.tokens_in)
        .bind(commit.completion.tokens_out)
        .bind(commit.completion.cost_usd)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(run) = updated else {
            tx.rollback().await?;
            return Err(SightlineError::Invalid(format!(
                "run {} is missing or not running",
                commit.run_id
            )));
        };

        let answer = &commit.answer;
        sqlx::query(
            "INSERT INTO answers (id, run_id, text, language, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(answer.id)
        .bind(answer.run_id)
        .bind(&answer.text)
        .bind(&answer.language)
        .bind(answer.created_at)
        .execute(&mut *tx)
        .await?;

        for c in &commit.citations {
            sqlx::query(
                "INSERT INTO citations (id, answer_id, url, domain, title, snippet, rank_hint)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(c.id)
            .bind(c.answer_id)
            .bind(&c.url)
            .bind(&c.domain)
            .bind(&c.title)
            .bind(&c.snippet)
            .bind(c.rank_hint)
            .execute(&mut *tx)
            .await?;
        }

        for m in &commit.mentions {
            sqlx::query(
                "INSERT INTO mentions
                    (id, answer_id, brand_id, competitor_id, confidence, span_start, span_end)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(m.id)
            .bind(m.answer_id)
            .bind(m.brand_id)
            .bind(m.competitor_id)
            .bind(m.confidence)
            .bind(m.span_start)
            .bind(m.span_end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<RunRecord>> {
        let run: Option<ProviderRun> = sqlx::query_as("SELECT * FROM provider_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        match run {
            Some(run) => Ok(self.attach_answers(vec![run]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_runs(&self, query: &RunQuery) -> StoreResult<Vec<RunRecord>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT r.* FROM provider_runs r JOIN prompts p ON p.id = r.prompt_id WHERE TRUE",
        );
        if let Some(org) = query.org_id {
            qb.push(" AND p.org_id = ").push_bind(org);
        }
        if let Some(topic) = &query.topic {
            qb.push(" AND p.topic = ").push_bind(topic.clone());
        }
        if let Some(ids) = &query.prompt_ids {
            qb.push(" AND r.prompt_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(provider) = query.provider {
            qb.push(" AND r.provider = ").push_bind(provider.as_str());
        }
        if let Some(status) = query.status {
            qb.push(" AND r.status = ").push_bind(status.as_str());
        }
        if let Some(since) = query.finished_since {
            qb.push(" AND r.finished_at >= ").push_bind(since);
        }
        if let Some(until) = query.finished_until {
            qb.push(" AND r.finished_at <= ").push_bind(until);
        }
        qb.push(" ORDER BY r.finished_at DESC NULLS LAST, r.started_at DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit.max(0));
        }

        let runs: Vec<ProviderRun> = qb.build_query_as().fetch_all(&self.pool).await?;
        self.attach_answers(runs).await
    }

    async fn append_visibility_snapshot(&self, s: &VisibilitySnapshot) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO visibility_snapshots
                (id, brand_id, topic, provider, date, visibility_pct, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(s.id)
        .bind(s.brand_id)
        .bind(&s.topic)
        .bind(s.provider.as_str())
        .bind(s.date)
        .bind(s.visibility_pct)
        .bind(s.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_visibility_snapshots(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<VisibilitySnapshot>> {
        Ok(sqlx::query_as(
            "SELECT * FROM visibility_snapshots
             WHERE brand_id = $1 AND ($2::text IS NULL OR provider = $2)
             ORDER BY date, created_at",
        )
        .bind(brand_id)
        .bind(provider.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_ranking_snapshot(&self, s: &BrandRankingSnapshot) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO brand_ranking_snapshots
                (id, brand_id, topic, provider, date, visibility_pct, rank, prev_rank, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(s.id)
        .bind(s.brand_id)
        .bind(&s.topic)
        .bind(s.provider.as_str())
        .bind(s.date)
        .bind(s.visibility_pct)
        .bind(s.rank)
        .bind(s.prev_rank)
        .bind(s.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_ranking_snapshots(
        &self,
        topic: &str,
        provider: ProviderId,
        date: NaiveDate,
    ) -> StoreResult<Vec<BrandRankingSnapshot>> {
        Ok(sqlx::query_as(
            "SELECT * FROM brand_ranking_snapshots
             WHERE topic = $1 AND provider = $2 AND date = $3
             ORDER BY created_at",
        )
        .bind(topic)
        .bind(provider.as_str())
        .bind(date)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn recent_rankings(
        &self,
        provider: ProviderId,
        topic: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<BrandRankingSnapshot>> {
        Ok(sqlx::query_as(
            "SELECT * FROM brand_ranking_snapshots
             WHERE provider = $1 AND ($2::text IS NULL OR topic = $2)
             ORDER BY date DESC, rank ASC, created_at DESC
             LIMIT $3",
        )
        .bind(provider.as_str())
        .bind(topic)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_source_agg(&self, agg: &SourceAgg) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO source_aggs
                (id, brand_id, provider, domain, citations, window_start, window_end)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(agg.id)
        .bind(agg.brand_id)
        .bind(agg.provider.as_str())
        .bind(&agg.domain)
        .bind(agg.citations)
        .bind(agg.window_start)
        .bind(agg.window_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_source_aggs(
        &self,
        brand_id: Uuid,
        provider: Option<ProviderId>,
    ) -> StoreResult<Vec<SourceAgg>> {
        Ok(sqlx::query_as(
            "SELECT * FROM source_aggs
             WHERE brand_id = $1 AND ($2::text IS NULL OR provider = $2)
             ORDER BY window_end DESC, citations DESC",
        )
        .bind(brand_id)
        .bind(provider.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?)
    }
}
