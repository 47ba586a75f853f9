//! Run Orchestrator — executes a prompt against one provider or fans out to many
//!
//! A run row is written as `running` before the provider call so callers can see
//! in-flight work. Everything produced by a successful call (status flip, answer,
//! citations, mentions) lands in a single `Store::commit_run`; any failure after
//! the placeholder is written marks the run `failed`.
//!
//! Call policy per provider:
//! - tool-augmented call, one delayed retry on transient errors
//! - capability errors skip straight to the tools-less call
//! - a retried call that still fails transiently falls back to tools-less once
//! - not-configured and permanent errors propagate untouched

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use uuid::Uuid;

use sightline_core::citations::{normalize_citations, top_up};
use sightline_core::models::{
    Answer, Brand, Citation, Competitor, JoinPolicy, Mention, Prompt, ProviderId, ProviderRun,
    RunCompletion, RunStatus,
};
use sightline_core::providers::pricing::estimate_cost_usd;
use sightline_core::{
    Clock, EntityMatcher, MentionSpan, ProviderAdapter, ProviderError, ProviderOutput,
    ProviderRegistry, RunCommit, SightlineConfig, SightlineError, Store, ToolMode,
};

// ============================================================================
// PUBLIC API
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry_delay: Duration,
    pub citation_topup_threshold: usize,
    pub text_citation_limit: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SightlineConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(config.providers.retry_delay_ms),
            citation_topup_threshold: config.analysis.citation_topup_threshold,
            text_citation_limit: config.analysis.text_citation_limit,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SightlineConfig::in_memory())
    }
}

/// What a successful run persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run: ProviderRun,
    pub answer: Answer,
    pub citations: Vec<Citation>,
    pub mentions: Vec<Mention>,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Prompt not found: {0}")]
    PromptNotFound(Uuid),

    #[error("Unsupported provider: {0}")]
    ProviderUnsupported(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(ProviderId),

    #[error("{provider} run failed: {source}")]
    RunFailed {
        provider: ProviderId,
        #[source]
        source: ProviderError,
    },

    #[error("{provider} run could not be saved: {source}")]
    Persist {
        provider: ProviderId,
        #[source]
        source: SightlineError,
    },

    #[error("{provider} task failed: {message}")]
    TaskFailed { provider: ProviderId, message: String },

    #[error(transparent)]
    Store(#[from] SightlineError),
}

impl RunError {
    /// Stable machine-readable code carried on IPC/HTTP error responses.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::PromptNotFound(_) => "prompt_not_found",
            RunError::ProviderUnsupported(_) => "provider_unsupported",
            RunError::ProviderNotConfigured(_) => "provider_not_configured",
            RunError::RunFailed { .. } | RunError::Persist { .. } | RunError::TaskFailed { .. } => {
                "run_failed"
            }
            RunError::Store(_) => "store_error",
        }
    }
}

/// One provider's result inside a batch.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: ProviderId,
    pub result: Result<RunOutcome, RunError>,
}

/// Result of `run_all`. Providers still in flight when a `FirstSuccess` batch
/// returned are listed in `pending`; their runs finish in the background.
#[derive(Debug)]
pub struct BatchReport {
    pub policy: JoinPolicy,
    pub completed: Vec<ProviderOutcome>,
    pub pending: Vec<ProviderId>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.completed.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn outcome(&self, provider: ProviderId) -> Option<&Result<RunOutcome, RunError>> {
        self.completed
            .iter()
            .find(|o| o.provider == provider)
            .map(|o| &o.result)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let results: Vec<serde_json::Value> = self
            .completed
            .iter()
            .map(|o| match &o.result {
                Ok(outcome) => serde_json::json!({
                    "provider": o.provider,
                    "status": "succeeded",
                    "outcome": outcome,
                }),
                Err(e) => serde_json::json!({
                    "provider": o.provider,
                    "status": "failed",
                    "code": e.code(),
                    "error": e.to_string(),
                }),
            })
            .collect();

        serde_json::json!({
            "policy": self.policy,
            "succeeded": self.succeeded(),
            "results": results,
            "pending": self.pending,
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    registry: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    matchers: Arc<Mutex<HashMap<Uuid, Arc<EntityMatcher>>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            settings,
            matchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runs one prompt against one provider and persists the outcome.
    pub async fn run_prompt(&self, prompt_id: Uuid, provider: &str) -> Result<RunOutcome, RunError> {
        let prompt = self
            .store
            .get_prompt(prompt_id)
            .await?
            .ok_or(RunError::PromptNotFound(prompt_id))?;
        let provider: ProviderId = provider
            .parse()
            .map_err(|e: sightline_core::models::UnknownProvider| RunError::ProviderUnsupported(e.0))?;
        let adapter = self
            .registry
            .get(provider)
            .ok_or(RunError::ProviderNotConfigured(provider))?;

        self.execute(prompt, adapter).await
    }

    /// Runs one prompt against several providers concurrently, one task each.
    ///
    /// `providers = None` means every configured provider. Requested providers
    /// without an adapter are reported as `ProviderNotConfigured` without a task.
    pub async fn run_all(
        &self,
        prompt_id: Uuid,
        providers: Option<&[ProviderId]>,
        policy: JoinPolicy,
    ) -> Result<BatchReport, RunError> {
        let prompt = self
            .store
            .get_prompt(prompt_id)
            .await?
            .ok_or(RunError::PromptNotFound(prompt_id))?;

        let mut targets: Vec<ProviderId> = match providers {
            Some(list) => list.to_vec(),
            None => self.registry.configured(),
        };
        let mut seen = Vec::with_capacity(targets.len());
        targets.retain(|p| {
            if seen.contains(p) {
                false
            } else {
                seen.push(*p);
                true
            }
        });

        let mut completed = Vec::new();
        let mut pending = Vec::new();
        let mut tasks = FuturesUnordered::new();

        for provider in targets {
            let Some(adapter) = self.registry.get(provider) else {
                completed.push(ProviderOutcome {
                    provider,
                    result: Err(RunError::ProviderNotConfigured(provider)),
                });
                continue;
            };
            let orchestrator = self.clone();
            let prompt = prompt.clone();
            let handle = tokio::spawn(async move { orchestrator.execute(prompt, adapter).await });
            pending.push(provider);
            tasks.push(async move { (provider, handle.await) });
        }

        tracing::info!(
            prompt_id = %prompt_id,
            providers = ?pending,
            policy = ?policy,
            "Fan-out started"
        );

        while let Some((provider, joined)) = tasks.next().await {
            pending.retain(|p| *p != provider);
            let result = joined.unwrap_or_else(|e| {
                Err(RunError::TaskFailed {
                    provider,
                    message: e.to_string(),
                })
            });
            let succeeded = result.is_ok();
            completed.push(ProviderOutcome { provider, result });

            if succeeded && policy == JoinPolicy::FirstSuccess {
                break;
            }
        }

        if !pending.is_empty() {
            tracing::info!(prompt_id = %prompt_id, detached = ?pending, "Returning before all providers settled");
        }

        Ok(BatchReport {
            policy,
            completed,
            pending,
        })
    }

    async fn execute(
        &self,
        prompt: Prompt,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<RunOutcome, RunError> {
        let provider = adapter.provider();
        let run = ProviderRun {
            id: Uuid::new_v4(),
            prompt_id: prompt.id,
            provider,
            model: adapter.model().to_string(),
            status: RunStatus::Running,
            started_at: self.clock.now(),
            finished_at: None,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
        };
        self.store.insert_run(&run).await?;
        tracing::info!(run_id = %run.id, prompt_id = %prompt.id, provider = %provider, "Run started");

        let output = match call_with_policy(adapter.as_ref(), &prompt.text, self.settings.retry_delay).await {
            Ok(output) => output,
            Err(source) => {
                tracing::warn!(run_id = %run.id, provider = %provider, error = %source, "Provider call failed");
                self.mark_failed(run.id).await;
                return Err(RunError::RunFailed { provider, source });
            }
        };

        match self.persist(&prompt, &run, output).await {
            Ok(outcome) => {
                tracing::info!(
                    run_id = %run.id,
                    provider = %provider,
                    citations = outcome.citations.len(),
                    mentions = outcome.mentions.len(),
                    "Run succeeded"
                );
                Ok(outcome)
            }
            Err(source) => {
                tracing::error!(run_id = %run.id, provider = %provider, error = %source, "Run commit failed");
                self.mark_failed(run.id).await;
                Err(RunError::Persist { provider, source })
            }
        }
    }

    async fn persist(
        &self,
        prompt: &Prompt,
        run: &ProviderRun,
        output: ProviderOutput,
    ) -> Result<RunOutcome, SightlineError> {
        let finished_at = self.clock.now();
        let answer = Answer {
            id: Uuid::new_v4(),
            run_id: run.id,
            text: output.text,
            language: prompt.locale.clone(),
            created_at: finished_at,
        };

        let native = normalize_citations(&output.raw_citations, run.provider);
        let citations: Vec<Citation> = top_up(
            native,
            &answer.text,
            self.settings.citation_topup_threshold,
            self.settings.text_citation_limit,
        )
        .into_iter()
        .map(|c| Citation {
            id: Uuid::new_v4(),
            answer_id: answer.id,
            url: c.url,
            domain: c.domain,
            title: c.title,
            snippet: c.snippet,
            rank_hint: c.rank_hint,
        })
        .collect();

        let mentions = self.detect_mentions(prompt.org_id, &answer).await?;

        let model = if output.model.is_empty() {
            run.model.clone()
        } else {
            output.model
        };
        let completion = RunCompletion {
            model,
            finished_at,
            tokens_in: output.tokens_in,
            tokens_out: output.tokens_out,
            cost_usd: estimate_cost_usd(run.provider, output.tokens_in, output.tokens_out),
        };

        let committed = self
            .store
            .commit_run(RunCommit {
                run_id: run.id,
                completion,
                answer: answer.clone(),
                citations: citations.clone(),
                mentions: mentions.clone(),
            })
            .await?;

        Ok(RunOutcome {
            run: committed,
            answer,
            citations,
            mentions,
        })
    }

    /// Mentions of the org's brand and each of its competitors.
    async fn detect_mentions(&self, org_id: Uuid, answer: &Answer) -> Result<Vec<Mention>, SightlineError> {
        let Some(brand) = self.store.owner_brand(org_id).await? else {
            tracing::debug!(org_id = %org_id, "No brand for org, skipping mention detection");
            return Ok(Vec::new());
        };
        let competitors = self.store.list_competitors(brand.id).await?;

        let mut mentions = Vec::new();
        for span in self.brand_matcher(&brand).find(&answer.text) {
            mentions.push(to_mention(answer.id, brand.id, None, &span));
        }
        for competitor in &competitors {
            for span in self.competitor_matcher(competitor).find(&answer.text) {
                mentions.push(to_mention(answer.id, brand.id, Some(competitor.id), &span));
            }
        }
        Ok(mentions)
    }

    fn brand_matcher(&self, brand: &Brand) -> Arc<EntityMatcher> {
        self.cached_matcher(brand.id, || EntityMatcher::new(brand))
    }

    fn competitor_matcher(&self, competitor: &Competitor) -> Arc<EntityMatcher> {
        self.cached_matcher(competitor.id, || EntityMatcher::new(competitor))
    }

    fn cached_matcher(&self, id: Uuid, build: impl FnOnce() -> EntityMatcher) -> Arc<EntityMatcher> {
        let mut cache = self.matchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.entry(id).or_insert_with(|| Arc::new(build())).clone()
    }

    async fn mark_failed(&self, run_id: Uuid) {
        if let Err(e) = self.store.fail_run(run_id, self.clock.now()).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to mark run as failed");
        }
    }
}

/// Calls `adapter` following the retry and fallback policy described at the top
/// of this module.
pub async fn call_with_policy(
    adapter: &dyn ProviderAdapter,
    prompt: &str,
    retry_delay: Duration,
) -> Result<ProviderOutput, ProviderError> {
    let provider = adapter.provider();
    let with_tools = RetryIf::spawn(
        FixedInterval::new(retry_delay).take(1),
        || adapter.run(prompt, ToolMode::WithTools),
        |e: &ProviderError| {
            let retry = e.is_transient();
            if retry {
                tracing::warn!(provider = %provider, error = %e, "Transient provider error, retrying");
            }
            retry
        },
    )
    .await;

    match with_tools {
        Ok(output) => Ok(output),
        Err(e) if e.is_capability() || e.is_transient() => {
            tracing::warn!(provider = %provider, error = %e, "Falling back to call without tools");
            adapter.run(prompt, ToolMode::WithoutTools).await
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

fn to_mention(answer_id: Uuid, brand_id: Uuid, competitor_id: Option<Uuid>, span: &MentionSpan) -> Mention {
    Mention {
        id: Uuid::new_v4(),
        answer_id,
        brand_id,
        competitor_id,
        confidence: span.confidence,
        span_start: i32::try_from(span.start).unwrap_or(i32::MAX),
        span_end: i32::try_from(span.end).unwrap_or(i32::MAX),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
