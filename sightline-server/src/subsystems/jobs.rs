//! Aggregation job runner
//!
//! Every aggregation appends rather than upserts, so two jobs running at once
//! would double-count. `JobRunner` holds one async mutex around all of them and
//! is shared by the scheduled loop and manual triggers.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{broadcast, Mutex};

use sightline_core::config::{AggregationConfig, JobsConfig};
use sightline_core::{Clock, Store};

use super::rankings::{recompute_daily_rankings, RankingReport};
use super::sources::{recompute_source_aggregates, SourceReport};
use super::visibility::{recompute_visibility_snapshots, VisibilityReport};

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn Store>,
    config: AggregationConfig,
    clock: Arc<dyn Clock>,
    lock: Arc<Mutex<()>>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn Store>, config: AggregationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Visibility snapshots as of `as_of`, or now.
    pub async fn recompute_visibility(&self, as_of: Option<DateTime<Utc>>) -> Result<VisibilityReport> {
        let _guard = self.lock.lock().await;
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        recompute_visibility_snapshots(self.store.as_ref(), &self.config, as_of).await
    }

    /// Rankings for `date`, or today.
    pub async fn recompute_rankings(&self, date: Option<NaiveDate>) -> Result<RankingReport> {
        let _guard = self.lock.lock().await;
        let now = self.clock.now();
        let date = date.unwrap_or_else(|| now.date_naive());
        recompute_daily_rankings(self.store.as_ref(), &self.config, date, now).await
    }

    /// Source aggregates over `window_days`, or the configured default window.
    pub async fn recompute_sources(&self, window_days: Option<i64>) -> Result<SourceReport> {
        let _guard = self.lock.lock().await;
        let window_days = window_days.unwrap_or(self.config.source_window_days);
        recompute_source_aggregates(self.store.as_ref(), window_days, self.clock.now()).await
    }

    /// One scheduled pass: visibility, then rankings, then sources.
    pub async fn run_cycle(&self) -> Result<()> {
        let visibility = self.recompute_visibility(None).await?;
        let rankings = self.recompute_rankings(None).await?;
        let sources = self.recompute_sources(None).await?;
        tracing::info!(
            snapshots = visibility.updated,
            rankings = rankings.written,
            sources = sources.written,
            "Recompute cycle complete"
        );
        Ok(())
    }
}

/// Runs `JobRunner::run_cycle` every `interval_minutes` until shutdown.
pub async fn run_recompute_loop(
    runner: JobRunner,
    config: JobsConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Recompute loop started (interval: {}min)",
        config.interval_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = runner.run_cycle().await {
                    tracing::error!("Recompute cycle error: {}", e);
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Recompute loop shutting down");
                break;
            }
        }
    }
}
