//! Source aggregation — which domains each provider cites for a brand's org
//! over a trailing window.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use sightline_core::models::{Brand, ProviderId, SourceAgg};
use sightline_core::sources::count_domains;
use sightline_core::{RunQuery, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub written: usize,
    pub failed: usize,
}

/// Appends one `SourceAgg` per cited domain for each brand and provider, counting
/// citations of succeeded runs finished within `[as_of - window_days, as_of]`.
pub async fn recompute_source_aggregates(
    store: &dyn Store,
    window_days: i64,
    as_of: DateTime<Utc>,
) -> Result<SourceReport> {
    let window_start = as_of - Duration::days(window_days.max(0));
    let brands = store.list_brands().await?;
    let mut report = SourceReport::default();

    for brand in &brands {
        for provider in ProviderId::ALL {
            match aggregate_for(store, brand, provider, window_start, as_of).await {
                Ok(written) => report.written += written,
                Err(e) => {
                    tracing::warn!(
                        brand_id = %brand.id,
                        provider = %provider,
                        error = %e,
                        "Source aggregation failed"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    tracing::info!(
        window_days,
        written = report.written,
        failed = report.failed,
        "Source aggregation complete"
    );
    Ok(report)
}

async fn aggregate_for(
    store: &dyn Store,
    brand: &Brand,
    provider: ProviderId,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<usize> {
    let query = RunQuery::succeeded()
        .org(brand.org_id)
        .provider(provider)
        .finished_between(Some(window_start), Some(window_end));
    let records = store.list_runs(&query).await?;

    let counts = count_domains(
        records
            .iter()
            .filter_map(|r| r.answer.as_ref())
            .flat_map(|a| a.citations.iter().map(|c| c.domain.as_str())),
    );

    let mut written = 0;
    for (domain, citations) in counts {
        store
            .append_source_agg(&SourceAgg {
                id: Uuid::new_v4(),
                brand_id: brand.id,
                provider,
                domain,
                citations: i32::try_from(citations).unwrap_or(i32::MAX),
                window_start,
                window_end,
            })
            .await?;
        written += 1;
    }
    Ok(written)
}
