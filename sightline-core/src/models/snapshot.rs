use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::ProviderId;

/// Topic label written by the cross-topic visibility job.
pub const OVERALL_TOPIC: &str = "overall";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VisibilitySnapshot {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub topic: String,
    #[sqlx(try_from = "String")]
    pub provider: ProviderId,
    pub date: NaiveDate,
    pub visibility_pct: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BrandRankingSnapshot {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub topic: String,
    #[sqlx(try_from = "String")]
    pub provider: ProviderId,
    pub date: NaiveDate,
    pub visibility_pct: f64,
    pub rank: i32,
    pub prev_rank: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceAgg {
    pub id: Uuid,
    pub brand_id: Uuid,
    #[sqlx(try_from = "String")]
    pub provider: ProviderId,
    pub domain: String,
    pub citations: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}
