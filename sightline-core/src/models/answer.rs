use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::ProviderRun;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub run_id: Uuid,
    pub text: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Citation {
    pub id: Uuid,
    pub answer_id: Uuid,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub rank_hint: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mention {
    pub id: Uuid,
    pub answer_id: Uuid,
    pub brand_id: Uuid,
    /// Set when the occurrence is of one of the brand's competitors.
    pub competitor_id: Option<Uuid>,
    pub confidence: f64,
    pub span_start: i32,
    pub span_end: i32,
}

impl Mention {
    pub fn is_brand_mention(&self, brand_id: Uuid) -> bool {
        self.brand_id == brand_id && self.competitor_id.is_none()
    }
}

/// An answer with everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerBundle {
    pub answer: Answer,
    pub citations: Vec<Citation>,
    pub mentions: Vec<Mention>,
}

/// A run joined with its answer, if it produced one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: ProviderRun,
    pub answer: Option<AnswerBundle>,
}

impl RunRecord {
    pub fn mentions_brand(&self, brand_id: Uuid) -> bool {
        self.answer
            .as_ref()
            .map(|a| a.mentions.iter().any(|m| m.is_brand_mention(brand_id)))
            .unwrap_or(false)
    }

    pub fn cites_any(&self, domains: &[String]) -> bool {
        self.answer
            .as_ref()
            .map(|a| {
                a.citations
                    .iter()
                    .any(|c| domains.iter().any(|d| d.trim().eq_ignore_ascii_case(&c.domain)))
            })
            .unwrap_or(false)
    }
}
