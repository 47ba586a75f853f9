use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{JoinPolicy, NewBrand, NewCompetitor, NewPrompt, ProviderId, RunFilter};

pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Requests accepted over the Unix socket. HTTP handlers build the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SightlineRequest {
    Ping,
    Health,
    RunPrompt {
        prompt_id: Uuid,
        provider: String,
    },
    RunAll {
        prompt_id: Uuid,
        #[serde(default)]
        providers: Option<Vec<ProviderId>>,
        #[serde(default)]
        policy: JoinPolicy,
    },
    RecomputeVisibility {
        #[serde(default)]
        as_of: Option<DateTime<Utc>>,
    },
    RecomputeRankings {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    RecomputeSources {
        #[serde(default)]
        window_days: Option<i64>,
    },
    PromptInsights {
        org_id: Uuid,
        #[serde(default)]
        filter: RunFilter,
    },
    LatestAnswers {
        prompt_id: Uuid,
    },
    SourceShares {
        brand_id: Uuid,
        #[serde(default)]
        provider: Option<ProviderId>,
    },
    Rankings {
        provider: ProviderId,
        #[serde(default)]
        topic: Option<String>,
    },
    VisibilityTrend {
        brand_id: Uuid,
        #[serde(default)]
        provider: Option<ProviderId>,
        #[serde(default)]
        days: Option<i64>,
    },
    CreatePrompt {
        prompt: NewPrompt,
    },
    DeletePrompt {
        prompt_id: Uuid,
    },
    CreateBrand {
        brand: NewBrand,
    },
    CreateCompetitor {
        brand_id: Uuid,
        competitor: NewCompetitor,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SightlineResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable error category (`prompt_not_found`, `run_failed`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub version: String,
}

impl SightlineResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err_with_code(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::err(msg)
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let raw = r#"{"action":"run_all","prompt_id":"6f1c2f57-2b43-4c4f-9a0e-3c1f5b8d2e11","policy":"first_success"}"#;
        let req: SightlineRequest = serde_json::from_str(raw).unwrap();
        match req {
            SightlineRequest::RunAll {
                providers, policy, ..
            } => {
                assert!(providers.is_none());
                assert_eq!(policy, JoinPolicy::FirstSuccess);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_recompute_defaults() {
        let req: SightlineRequest =
            serde_json::from_str(r#"{"action":"recompute_rankings"}"#).unwrap();
        assert!(matches!(req, SightlineRequest::RecomputeRankings { date: None }));
    }

    #[test]
    fn test_error_response_carries_code() {
        let resp = SightlineResponse::err_with_code("prompt_not_found", "Prompt not found");
        assert!(!resp.is_ok());
        assert_eq!(resp.code.as_deref(), Some("prompt_not_found"));

        let json = serde_json::to_value(SightlineResponse::pong()).unwrap();
        assert!(json.get("code").is_none());
    }
}
