use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SightlineError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prompt {
    pub id: Uuid,
    pub org_id: Uuid,
    pub text: String,
    pub topic: String,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrompt {
    pub org_id: Uuid,
    pub text: String,
    pub topic: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

impl NewPrompt {
    pub fn validate(&self) -> Result<(), SightlineError> {
        if self.text.trim().is_empty() {
            return Err(SightlineError::Invalid("prompt text must not be empty".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(SightlineError::Invalid("prompt topic must not be empty".into()));
        }
        Ok(())
    }

    pub fn into_prompt(self, created_at: DateTime<Utc>) -> Prompt {
        Prompt {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            text: self.text.trim().to_string(),
            topic: self.topic.trim().to_string(),
            locale: self.locale,
            created_at,
        }
    }
}

/// Narrows the runs a read model looks at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub topic: Option<String>,
    pub provider: Option<super::ProviderId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}
