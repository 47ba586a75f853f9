use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use super::{
    api_error, http_client, token_count, AdapterSettings, ProviderAdapter, ProviderError,
    ProviderOutput, ToolMode,
};
use crate::config::ProvidersConfig;
use crate::models::ProviderId;

pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROMPT_TEMPLATE: &str = "Answer concisely in 5-7 bullet points. After the bullets, output \
exactly 5 raw https URLs under a 'Sources:' heading (one per line, no markdown).";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

/// Gemini `generateContent` client. Models are tried in order until one answers.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: Client,
    settings: AdapterSettings,
    models: Vec<String>,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(settings: AdapterSettings, models: Vec<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(settings, models, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        settings: AdapterSettings,
        models: Vec<String>,
        base_url: String,
    ) -> Result<Self, ProviderError> {
        if models.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "no Gemini models configured".to_string(),
            ));
        }
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
            models,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let settings =
            AdapterSettings::from_env(ProviderId::Gemini, GOOGLE_API_KEY_VAR, None, config)?;
        let base_url = config
            .gemini_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(settings, config.gemini_models.clone(), base_url)
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.settings.api_key
        );
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderId::Gemini, response).await);
        }
        Ok(response.json().await?)
    }
}

fn candidate_text(body: &Value) -> String {
    body.pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

/// Grounding sources from the top-level metadata or the first candidate carrying any.
fn grounding_citations(body: &Value) -> Vec<Value> {
    fn from_metadata(gm: &Value) -> Option<Vec<Value>> {
        gm.get("supportingContent")
            .or_else(|| gm.get("groundingChunks"))
            .and_then(Value::as_array)
            .cloned()
    }

    if let Some(found) = body.get("groundingMetadata").and_then(from_metadata) {
        return found;
    }
    body.get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("groundingMetadata").and_then(from_metadata))
        .next()
        .unwrap_or_default()
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or_default()
    }

    async fn run(&self, prompt: &str, mode: ToolMode) -> Result<ProviderOutput, ProviderError> {
        let tools = match mode {
            ToolMode::WithTools => vec![json!({ "google_search": {} })],
            ToolMode::WithoutTools => Vec::new(),
        };
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: format!("{PROMPT_TEMPLATE}\n\nQuestion: {prompt}"),
                }],
            }],
            tools,
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_output_tokens,
            },
        };

        let mut last_err = None;
        for model in &self.models {
            match self.generate(model, &request).await {
                Ok(body) => {
                    return Ok(ProviderOutput {
                        text: candidate_text(&body),
                        tokens_in: token_count(body.pointer("/usageMetadata/promptTokenCount")),
                        tokens_out: token_count(
                            body.pointer("/usageMetadata/candidatesTokenCount")
                                .or_else(|| body.pointer("/usageMetadata/totalTokenCount")),
                        ),
                        raw_citations: grounding_citations(&body),
                        model: model.clone(),
                    });
                }
                Err(e) => {
                    tracing::debug!(model = %model, error = %e, "Gemini model failed, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ProviderError::InvalidResponse("no Gemini models configured".to_string())
        }))
    }
}
