use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{
    api_error, http_client, token_count, AdapterSettings, ProviderAdapter, ProviderError,
    ProviderOutput, ToolMode,
};
use crate::config::ProvidersConfig;
use crate::models::ProviderId;

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const INPUT_TEMPLATE: &str = "Answer concisely in 5-7 bullet points. Use web search to ground \
your answer. After the bullets, output exactly 5 raw https URLs under a 'Sources:' heading \
(one per line, no markdown).";

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// OpenAI Responses API client.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: Client,
    settings: AdapterSettings,
    model: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(settings: AdapterSettings, model: String) -> Result<Self, ProviderError> {
        Self::with_base_url(settings, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        settings: AdapterSettings,
        model: String,
        base_url: String,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            settings,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let settings =
            AdapterSettings::from_env(ProviderId::OpenAi, OPENAI_API_KEY_VAR, None, config)?;
        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(settings, config.openai_model.clone(), base_url)
    }
}

/// Output text: the convenience `output_text` field when present, else the
/// concatenated `output_text` parts of every message item.
fn response_text(body: &Value) -> String {
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }
    output_parts(body)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

fn output_parts(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
}

/// URL annotations on output parts, or the legacy top-level citation lists.
fn response_citations(body: &Value) -> Vec<Value> {
    let annotations: Vec<Value> = output_parts(body)
        .filter_map(|part| part.get("annotations").and_then(Value::as_array))
        .flatten()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some("url_citation"))
        .cloned()
        .collect();
    if !annotations.is_empty() {
        return annotations;
    }

    body.pointer("/web_search/results")
        .or_else(|| body.get("citations"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn run(&self, prompt: &str, mode: ToolMode) -> Result<ProviderOutput, ProviderError> {
        let tools = match mode {
            ToolMode::WithTools => vec![Tool {
                kind: "web_search_preview",
            }],
            ToolMode::WithoutTools => Vec::new(),
        };
        let request = ResponsesRequest {
            model: &self.model,
            input: format!("{INPUT_TEMPLATE}\n\nQuestion: {prompt}"),
            tools,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderId::OpenAi, response).await);
        }

        let body: Value = response.json().await?;
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();

        Ok(ProviderOutput {
            text: response_text(&body),
            tokens_in: token_count(body.pointer("/usage/input_tokens")),
            tokens_out: token_count(body.pointer("/usage/output_tokens")),
            raw_citations: response_citations(&body),
            model,
        })
    }
}
