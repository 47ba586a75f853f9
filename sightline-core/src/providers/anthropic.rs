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

pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

const SYSTEM_WITH_TOOLS: &str = "Use web search to ground your answer. Append a 'Sources:' \
section containing at least 5 unique, diverse raw https URLs (no markdown, one per line).";
const SYSTEM_WITHOUT_TOOLS: &str = "Answer comprehensively. Append a 'Sources:' section with \
at least 5 raw https URLs (no markdown, one per line).";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'static str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: Client,
    settings: AdapterSettings,
    model: String,
    base_url: String,
}

impl AnthropicAdapter {
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
            AdapterSettings::from_env(ProviderId::Anthropic, ANTHROPIC_API_KEY_VAR, None, config)?;
        let base_url = config
            .anthropic_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(settings, config.anthropic_model.clone(), base_url)
    }
}

fn text_blocks(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
}

/// Citations attached to text blocks, falling back to message-level lists.
fn message_citations(body: &Value) -> Vec<Value> {
    let inline: Vec<Value> = text_blocks(body)
        .filter_map(|block| block.get("citations").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect();
    if !inline.is_empty() {
        return inline;
    }

    body.get("citations")
        .or_else(|| body.pointer("/metadata/citations"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn run(&self, prompt: &str, mode: ToolMode) -> Result<ProviderOutput, ProviderError> {
        let (system, tools) = match mode {
            ToolMode::WithTools => (
                SYSTEM_WITH_TOOLS,
                vec![Tool {
                    kind: "web_search_20250305",
                    name: "web_search",
                }],
            ),
            ToolMode::WithoutTools => (SYSTEM_WITHOUT_TOOLS, Vec::new()),
        };
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.settings.max_output_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            tools,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderId::Anthropic, response).await);
        }

        let body: Value = response.json().await?;
        let text = text_blocks(&body)
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ProviderOutput {
            text,
            tokens_in: token_count(body.pointer("/usage/input_tokens")),
            tokens_out: token_count(body.pointer("/usage/output_tokens")),
            raw_citations: message_citations(&body),
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> AnthropicAdapter {
        let settings = AdapterSettings {
            api_key: "sk-ant-test".to_string(),
            max_output_tokens: 1024,
            timeout: Duration::from_secs(5),
        };
        AnthropicAdapter::with_base_url(settings, "claude-3-5-sonnet-latest".into(), server.uri())
            .expect("Failed to create adapter")
    }

    #[tokio::test]
    async fn test_run_joins_text_blocks_and_collects_citations() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-3-5-sonnet-20241022",
                "content": [
                    { "type": "server_tool_use", "name": "web_search" },
                    { "type": "text", "text": "Acme leads.", "citations": [
                        { "type": "web_search_result_location", "url": "https://acme.com", "title": "Acme" }
                    ]},
                    { "type": "text", "text": "Sources: https://contoso.com" }
                ],
                "usage": { "input_tokens": 900, "output_tokens": 80 }
            })))
            .mount(&server)
            .await;

        let out = adapter(&server).run("q", ToolMode::WithTools).await.unwrap();

        assert_eq!(out.text, "Acme leads.\nSources: https://contoso.com");
        assert_eq!(out.raw_citations.len(), 1);
        assert_eq!(out.tokens_in, Some(900));
        assert_eq!(out.model, "claude-3-5-sonnet-20241022");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["tools"][0]["name"], "web_search");
        assert_eq!(sent["system"], SYSTEM_WITH_TOOLS);
    }

    #[tokio::test]
    async fn test_without_tools_uses_plain_system_prompt() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": "ok" }]
            })))
            .mount(&server)
            .await;

        let out = adapter(&server).run("q", ToolMode::WithoutTools).await.unwrap();
        assert_eq!(out.text, "ok");
        assert!(out.raw_citations.is_empty());

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(sent.get("tools").is_none());
        assert_eq!(sent["system"], SYSTEM_WITHOUT_TOOLS);
    }

    #[tokio::test]
    async fn test_invalid_request_is_capability() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": { "type": "invalid_request_error", "message": "tools not enabled" }
            })))
            .mount(&server)
            .await;

        let err = adapter(&server).run("q", ToolMode::WithTools).await.unwrap_err();
        assert!(err.is_capability());
        assert!(err.to_string().contains("tools not enabled"));
    }

    #[tokio::test]
    async fn test_overloaded_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529))
            .mount(&server)
            .await;

        let err = adapter(&server).run("q", ToolMode::WithTools).await.unwrap_err();
        assert!(err.is_transient());
    }
}
