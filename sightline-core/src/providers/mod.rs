//! LLM provider adapters
//!
//! Every provider sits behind the `ProviderAdapter` contract:
//! - **OpenAI** — Responses API with the web search preview tool
//! - **Anthropic** — Messages API with the server-side web search tool
//! - **Gemini** — `generateContent` with Google Search grounding, trying each
//!   configured model in turn
//!
//! Errors carry enough information for the caller to pick a retry policy:
//! transient (retry), capability (drop tools), or permanent (give up).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ProvidersConfig;
use crate::models::ProviderId;

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod pricing;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Instruction sent with every prompt so answers carry inline sources.
pub const ANSWER_INSTRUCTIONS: &str = "You are a helpful assistant. Answer the user's question \
directly. Cite the sources you relied on with full URLs, inline or in a short list at the end.";

// ============================================================================
// Contract
// ============================================================================

/// Whether the provider's search tool is attached to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    WithTools,
    WithoutTools,
}

/// Everything a successful provider call returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub text: String,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
    /// Provider-native citation objects, normalized later.
    pub raw_citations: Vec<Value>,
    pub model: String,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Model reported on the run row before the call completes.
    fn model(&self) -> &str;

    async fn run(&self, prompt: &str, mode: ToolMode) -> Result<ProviderOutput, ProviderError>;
}

// ============================================================================
// Error types
// ============================================================================

/// How the orchestrator should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConfigured,
    Transient,
    Capability,
    Permanent,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} is not configured: {env_var} is not set")]
    NotConfigured {
        provider: ProviderId,
        env_var: &'static str,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Capability not supported: {0}")]
    Capability(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotConfigured { .. } => ErrorKind::NotConfigured,
            ProviderError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorKind::Transient
                } else {
                    e.status()
                        .map(|s| classify_status(s.as_u16()))
                        .unwrap_or(ErrorKind::Permanent)
                }
            }
            ProviderError::Api { code, .. } => classify_status(*code),
            ProviderError::Capability(_) => ErrorKind::Capability,
            ProviderError::InvalidResponse(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_capability(&self) -> bool {
        self.kind() == ErrorKind::Capability
    }
}

/// 5xx, 408 and 429 are worth retrying; 400 and 422 usually mean the tool
/// configuration was rejected.
pub fn classify_status(code: u16) -> ErrorKind {
    match code {
        408 | 429 | 500..=599 => ErrorKind::Transient,
        400 | 422 => ErrorKind::Capability,
        _ => ErrorKind::Permanent,
    }
}

// ============================================================================
// Shared HTTP helpers
// ============================================================================

/// Settings common to every HTTP adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub api_key: String,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl AdapterSettings {
    /// Reads the API key from `env_var` when `api_key` is not given.
    pub fn from_env(
        provider: ProviderId,
        env_var: &'static str,
        api_key: Option<String>,
        config: &ProvidersConfig,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key
            .or_else(|| std::env::var(env_var).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::NotConfigured { provider, env_var })?;

        Ok(Self {
            api_key,
            max_output_tokens: config.max_output_tokens,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Turns a non-success response into `ProviderError::Api`, pulling the message out
/// of the usual `{"error": {"message": ...}}` envelope when present.
pub(crate) async fn api_error(provider: ProviderId, response: reqwest::Response) -> ProviderError {
    let code = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);

    tracing::warn!(provider = %provider, code, message = %message, "Provider API error");
    ProviderError::Api { code, message }
}

pub(crate) fn token_count(value: Option<&Value>) -> Option<i32> {
    value
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}

// ============================================================================
// Registry
// ============================================================================

/// Adapters available to the orchestrator, keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Configured providers in canonical order.
    pub fn configured(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    /// Builds every adapter whose API key is present in the environment.
    /// Providers without a key are logged and left out.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();

        match OpenAiAdapter::from_config(config) {
            Ok(a) => registry.register(Arc::new(a)),
            Err(e) => tracing::warn!(error = %e, "OpenAI adapter unavailable"),
        }
        match AnthropicAdapter::from_config(config) {
            Ok(a) => registry.register(Arc::new(a)),
            Err(e) => tracing::warn!(error = %e, "Anthropic adapter unavailable"),
        }
        match GeminiAdapter::from_config(config) {
            Ok(a) => registry.register(Arc::new(a)),
            Err(e) => tracing::warn!(error = %e, "Gemini adapter unavailable"),
        }

        tracing::info!(providers = ?registry.configured(), "Provider registry ready");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(503), ErrorKind::Transient);
        assert_eq!(classify_status(429), ErrorKind::Transient);
        assert_eq!(classify_status(400), ErrorKind::Capability);
        assert_eq!(classify_status(422), ErrorKind::Capability);
        assert_eq!(classify_status(401), ErrorKind::Permanent);
        assert_eq!(classify_status(404), ErrorKind::Permanent);
    }

    #[test]
    fn test_error_kind_helpers() {
        let transient = ProviderError::Api {
            code: 502,
            message: "bad gateway".into(),
        };
        assert!(transient.is_transient());
        assert!(!transient.is_capability());

        let capability = ProviderError::Capability("tools unsupported".into());
        assert!(capability.is_capability());

        let missing = ProviderError::NotConfigured {
            provider: ProviderId::OpenAi,
            env_var: "OPENAI_API_KEY",
        };
        assert_eq!(missing.kind(), ErrorKind::NotConfigured);
    }

    #[test]
    fn test_settings_prefer_explicit_key() {
        let settings = AdapterSettings::from_env(
            ProviderId::Gemini,
            "SIGHTLINE_TEST_UNSET_KEY",
            Some(" key ".into()),
            &ProvidersConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_missing_key() {
        let err = AdapterSettings::from_env(
            ProviderId::Anthropic,
            "SIGHTLINE_TEST_UNSET_KEY",
            None,
            &ProvidersConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
    }

    struct Stub(ProviderId);

    #[async_trait]
    impl ProviderAdapter for Stub {
        fn provider(&self) -> ProviderId {
            self.0
        }
        fn model(&self) -> &str {
            "stub"
        }
        async fn run(&self, _prompt: &str, _mode: ToolMode) -> Result<ProviderOutput, ProviderError> {
            Ok(ProviderOutput::default())
        }
    }

    #[test]
    fn test_registry_configured_in_canonical_order() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(Stub(ProviderId::Gemini)))
            .with(Arc::new(Stub(ProviderId::OpenAi)));

        assert_eq!(registry.configured(), vec![ProviderId::OpenAi, ProviderId::Gemini]);
        assert!(registry.get(ProviderId::Anthropic).is_none());
    }
}
