use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct SightlineConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `postgres` (default) or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,
    pub url: String,
    pub max_connections: u32,
}

fn default_backend() -> String {
    "postgres".to_string()
}

/// Per-provider call settings. API keys are read from the environment only.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub openai_model: String,
    pub anthropic_model: String,
    pub gemini_models: Vec<String>,
    pub max_output_tokens: u32,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 500,
            timeout_seconds: 60,
            openai_model: "gpt-4.1-mini".to_string(),
            anthropic_model: "claude-3-5-sonnet-latest".to_string(),
            gemini_models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-2.0-flash".to_string(),
                "gemini-1.5-flash".to_string(),
            ],
            max_output_tokens: 1024,
            openai_base_url: None,
            anthropic_base_url: None,
            gemini_base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum unique citation domains before the text fallback stops topping up.
    pub citation_topup_threshold: usize,
    /// Maximum URLs taken from answer text by the fallback extractor.
    pub text_citation_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            citation_topup_threshold: 5,
            text_citation_limit: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    /// Multiplier applied when visibility came from a citation. Clamped to 1.0 per prompt.
    pub citation_weight: f64,
    /// Most recent runs considered per brand and provider.
    pub run_window: i64,
    pub source_window_days: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            citation_weight: 1.0,
            run_window: 200,
            source_window_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl SightlineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// In-memory configuration used by tests and `database.backend = "memory"` setups.
    pub fn in_memory() -> Self {
        Self {
            service: ServiceConfig {
                socket_path: "/tmp/sightline.sock".to_string(),
                log_level: "info".to_string(),
            },
            database: DatabaseConfig {
                backend: "memory".to_string(),
                url: String::new(),
                max_connections: 1,
            },
            providers: ProvidersConfig::default(),
            analysis: AnalysisConfig::default(),
            aggregation: AggregationConfig::default(),
            jobs: JobsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}
