//! Shared fixtures: scripted provider adapters and seeded in-memory stores.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use sightline_core::models::{Brand, Competitor, NewBrand, NewCompetitor, NewPrompt, Prompt, ProviderId};
use sightline_core::{
    FixedClock, MemoryStore, ProviderAdapter, ProviderError, ProviderOutput, ProviderRegistry,
    SightlineConfig, Store, ToolMode,
};
use sightline_server::AppContext;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
}

/// Adapter returning canned answers. Once the queued replies run out it keeps
/// returning `default_text`.
pub struct ScriptedAdapter {
    provider: ProviderId,
    delay: Duration,
    queued: Mutex<VecDeque<Result<ProviderOutput, ProviderError>>>,
    default_text: String,
    citations: Vec<Value>,
    pub calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn answering(provider: ProviderId, text: &str) -> Self {
        Self {
            provider,
            delay: Duration::ZERO,
            queued: Mutex::new(VecDeque::new()),
            default_text: text.to_string(),
            citations: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_citations(mut self, citations: Vec<Value>) -> Self {
        self.citations = citations;
        self
    }

    pub fn then(self, reply: Result<ProviderOutput, ProviderError>) -> Self {
        self.queued.lock().unwrap().push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn run(&self, _prompt: &str, _mode: ToolMode) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reply) = self.queued.lock().unwrap().pop_front() {
            return reply;
        }
        Ok(ProviderOutput {
            text: self.default_text.clone(),
            tokens_in: Some(120),
            tokens_out: Some(480),
            raw_citations: self.citations.clone(),
            model: "scripted-model".to_string(),
        })
    }
}

pub struct TestApp {
    pub ctx: AppContext,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
}

pub fn app(adapters: Vec<Arc<ScriptedAdapter>>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(start_time()));
    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let mut config = SightlineConfig::in_memory();
    config.providers.retry_delay_ms = 1;

    let ctx = AppContext::new(store.clone(), registry, clock.clone(), config);
    TestApp { ctx, store, clock }
}

pub struct SeededOrg {
    pub org_id: Uuid,
    pub brand: Brand,
    pub competitors: Vec<Competitor>,
    pub prompts: Vec<Prompt>,
}

/// Creates an org with a brand, its competitors and prompts `(topic, text)`.
pub async fn seed_org(
    store: &dyn Store,
    brand: &str,
    domains: &[&str],
    competitors: &[&str],
    prompts: &[(&str, &str)],
) -> SeededOrg {
    let org_id = Uuid::new_v4();
    let brand = NewBrand {
        org_id,
        name: brand.to_string(),
        aliases: vec![],
        domains: domains.iter().map(|d| d.to_string()).collect(),
    }
    .into_brand()
    .unwrap();
    store.insert_brand(&brand).await.unwrap();

    let mut seeded_competitors = Vec::new();
    for name in competitors {
        let c = NewCompetitor {
            name: name.to_string(),
            aliases: vec![],
            domains: vec![],
        }
        .into_competitor(brand.id)
        .unwrap();
        store.insert_competitor(&c).await.unwrap();
        seeded_competitors.push(c);
    }

    let mut seeded_prompts = Vec::new();
    for (i, (topic, text)) in prompts.iter().enumerate() {
        let p = NewPrompt {
            org_id,
            text: text.to_string(),
            topic: topic.to_string(),
            locale: "en".to_string(),
        }
        .into_prompt(start_time() - chrono::Duration::minutes(i as i64));
        store.insert_prompt(&p).await.unwrap();
        seeded_prompts.push(p);
    }

    SeededOrg {
        org_id,
        brand,
        competitors: seeded_competitors,
        prompts: seeded_prompts,
    }
}
