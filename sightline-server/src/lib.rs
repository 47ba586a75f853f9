pub mod http;
pub mod router;
pub mod server;
pub mod subsystems;

use std::sync::Arc;

use sightline_core::{Clock, ProviderRegistry, SightlineConfig, Store};

use subsystems::jobs::JobRunner;
use subsystems::orchestrator::{Orchestrator, OrchestratorSettings};

/// Everything a request handler needs, shared by the IPC and HTTP front ends.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub orchestrator: Orchestrator,
    pub jobs: JobRunner,
    pub clock: Arc<dyn Clock>,
    pub config: SightlineConfig,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ProviderRegistry,
        clock: Arc<dyn Clock>,
        config: SightlineConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(registry),
            clock.clone(),
            OrchestratorSettings::from_config(&config),
        );
        let jobs = JobRunner::new(store.clone(), config.aggregation.clone(), clock.clone());
        Self {
            store,
            orchestrator,
            jobs,
            clock,
            config,
        }
    }
}
