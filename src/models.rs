use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::{AgentInvoker, AgentRegistry, HttpAgentInvoker};
use crate::config::Config;
use crate::llm::{LLMProviderConfig, LLM};
use crate::method::MethodConfigStore;
use crate::metrics::MetricsController;
use crate::pipeline::Orchestrator;
use crate::search::{BackendKind, HttpSearchBackend, SearchFusionEngine};
use crate::types::AppResult;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<MetricsController>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>, metrics: Arc<MetricsController>) -> Self {
        Self {
            config,
            orchestrator,
            metrics,
        }
    }

    /// Wire every collaborator from service settings. A malformed method
    /// document fails here, before any query is accepted.
    pub async fn from_config(config: Config) -> AppResult<Self> {
        let store = MethodConfigStore::open(config.method.path.clone()).await?;
        let method = store.current().await;
        info!(
            version = %method.version,
            phases = method.phases.len(),
            supervisor_enabled = method.supervisor_enabled,
            "Method configuration loaded"
        );

        let llm = LLM::new(LLMProviderConfig {
            name: config.llm.provider.clone(),
            api_key: config.llm.api_key.clone(),
            model: config.llm.model.clone(),
            base_url: config.llm.base_url.clone(),
            timeout: config.llm.timeout(),
        })?;

        let search_timeout = Duration::from_secs(config.search.timeout_secs);
        let mut search = SearchFusionEngine::new(config.search.top_k, config.search.max_results)
            .with_timeout(search_timeout);
        for kind in BackendKind::ALL {
            let settings = config.search.backend(kind);
            let Some(endpoint) = settings.endpoint.as_deref().filter(|_| settings.is_enabled()) else {
                continue;
            };
            let backend = HttpSearchBackend::new(kind, endpoint, search_timeout)?
                .with_api_key(settings.api_key.clone().unwrap_or_default());
            search = search.with_backend(Arc::new(backend), settings.weight);
            info!(backend = %kind, weight = settings.weight, "Search backend enabled");
        }
        if search.is_empty() {
            warn!("No search backends configured, queries run without retrieved evidence");
        }

        let registry = if config.agents.catalogue.is_empty() {
            AgentRegistry::research_defaults()
        } else {
            AgentRegistry::new(config.agents.catalogue.clone())
        };

        let invoker: Option<Arc<dyn AgentInvoker>> = match config.agents.endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                let invoker = HttpAgentInvoker::new(endpoint, Duration::from_secs(config.agents.timeout_secs))?
                    .with_api_key(config.agents.api_key.clone().unwrap_or_default());
                Some(Arc::new(invoker))
            }
            _ => {
                warn!("No agent endpoint configured, agent coordination returns mock results");
                None
            }
        };

        let mut metrics = MetricsController::new(store.clone(), config.metrics.window);
        if let Some(path) = &config.metrics.log_path {
            metrics = metrics.with_log_path(path.clone());
        }
        let metrics = Arc::new(metrics);

        let orchestrator = Orchestrator::new(store, Arc::new(llm), search, registry, invoker)
            .with_metrics(Arc::clone(&metrics))
            .with_streaming(config.server.streaming_enabled);

        Ok(Self::new(config, Arc::new(orchestrator), metrics))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub method_version: String,
}
