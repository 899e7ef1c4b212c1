use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ::config::{Config as Layers, Environment, File};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agents::AgentCapability;
use crate::search::BackendKind;

pub const CONFIG_FILE: &str = "oxidized-method";
pub const ENV_PREFIX: &str = "OXM";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub agents: AgentsConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub method: MethodSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub streaming_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl LLMConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub weight: f64,
}

impl BackendSettings {
    pub fn is_enabled(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty()) && self.weight > 0.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub vector: BackendSettings,
    #[serde(default)]
    pub graph: BackendSettings,
    #[serde(default)]
    pub relational: BackendSettings,
    pub top_k: usize,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl SearchConfig {
    pub fn backend(&self, kind: BackendKind) -> &BackendSettings {
        match kind {
            BackendKind::Vector => &self.vector,
            BackendKind::Graph => &self.graph,
            BackendKind::Relational => &self.relational,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    /// Base URL of the agent service; unset runs coordination in mock mode
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Empty means the default research catalogue
    #[serde(default)]
    pub catalogue: Vec<AgentCapability>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub window: usize,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MethodSettings {
    /// Method document path; unset uses the built-in document
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the user config file, then `./oxidized-method.toml`,
    /// then `OXM__SECTION__KEY` variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load(Some(CONFIG_FILE))
    }

    /// `<config dir>/oxidized-method/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("oxidized-method").join("config.toml"))
    }

    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = Layers::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default(
                "server.cors_allowed_origins",
                vec!["http://localhost:3000", "http://localhost:5173"],
            )?
            .set_default("server.streaming_enabled", true)?
            .set_default("llm.provider", "openai")?
            .set_default("llm.model", "gpt-4o")?
            .set_default("llm.timeout_secs", 120)?
            .set_default("search.vector.weight", 0.5)?
            .set_default("search.graph.weight", 0.3)?
            .set_default("search.relational.weight", 0.2)?
            .set_default("search.top_k", 5)?
            .set_default("search.max_results", 10)?
            .set_default("search.timeout_secs", 10)?
            .set_default("agents.timeout_secs", 60)?
            .set_default("metrics.window", 10)?;

        if let Some(file) = file {
            if let Some(user) = Self::user_config_path() {
                builder = builder.add_source(File::from(user).required(false));
            }
            builder = builder.add_source(File::with_name(file).required(false));
        }

        let mut config: Config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allowed_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read service configuration")?
            .try_deserialize()
            .context("Invalid service configuration")?;

        if config.llm.api_key.is_empty() {
            config.llm.api_key = provider_key(&config.llm.provider);
        }
        if let Ok(port) = env::var("PORT") {
            config.server.port = port.parse().context("PORT must be a port number")?;
        }
        Ok(config)
    }
}

/// Well-known API key variable for a provider
fn provider_key(provider: &str) -> String {
    let var = match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        "groq" => "GROQ_API_KEY",
        "glm" | "glm-general" => "GLM_API_KEY",
        _ => "OPENAI_API_KEY",
    };
    env::var(var).unwrap_or_default()
}
