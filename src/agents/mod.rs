//! External Agents
//!
//! Domain agents live outside this service. The supervisor picks agents from
//! the [`AgentRegistry`] catalogue and the coordination phase dispatches
//! sub-queries to them through an [`AgentInvoker`].
//!
//! ```text
//! supervisor_select ──► AgentPlan ──► agent_coordination
//!                                        │  parallel ids (bounded)
//!                                        │  sequential ids (in order)
//!                                        ▼
//!                                   AgentInvoker::invoke
//! ```

pub mod http;

pub use http::HttpAgentInvoker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent request failed: {0}")]
    RequestFailed(String),

    #[error("Agent {agent_id} returned {status}: {body}")]
    Status {
        agent_id: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse agent response: {0}")]
    ParseError(String),
}

/// Dispatches one sub-query to one external agent
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent_id: &str, sub_query: &str) -> Result<serde_json::Value, AgentError>;
}

/// One entry in the agent catalogue offered to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub id: String,
    pub description: String,
}

impl AgentCapability {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Catalogue of dispatchable agents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistry {
    agents: Vec<AgentCapability>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentCapability>) -> Self {
        let mut registry = Self::default();
        for agent in agents {
            registry.register(agent);
        }
        registry
    }

    /// Built-in research catalogue
    pub fn research_defaults() -> Self {
        Self::new(vec![
            AgentCapability::new("literature", "Searches peer-reviewed literature and preprints"),
            AgentCapability::new("data-analysis", "Runs statistical analysis over public datasets"),
            AgentCapability::new("clinical-trials", "Looks up registered clinical trials and their outcomes"),
            AgentCapability::new("molecular", "Queries protein, gene and compound databases"),
            AgentCapability::new("web-research", "General web research for recent or grey literature"),
        ])
    }

    /// Insert or replace by id
    pub fn register(&mut self, agent: AgentCapability) {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.id == agent_id)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentCapability> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    pub fn agents(&self) -> &[AgentCapability] {
        &self.agents
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Catalogue as prompt text, one `- id: description` line per agent
    pub fn describe(&self) -> String {
        if self.agents.is_empty() {
            return "(no agents available)".to_string();
        }
        self.agents
            .iter()
            .map(|a| format!("- {}: {}", a.id, a.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces_existing_id() {
        let mut registry = AgentRegistry::research_defaults();
        let count = registry.agents().len();
        registry.register(AgentCapability::new("literature", "PubMed only"));
        assert_eq!(registry.agents().len(), count);
        assert_eq!(registry.get("literature").unwrap().description, "PubMed only");

        registry.register(AgentCapability::new("patents", "Patent search"));
        assert!(registry.contains("patents"));
    }

    #[test]
    fn test_describe_lists_agents() {
        let registry = AgentRegistry::new(vec![AgentCapability::new("a", "first")]);
        assert_eq!(registry.describe(), "- a: first");
        assert_eq!(AgentRegistry::default().describe(), "(no agents available)");
    }
}
