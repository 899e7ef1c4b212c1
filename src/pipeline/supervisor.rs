//! Supervisor executor
//!
//! Two reasoning-step specialisations selected by the phase `method`:
//! - `selectAgents`: decompose the query into sub-queries and an agent
//!   dispatch plan, sized by how much information the hypothesis phase found
//!   missing.
//! - `synthesizeResults`: merge the scientific conclusion with the external
//!   agent results into the final answer.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::context::{ExecutionContext, PhaseResult};
use super::mapper::{input, map_inputs};
use super::reasoning::ReasoningExecutor;
use super::PhaseExecutor;
use crate::agents::AgentRegistry;
use crate::method::{MethodConfig, PhaseConfig, SupervisorMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl Complexity {
    pub fn from_missing_count(count: usize) -> Self {
        match count {
            0..=1 => Complexity::Simple,
            2..=3 => Complexity::Standard,
            _ => Complexity::Complex,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Standard => "standard",
            Complexity::Complex => "complex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    #[serde(alias = "agentId", alias = "agent")]
    pub agent_id: String,
    pub query: String,
}

/// Supervisor's dispatch plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPlan {
    #[serde(default, alias = "subQueries")]
    pub sub_queries: Vec<SubQuery>,
    #[serde(default, alias = "parallelAgentIds")]
    pub parallel_agent_ids: Vec<String>,
    #[serde(default, alias = "sequentialAgentIds")]
    pub sequential_agent_ids: Vec<String>,
}

impl AgentPlan {
    pub fn is_empty(&self) -> bool {
        self.parallel_agent_ids.is_empty() && self.sequential_agent_ids.is_empty()
    }

    pub fn total_agents(&self) -> usize {
        self.parallel_agent_ids.len() + self.sequential_agent_ids.len()
    }

    /// First sub-query addressed to `agent_id`
    pub fn query_for(&self, agent_id: &str) -> Option<&str> {
        self.sub_queries
            .iter()
            .find(|q| q.agent_id == agent_id)
            .map(|q| q.query.as_str())
    }

    /// Keep only registered agents, drop duplicates (parallel wins over
    /// sequential) and return the ids that were removed.
    pub fn restrict_to(&mut self, registry: &AgentRegistry) -> Vec<String> {
        let mut dropped = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for list in [&mut self.parallel_agent_ids, &mut self.sequential_agent_ids] {
            list.retain(|id| {
                if !registry.contains(id) {
                    dropped.push(id.clone());
                    return false;
                }
                seen.insert(id.clone())
            });
        }
        self.sub_queries.retain(|q| registry.contains(&q.agent_id));
        dropped
    }
}

pub struct SupervisorExecutor {
    reasoning: Arc<ReasoningExecutor>,
    registry: Arc<AgentRegistry>,
}

impl SupervisorExecutor {
    pub fn new(reasoning: Arc<ReasoningExecutor>, registry: Arc<AgentRegistry>) -> Self {
        Self { reasoning, registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn select_agents(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult {
        let started = Instant::now();
        let inputs = map_inputs(&phase.input_mapping, ctx);
        let missing_input = input(&inputs, "missing_information");
        let missing = count_missing(missing_input);
        let complexity = Complexity::from_missing_count(missing);

        if missing == 0 || self.registry.is_empty() {
            // Degraded only when selection could not run, not when nothing is missing
            let degraded = missing_input.is_none() || self.registry.is_empty();
            info!(
                phase_id = %phase.phase_id,
                missing,
                degraded,
                "No missing information or no agents registered, skipping agent selection"
            );
            let plan = AgentPlan::default();
            let output = plan_output(&plan, complexity, Some("No external agents required"), Value::Null);
            return PhaseResult::success(&phase.phase_id, output, started.elapsed().as_millis() as u64)
                .with_metadata("complexity", complexity.as_str())
                .with_metadata("degraded", degraded);
        }

        let mut extra = BTreeMap::new();
        extra.insert("complexity".to_string(), complexity.as_str().to_string());
        extra.insert("agent_catalogue".to_string(), self.registry.describe());

        let result = self.reasoning.run_step(phase, config, &inputs, &extra, None).await;
        if !result.is_success() {
            return result.with_metadata("complexity", complexity.as_str());
        }

        let mut plan: AgentPlan = match serde_json::from_value(result.output.clone()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(phase_id = %phase.phase_id, error = %e, "Agent plan did not deserialize");
                return PhaseResult::failed(&phase.phase_id, format!("invalid agent plan: {}", e), result.duration_ms)
                    .with_metadata("complexity", complexity.as_str());
            }
        };

        let dropped = plan.restrict_to(&self.registry);
        if !dropped.is_empty() {
            warn!(phase_id = %phase.phase_id, dropped = ?dropped, "Plan referenced unregistered agents");
        }
        info!(
            phase_id = %phase.phase_id,
            complexity = complexity.as_str(),
            parallel = plan.parallel_agent_ids.len(),
            sequential = plan.sequential_agent_ids.len(),
            "Agent plan ready"
        );

        let rationale = result.output.get("rationale").and_then(Value::as_str).map(str::to_string);
        let confidence = result.output.get("confidence").cloned().unwrap_or(Value::Null);
        let mut normalized = result;
        normalized.output = plan_output(&plan, complexity, rationale.as_deref(), confidence);
        normalized
            .with_metadata("complexity", complexity.as_str())
            .with_metadata("dropped_agents", dropped)
    }

    pub async fn synthesize_results(
        &self,
        phase: &PhaseConfig,
        config: &MethodConfig,
        ctx: &ExecutionContext,
    ) -> PhaseResult {
        let inputs = map_inputs(&phase.input_mapping, ctx);
        let result = self
            .reasoning
            .run_step(phase, config, &inputs, &BTreeMap::new(), Some(normalize_synthesis))
            .await;

        if result.is_success() {
            let conflicts = result
                .output
                .get("conflicts_detected")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            info!(phase_id = %phase.phase_id, conflicts, "Supervisor synthesis complete");
        }
        result
    }
}

#[async_trait]
impl PhaseExecutor for SupervisorExecutor {
    async fn execute(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult {
        match phase.method {
            Some(SupervisorMethod::SelectAgents) => self.select_agents(phase, config, ctx).await,
            Some(SupervisorMethod::SynthesizeResults) => self.synthesize_results(phase, config, ctx).await,
            None => PhaseResult::failed(&phase.phase_id, "supervisor phase has no method", 0),
        }
    }
}

/// Number of non-empty missing-information items
fn count_missing(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| match item {
                Value::String(s) => !s.trim().is_empty(),
                Value::Null => false,
                _ => true,
            })
            .count(),
        Some(Value::String(s)) if !s.trim().is_empty() => 1,
        _ => 0,
    }
}

fn plan_output(plan: &AgentPlan, complexity: Complexity, rationale: Option<&str>, confidence: Value) -> Value {
    let mut output = serde_json::json!({
        "sub_queries": plan.sub_queries,
        "parallel_agent_ids": plan.parallel_agent_ids,
        "sequential_agent_ids": plan.sequential_agent_ids,
        "complexity": complexity.as_str(),
    });
    if let Some(obj) = output.as_object_mut() {
        if let Some(rationale) = rationale {
            obj.insert("rationale".to_string(), Value::String(rationale.to_string()));
        }
        if !confidence.is_null() {
            obj.insert("confidence".to_string(), confidence);
        }
    }
    output
}

/// Accept camelCase keys from the model and default the conflict list
fn normalize_synthesis(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (camel, snake) in [("conflictsDetected", "conflicts_detected"), ("finalAnswer", "final_answer")] {
        if !obj.contains_key(snake) {
            if let Some(v) = obj.remove(camel) {
                obj.insert(snake.to_string(), v);
            }
        }
    }
    if !obj.contains_key("conflicts_detected") {
        obj.insert("conflicts_detected".to_string(), Value::Array(Vec::new()));
    }
}
