//! Agent-coordination executor
//!
//! Dispatches a supervisor `AgentPlan`: parallel ids concurrently (bounded by
//! `maxParallelAgents`), sequential ids one after another. A failing agent
//! never aborts the others. Without a configured invoker the phase returns a
//! flagged mock result so the rest of the pipeline still runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::context::{ExecutionContext, PhaseResult};
use super::mapper::{input, map_inputs};
use super::supervisor::AgentPlan;
use super::PhaseExecutor;
use crate::agents::{AgentError, AgentInvoker};
use crate::method::{MethodConfig, PhaseConfig};

pub struct AgentCoordinationExecutor {
    invoker: Option<Arc<dyn AgentInvoker>>,
}

impl AgentCoordinationExecutor {
    pub fn new(invoker: Option<Arc<dyn AgentInvoker>>) -> Self {
        Self { invoker }
    }

    pub fn is_available(&self) -> bool {
        self.invoker.is_some()
    }

    /// Run every agent in `plan` and aggregate `{agents, totalAgents, successful, failed}`
    pub async fn dispatch(&self, plan: &AgentPlan, user_query: &str, max_parallel: usize) -> Value {
        let parallel = dedup(&plan.parallel_agent_ids, &HashSet::new());
        let already: HashSet<&str> = parallel.iter().map(String::as_str).collect();
        let sequential = dedup(&plan.sequential_agent_ids, &already);
        let total = parallel.len() + sequential.len();

        let Some(invoker) = &self.invoker else {
            if total > 0 {
                warn!(agents = total, "Agent invocation not configured, returning mock results");
            }
            let agents: Map<String, Value> = parallel
                .iter()
                .chain(sequential.iter())
                .map(|id| {
                    (
                        id.clone(),
                        json!({ "status": "mock", "output": { "message": "agent invocation is not configured" } }),
                    )
                })
                .collect();
            return json!({
                "agents": agents,
                "totalAgents": total,
                "successful": 0,
                "failed": 0,
                "mock": true,
                "degraded": true,
            });
        };

        let query_for = |id: &str| plan.query_for(id).unwrap_or(user_query).to_string();

        let mut outcomes: Vec<(String, Result<Value, AgentError>)> = stream::iter(parallel.iter().cloned())
            .map(|id| {
                let sub_query = query_for(&id);
                let invoker = Arc::clone(invoker);
                async move {
                    let result = invoker.invoke(&id, &sub_query).await;
                    (id, result)
                }
            })
            .buffer_unordered(max_parallel.max(1))
            .collect()
            .await;

        for id in sequential {
            let sub_query = query_for(&id);
            let result = invoker.invoke(&id, &sub_query).await;
            outcomes.push((id, result));
        }

        let mut agents = Map::new();
        let mut successful = 0usize;
        let mut failed = 0usize;
        for (id, result) in outcomes {
            let entry = match result {
                Ok(output) => {
                    successful += 1;
                    json!({ "status": "success", "output": output })
                }
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "Agent dispatch failed");
                    failed += 1;
                    json!({ "status": "failed", "output": { "error": e.to_string() } })
                }
            };
            agents.insert(id, entry);
        }

        info!(total, successful, failed, "Agent coordination complete");

        let mut output = json!({
            "agents": agents,
            "totalAgents": total,
            "successful": successful,
            "failed": failed,
        });
        if total > 0 {
            output["confidence"] = json!(successful as f64 / total as f64);
        }
        output
    }
}

#[async_trait]
impl PhaseExecutor for AgentCoordinationExecutor {
    async fn execute(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult {
        let started = Instant::now();
        let inputs = map_inputs(&phase.input_mapping, ctx);

        let plan = match input(&inputs, "plan") {
            Some(value) => serde_json::from_value::<AgentPlan>(value.clone()).unwrap_or_else(|e| {
                warn!(phase_id = %phase.phase_id, error = %e, "Unreadable agent plan, dispatching nothing");
                AgentPlan::default()
            }),
            None => AgentPlan::default(),
        };
        let user_query = input(&inputs, "query")
            .and_then(Value::as_str)
            .unwrap_or(ctx.user_query.as_str())
            .to_string();

        let output = self
            .dispatch(&plan, &user_query, config.orchestration_config.max_parallel_agents)
            .await;
        let mock = output.get("mock").and_then(Value::as_bool).unwrap_or(false);

        PhaseResult::success(&phase.phase_id, output, started.elapsed().as_millis() as u64)
            .with_metadata("mock", mock)
            .with_metadata("agents_planned", plan.total_agents() as u64)
    }
}

fn dedup(ids: &[String], exclude: &HashSet<&str>) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !exclude.contains(id.as_str()) && seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }
    unique
}
