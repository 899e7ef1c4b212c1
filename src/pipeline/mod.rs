//! Phase Pipeline
//!
//! Runs a query through the phases declared in the active [`MethodConfig`]:
//!
//! ```text
//! query ─► search fusion ─► phase 1 ─► phase 2 ─► ... ─► final answer
//!                              │          │
//!                              ▼          ▼
//!                          ExecutionContext (write-once phase results)
//! ```
//!
//! Each phase is routed by its `executorKind` to one of three executors:
//! reasoning (single schema-validated completion), supervisor (agent
//! selection and result synthesis) or agent coordination (bounded-parallel
//! dispatch to external agents).

pub mod context;
pub mod coordination;
pub mod events;
pub mod mapper;
pub mod orchestrator;
pub mod reasoning;
pub mod supervisor;
pub mod template;

pub use context::{ExecutionContext, PhaseResult, PhaseStatus};
pub use coordination::AgentCoordinationExecutor;
pub use events::PipelineEvent;
pub use orchestrator::{AnswerSource, Capabilities, Orchestrator, QueryOutcome, QueryStatus};
pub use reasoning::ReasoningExecutor;
pub use supervisor::{AgentPlan, SupervisorExecutor};

use async_trait::async_trait;

use crate::method::{MethodConfig, PhaseConfig};

/// Runs one phase against a read-only view of the query context.
///
/// Executors never return errors: every failure is encoded as a
/// `PhaseResult` with `status = failed` so the orchestrator can apply the
/// critical/optional policy uniformly.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult;
}
