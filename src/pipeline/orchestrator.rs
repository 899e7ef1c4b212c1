//! Phase pipeline orchestrator
//!
//! Per query: snapshot the active method config, seed the context with fused
//! search results, then walk the phases in declared order. Each phase moves
//! `pending -> running -> {success, failed, skipped}`; a failed critical
//! phase aborts the rest of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{ExecutionContext, PhaseResult, PhaseStatus};
use super::coordination::AgentCoordinationExecutor;
use super::events::{EventSink, PipelineEvent};
use super::reasoning::ReasoningExecutor;
use super::supervisor::SupervisorExecutor;
use super::template::format_value;
use super::PhaseExecutor;
use crate::agents::{AgentCapability, AgentInvoker, AgentRegistry};
use crate::llm::LLM;
use crate::method::{ExecutorKind, MethodConfig, MethodConfigStore, PhaseConfig, SupervisorMethod};
use crate::metrics::{MetricsController, QueryMetrics};
use crate::search::{BackendKind, SearchFusionEngine};
use crate::types::{AppError, AppResult};

pub const FALLBACK_ANSWER: &str =
    "Unable to produce an answer: the reasoning pipeline did not reach a conclusion.";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Completed,
    /// A critical phase failed and the pipeline stopped
    Failed,
}

/// Where the final answer came from, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    SupervisorSynthesis,
    Conclusion,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub query_id: Uuid,
    pub status: QueryStatus,
    pub answer: String,
    pub answer_source: AnswerSource,
    pub confidence: f64,
    pub config_version: String,
    /// Results of every phase that ran, in pipeline order
    pub phase_results: Vec<PhaseResult>,
    /// Conditional phases skipped because the supervisor layer is off
    pub skipped_phases: Vec<String>,
    /// Phases never reached after a critical failure
    pub not_run: Vec<String>,
    /// Final status of every configured phase; unreached phases stay `pending`
    #[serde(default)]
    pub phase_statuses: Vec<PhaseState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub metadata: Map<String, Value>,
}

impl QueryOutcome {
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|r| r.phase_id == phase_id)
    }

    pub fn phase_status(&self, phase_id: &str) -> Option<PhaseStatus> {
        self.phase_statuses
            .iter()
            .find(|s| s.phase_id == phase_id)
            .map(|s| s.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub phase_id: String,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub phase_id: String,
    pub name: String,
    pub executor_kind: ExecutorKind,
    pub optional: bool,
    pub conditional: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub supervisor: bool,
    pub agent_coordination: bool,
    /// A vector backend is configured. Reachability is not checked; a backend
    /// that is down still reports `true` and contributes no results.
    pub vector_search: bool,
    /// A graph backend is configured, reachable or not
    pub graph_search: bool,
    /// A relational backend is configured, reachable or not
    pub relational_search: bool,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub version: String,
    pub supervisor_enabled: bool,
    pub phases: Vec<PhaseSummary>,
    pub features: FeatureFlags,
    pub agents: Vec<AgentCapability>,
}

/// Executor lookup by declared kind
struct ExecutorTable {
    executors: HashMap<ExecutorKind, Arc<dyn PhaseExecutor>>,
}

impl ExecutorTable {
    fn get(&self, kind: ExecutorKind) -> Option<&Arc<dyn PhaseExecutor>> {
        self.executors.get(&kind)
    }
}

pub struct Orchestrator {
    store: MethodConfigStore,
    search: Arc<SearchFusionEngine>,
    executors: ExecutorTable,
    registry: Arc<AgentRegistry>,
    agents_available: bool,
    metrics: Option<Arc<MetricsController>>,
    streaming_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        store: MethodConfigStore,
        llm: Arc<LLM>,
        search: SearchFusionEngine,
        registry: AgentRegistry,
        invoker: Option<Arc<dyn AgentInvoker>>,
    ) -> Self {
        let registry = Arc::new(registry);
        let reasoning = Arc::new(ReasoningExecutor::new(llm));
        let supervisor = Arc::new(SupervisorExecutor::new(Arc::clone(&reasoning), Arc::clone(&registry)));
        let coordination = Arc::new(AgentCoordinationExecutor::new(invoker));
        let agents_available = coordination.is_available();

        let mut executors: HashMap<ExecutorKind, Arc<dyn PhaseExecutor>> = HashMap::new();
        executors.insert(ExecutorKind::Reasoning, reasoning);
        executors.insert(ExecutorKind::Supervisor, supervisor);
        executors.insert(ExecutorKind::AgentCoordination, coordination);

        Self {
            store,
            search: Arc::new(search),
            executors: ExecutorTable { executors },
            registry,
            agents_available,
            metrics: None,
            streaming_enabled: true,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsController>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    pub fn store(&self) -> &MethodConfigStore {
        &self.store
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsController>> {
        self.metrics.as_ref()
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    /// Run one query to completion
    pub async fn run(&self, query: &str) -> AppResult<QueryOutcome> {
        self.run_with_events(query, &EventSink::disabled()).await
    }

    /// Run one query in the background, returning its event stream.
    /// The stream ends with `final_result` + `done`, or `error`.
    pub fn run_streaming(self: Arc<Self>, query: String) -> AppResult<mpsc::Receiver<PipelineEvent>> {
        if !self.streaming_enabled {
            return Err(AppError::NotImplemented("streaming query execution is disabled".to_string()));
        }
        validate_query(&query)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            match self.run_with_events(&query, &sink).await {
                Ok(outcome) => {
                    sink.emit(PipelineEvent::FinalResult {
                        result: Box::new(outcome),
                    })
                    .await;
                    sink.emit(PipelineEvent::Done).await;
                }
                Err(e) => {
                    sink.emit(PipelineEvent::Error { message: e.to_string() }).await;
                }
            }
        });
        Ok(rx)
    }

    pub async fn run_with_events(&self, query: &str, events: &EventSink) -> AppResult<QueryOutcome> {
        validate_query(query)?;
        let started = Instant::now();
        let config = self.store.current().await;

        let mut ctx = ExecutionContext::new(query.trim());
        info!(
            query_id = %ctx.query_id,
            version = %config.version,
            supervisor_enabled = config.supervisor_enabled,
            "Starting query"
        );

        ctx.search_results = self.search.search(&ctx.user_query).await;
        let mut contributing: Vec<BackendKind> = Vec::new();
        for result in &ctx.search_results {
            if !contributing.contains(&result.source) {
                contributing.push(result.source);
            }
        }
        ctx.set_metadata("config_version", config.version.clone());
        ctx.set_metadata("supervisor_enabled", config.supervisor_enabled);

        let total = config.phases.len();
        let mut skipped = Vec::new();
        let mut not_run = Vec::new();
        let mut abort_error: Option<String> = None;

        let mut statuses: Vec<PhaseState> = config
            .phases
            .iter()
            .map(|p| PhaseState {
                phase_id: p.phase_id.clone(),
                status: PhaseStatus::Pending,
            })
            .collect();

        for (index, phase) in config.phases.iter().enumerate() {
            if abort_error.is_some() {
                not_run.push(phase.phase_id.clone());
                continue;
            }

            if config.should_skip(phase) {
                debug!(phase_id = %phase.phase_id, "Conditional phase skipped, supervisor disabled");
                let result = PhaseResult::skipped(&phase.phase_id, "supervisor disabled");
                events.emit(PipelineEvent::phase_complete(&result)).await;
                statuses[index].status = PhaseStatus::Skipped;
                skipped.push(phase.phase_id.clone());
                continue;
            }

            statuses[index].status = PhaseStatus::Running;

            events.emit(PipelineEvent::phase_start(phase, index, total)).await;

            let result = self.run_phase(phase, &config, &ctx).await;
            info!(
                query_id = %ctx.query_id,
                phase_id = %phase.phase_id,
                status = %result.status,
                confidence = result.confidence,
                duration_ms = result.duration_ms,
                "Phase finished"
            );

            events.emit(PipelineEvent::phase_complete(&result)).await;
            statuses[index].status = result.status;
            let failed_critical = result.status == PhaseStatus::Failed && phase.critical;
            let error_text = result.error().unwrap_or("phase failed").to_string();
            ctx.record(result);

            if failed_critical {
                error!(
                    query_id = %ctx.query_id,
                    phase_id = %phase.phase_id,
                    error = %error_text,
                    "Critical phase failed, aborting pipeline"
                );
                abort_error = Some(format!("critical phase `{}` failed: {}", phase.phase_id, error_text));
            }
        }

        let (answer, confidence, answer_source) = extract_answer(&config, &ctx);
        let status = if abort_error.is_some() {
            QueryStatus::Failed
        } else {
            QueryStatus::Completed
        };

        let mut metadata = std::mem::take(&mut ctx.metadata);
        metadata.insert("searchResultCount".to_string(), Value::from(ctx.search_results.len() as u64));
        metadata.insert(
            "searchBackends".to_string(),
            Value::from(contributing.iter().map(|k| k.as_str()).collect::<Vec<_>>()),
        );

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let outcome = QueryOutcome {
            query_id: ctx.query_id,
            status,
            answer,
            answer_source,
            confidence,
            config_version: config.version.clone(),
            phase_results: ctx.into_phase_results(),
            skipped_phases: skipped,
            not_run,
            phase_statuses: statuses,
            error: abort_error,
            execution_time_ms,
            metadata,
        };

        info!(
            query_id = %outcome.query_id,
            status = ?outcome.status,
            answer_source = ?outcome.answer_source,
            execution_time_ms,
            "Query finished"
        );

        self.record_metrics(&outcome).await;
        Ok(outcome)
    }

    async fn run_phase(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult {
        let started = Instant::now();
        let Some(executor) = self.executors.get(phase.executor_kind) else {
            return PhaseResult::failed(
                &phase.phase_id,
                format!("no executor registered for `{}`", phase.executor_kind),
                0,
            );
        };

        let limit = Duration::from_millis(phase.timeout_ms);
        let result = match tokio::time::timeout(limit, executor.execute(phase, config, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(phase_id = %phase.phase_id, timeout_ms = phase.timeout_ms, "Phase timed out");
                PhaseResult::failed(&phase.phase_id, format!("phase timed out after {}ms", phase.timeout_ms), 0)
            }
        };
        result.with_duration(started.elapsed().as_millis() as u64)
    }

    async fn record_metrics(&self, outcome: &QueryOutcome) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match metrics.record(QueryMetrics::from_outcome(outcome)).await {
            Ok(Some(report)) => info!(
                previous = %report.previous_version,
                new_version = ?report.new_version,
                suggestions = report.suggestions.len(),
                "Improvement cycle complete"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Improvement cycle failed, keeping current method config"),
        }
    }

    pub async fn capabilities(&self) -> Capabilities {
        let config = self.store.current().await;
        let phases = config
            .phases
            .iter()
            .map(|p| PhaseSummary {
                phase_id: p.phase_id.clone(),
                name: p.display_name().to_string(),
                executor_kind: p.executor_kind,
                optional: !p.critical,
                conditional: config.is_conditional(&p.phase_id),
            })
            .collect();

        Capabilities {
            version: config.version.clone(),
            supervisor_enabled: config.supervisor_enabled,
            phases,
            features: FeatureFlags {
                supervisor: config.supervisor_enabled && config.has_executor(ExecutorKind::Supervisor),
                agent_coordination: config.supervisor_enabled
                    && self.agents_available
                    && config.has_executor(ExecutorKind::AgentCoordination),
                vector_search: self.search.has_backend(BackendKind::Vector),
                graph_search: self.search.has_backend(BackendKind::Graph),
                relational_search: self.search.has_backend(BackendKind::Relational),
                streaming: self.streaming_enabled,
            },
            agents: self.registry.agents().to_vec(),
        }
    }
}

fn validate_query(query: &str) -> AppResult<()> {
    if query.trim().is_empty() {
        return Err(AppError::InvalidRequest("query must not be empty".to_string()));
    }
    Ok(())
}

/// Supervisor synthesis, else the conclusion phase, else the fallback message
fn extract_answer(config: &MethodConfig, ctx: &ExecutionContext) -> (String, f64, AnswerSource) {
    let synthesis = config
        .phases
        .iter()
        .filter(|p| p.executor_kind == ExecutorKind::Supervisor && p.method == Some(SupervisorMethod::SynthesizeResults))
        .filter_map(|p| ctx.phase(&p.phase_id))
        .filter(|r| r.is_success())
        .last();
    if let Some(result) = synthesis {
        if let Some(answer) = answer_text(result.output.get("final_answer")) {
            return (answer, result.confidence, AnswerSource::SupervisorSynthesis);
        }
    }

    if let Some(result) = ctx.phase(&config.orchestration_config.conclusion_phase_id) {
        if result.is_success() {
            if let Some(answer) = answer_text(result.output.get("conclusion")) {
                return (answer, result.confidence, AnswerSource::Conclusion);
            }
        }
    }

    (FALLBACK_ANSWER.to_string(), 0.0, AnswerSource::Fallback)
}

fn answer_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(format_value(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use crate::test_support::{
        scientific_llm, scientific_replies, FailingSearch, RecordingAgents, Reply, ScriptedLLM, StaticSearch,
        ANALYSIS, HYPOTHESIS, SELECT, SYNTHESIZE,
    };

    fn search() -> SearchFusionEngine {
        let hits = vec![SearchHit {
            id: "pmid-1".to_string(),
            score: 0.9,
            payload: serde_json::json!({ "title": "Metformin in ageing" }),
        }];
        SearchFusionEngine::new(5, 10).with_backend(Arc::new(StaticSearch::new(BackendKind::Vector, hits)), 0.6)
    }

    fn orchestrator(config: MethodConfig, script: &ScriptedLLM, agents: Option<Arc<RecordingAgents>>) -> Orchestrator {
        Orchestrator::new(
            MethodConfigStore::new(config),
            script.llm(),
            search(),
            AgentRegistry::research_defaults(),
            agents.map(|a| a as Arc<dyn AgentInvoker>),
        )
    }

    fn supervised() -> MethodConfig {
        let mut config = MethodConfig::builtin().unwrap();
        config.supervisor_enabled = true;
        config
    }

    fn unsupervised() -> MethodConfig {
        let mut config = MethodConfig::builtin().unwrap();
        config.supervisor_enabled = false;
        config
    }

    fn ids(outcome: &QueryOutcome) -> Vec<String> {
        outcome.phase_results.iter().map(|r| r.phase_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_full_supervised_pipeline() {
        let script = scientific_llm(&["dose response", "trial status"]);
        let agents = Arc::new(RecordingAgents::new());
        let orch = orchestrator(supervised(), &script, Some(agents.clone()));

        let outcome = tokio_test::assert_ok!(orch.run("Does metformin extend human lifespan?").await);

        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.answer_source, AnswerSource::SupervisorSynthesis);
        assert!(outcome.answer.starts_with("Not yet"));
        assert_eq!(outcome.phase_results.len(), 9);
        assert!(outcome.not_run.is_empty());
        assert!(outcome.phase_results.iter().all(|r| r.is_success()));

        let coordination = outcome.phase("agent_coordination").unwrap();
        assert_eq!(coordination.output["successful"], 2);
        assert_eq!(agents.calls().len(), 2);
        assert_eq!(outcome.metadata["searchBackends"], serde_json::json!(["vector"]));

        let hypothesis_prompt = &script.requests()[0].messages[0].content;
        assert!(hypothesis_prompt.contains("Metformin in ageing"));
    }

    #[tokio::test]
    async fn test_zero_missing_information_dispatches_nothing() {
        let script = scientific_llm(&[]);
        let agents = Arc::new(RecordingAgents::new());
        let orch = orchestrator(supervised(), &script, Some(agents.clone()));

        let outcome = orch.run("Is water wet?").await.unwrap();

        let select = outcome.phase("supervisor_select").unwrap();
        assert_eq!(select.output["parallel_agent_ids"], serde_json::json!([]));
        let coordination = outcome.phase("agent_coordination").unwrap();
        assert_eq!(coordination.status, PhaseStatus::Success);
        assert_eq!(coordination.output["successful"], 0);
        assert_eq!(coordination.output["failed"], 0);
        assert!(agents.calls().is_empty());
        assert_eq!(script.calls_matching(SELECT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_critical_failure_falls_back_to_conclusion() {
        let script = scientific_replies(ScriptedLLM::new().on(SYNTHESIZE, "definitely not json"), &["x", "y"]);
        let orch = orchestrator(supervised(), &script, Some(Arc::new(RecordingAgents::new())));

        let outcome = orch.run("q").await.unwrap();

        let synthesis = outcome.phase("supervisor_synthesize").unwrap();
        assert_eq!(synthesis.status, PhaseStatus::Failed);
        assert_eq!(synthesis.metadata["attempts"], 3);
        assert_eq!(script.calls_matching(SYNTHESIZE), 3);
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.answer_source, AnswerSource::Conclusion);
        assert!(outcome.answer.contains("Evidence is insufficient"));
        assert!((outcome.confidence - 0.45).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_first_phase_failure_aborts() {
        let mut config = supervised();
        for phase in &mut config.phases {
            phase.critical = true;
        }
        let script = ScriptedLLM::new().on(HYPOTHESIS, Reply::Error("model offline".to_string()));
        let orch = orchestrator(config, &script, None);

        let outcome = orch.run("q").await.unwrap();

        assert_eq!(outcome.status, QueryStatus::Failed);
        assert_eq!(ids(&outcome), vec!["hypothesis".to_string()]);
        assert_eq!(outcome.not_run.len(), 8);
        assert_eq!(outcome.not_run[0], "synthesis");
        assert_eq!(outcome.answer_source, AnswerSource::Fallback);
        assert_eq!(outcome.answer, FALLBACK_ANSWER);
        assert!(outcome.error.as_deref().unwrap().contains("hypothesis"));
        assert_eq!(outcome.phase_statuses.len(), 9);
        assert_eq!(outcome.phase_status("hypothesis"), Some(PhaseStatus::Failed));
        assert_eq!(outcome.phase_status("synthesis"), Some(PhaseStatus::Pending));
        assert!(outcome
            .not_run
            .iter()
            .all(|id| outcome.phase_status(id) == Some(PhaseStatus::Pending)));
    }

    #[tokio::test]
    async fn test_supervisor_disabled_runs_only_core_phases() {
        let core = [
            "hypothesis",
            "synthesis",
            "analysis",
            "validation",
            "conclusion",
            "metacognition",
        ];

        let with_entries = orchestrator(unsupervised(), &scientific_llm(&["a"]), None)
            .run("q")
            .await
            .unwrap();

        let mut stripped = unsupervised();
        stripped.phases.retain(|p| core.contains(&p.phase_id.as_str()));
        stripped.orchestration_config.conditional_phase_ids.clear();
        if let Some(validation) = stripped.phases.iter_mut().find(|p| p.phase_id == "validation") {
            validation.input_mapping.remove("agent_results");
        }
        let without_entries = orchestrator(stripped, &scientific_llm(&["a"]), None)
            .run("q")
            .await
            .unwrap();

        let expected: Vec<String> = core.iter().map(|s| s.to_string()).collect();
        assert_eq!(ids(&with_entries), expected);
        assert_eq!(ids(&without_entries), expected);
        assert_eq!(with_entries.skipped_phases.len(), 3);
        assert_eq!(with_entries.phase_status("supervisor_select"), Some(PhaseStatus::Skipped));
        assert_eq!(with_entries.phase_status("hypothesis"), Some(PhaseStatus::Success));
        assert!(with_entries.phase_statuses.iter().all(|s| s.status.is_terminal()));
        assert_eq!(with_entries.answer_source, AnswerSource::Conclusion);
    }

    #[tokio::test]
    async fn test_repeated_runs_have_stable_shape() {
        let orch = orchestrator(supervised(), &scientific_llm(&["a", "b"]), Some(Arc::new(RecordingAgents::new())));

        let shape = |o: &QueryOutcome| {
            o.phase_results
                .iter()
                .map(|r| (r.phase_id.clone(), r.status))
                .collect::<Vec<_>>()
        };
        let first = orch.run("same question").await.unwrap();
        let second = orch.run("same question").await.unwrap();
        assert_eq!(shape(&first), shape(&second));
        assert_ne!(first.query_id, second.query_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_timeout_is_a_failure() {
        let mut config = unsupervised();
        if let Some(analysis) = config.phases.iter_mut().find(|p| p.phase_id == "analysis") {
            analysis.timeout_ms = 100;
        }
        let slow = r#"{"findings":[],"evidence_strength":"weak","confidence":0.2}"#;
        let script = scientific_replies(
            ScriptedLLM::new().on(ANALYSIS, Reply::Slow(Duration::from_secs(5), slow.to_string())),
            &[],
        );
        let orch = orchestrator(config, &script, None);

        let outcome = orch.run("q").await.unwrap();
        let analysis = outcome.phase("analysis").unwrap();
        assert_eq!(analysis.status, PhaseStatus::Failed);
        assert!(analysis.error().unwrap().contains("timed out"));
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert!(outcome.phase("conclusion").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_streaming_event_order() {
        let orch = Arc::new(orchestrator(unsupervised(), &scientific_llm(&[]), None));
        let mut rx = orch.run_streaming("q".to_string()).unwrap();

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::PhaseStart { status, .. } = &event {
                assert_eq!(*status, PhaseStatus::Running);
            }
            names.push(event.name());
        }

        assert_eq!(names.first(), Some(&"phase_start"));
        assert_eq!(names[names.len() - 2], "final_result");
        assert_eq!(names.last(), Some(&"done"));
        assert_eq!(names.iter().filter(|n| **n == "phase_start").count(), 6);
        assert_eq!(names.iter().filter(|n| **n == "phase_complete").count(), 9);
    }

    #[tokio::test]
    async fn test_streaming_disabled_is_not_implemented() {
        let orch = Arc::new(orchestrator(unsupervised(), &scientific_llm(&[]), None).with_streaming(false));
        let err = tokio_test::assert_err!(orch.run_streaming("q".to_string()));
        assert!(matches!(err, AppError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let orch = orchestrator(unsupervised(), &scientific_llm(&[]), None);
        assert!(matches!(orch.run("   ").await.unwrap_err(), AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_capabilities() {
        let orch = orchestrator(supervised(), &scientific_llm(&[]), Some(Arc::new(RecordingAgents::new())));
        let caps = orch.capabilities().await;

        assert_eq!(caps.version, "1.0.0");
        assert_eq!(caps.phases.len(), 9);
        assert!(caps.features.supervisor);
        assert!(caps.features.agent_coordination);
        assert!(caps.features.vector_search);
        assert!(!caps.features.graph_search);
        assert!(caps.features.streaming);
        let select = caps.phases.iter().find(|p| p.phase_id == "supervisor_select").unwrap();
        assert!(select.conditional && select.optional);
        assert_eq!(caps.agents.len(), 5);
    }

    #[tokio::test]
    async fn test_search_flags_report_configured_backends() {
        let search = SearchFusionEngine::new(5, 10)
            .with_backend(Arc::new(FailingSearch::new(BackendKind::Graph)), 0.3);
        let orch = Orchestrator::new(
            MethodConfigStore::new(unsupervised()),
            scientific_llm(&[]).llm(),
            search,
            AgentRegistry::research_defaults(),
            None,
        );

        let outcome = orch.run("q").await.unwrap();
        assert_eq!(outcome.metadata["searchResultCount"], 0);

        let caps = orch.capabilities().await;
        assert!(caps.features.graph_search);
        assert!(!caps.features.vector_search);
        assert!(!caps.features.relational_search);
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_query() {
        let store = MethodConfigStore::new(unsupervised());
        let metrics = Arc::new(MetricsController::new(store.clone(), 10));
        let orch = Orchestrator::new(
            store,
            scientific_llm(&[]).llm(),
            search(),
            AgentRegistry::research_defaults(),
            None,
        )
        .with_metrics(Arc::clone(&metrics));

        orch.run("q").await.unwrap();
        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_recorded, 1);
        assert_eq!(snapshot.samples_in_window, 1);
    }
}
