//! Deterministic collaborators for pipeline tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{AgentError, AgentInvoker};
use crate::llm::{LLMAdapter, LLM};
use crate::search::{BackendKind, SearchBackend, SearchError, SearchHit};
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};

/// One scripted completion
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Error(String),
    Slow(Duration, String),
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Text(value.to_string())
    }
}

struct Rule {
    marker: String,
    replies: Vec<Reply>,
    cursor: AtomicUsize,
}

#[derive(Default)]
struct ScriptState {
    rules: Vec<Rule>,
    requests: Mutex<Vec<LLMRequest>>,
}

/// LLM adapter answering by prompt substring. Each marker walks its reply
/// list in order and repeats the last reply once exhausted.
#[derive(Clone, Default)]
pub(crate) struct ScriptedLLM {
    state: Arc<ScriptState>,
}

impl ScriptedLLM {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a reply for prompts containing `marker`
    pub(crate) fn on(mut self, marker: &str, reply: impl Into<Reply>) -> Self {
        let state = Arc::get_mut(&mut self.state).expect("script is built before it is shared");
        let reply = reply.into();
        match state.rules.iter_mut().find(|r| r.marker == marker) {
            Some(rule) => rule.replies.push(reply),
            None => state.rules.push(Rule {
                marker: marker.to_string(),
                replies: vec![reply],
                cursor: AtomicUsize::new(0),
            }),
        }
        self
    }

    /// Script `marker` only if no reply is scripted for it yet
    pub(crate) fn or_on(self, marker: &str, reply: impl Into<Reply>) -> Self {
        if self.state.rules.iter().any(|r| r.marker == marker) {
            return self;
        }
        self.on(marker, reply)
    }

    pub(crate) fn llm(&self) -> Arc<LLM> {
        Arc::new(LLM::from_adapter(Box::new(self.clone()), "scripted", "scripted-model"))
    }

    pub(crate) fn requests(&self) -> Vec<LLMRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls_matching(&self, marker: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.messages.iter().any(|m| m.content.contains(marker)))
            .count()
    }
}

#[async_trait]
impl LLMAdapter for ScriptedLLM {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.state.requests.lock().unwrap().push(request.clone());
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let Some(rule) = self.state.rules.iter().find(|r| prompt.contains(&r.marker)) else {
            return Err(AppError::LLMApi("no scripted reply for prompt".to_string()));
        };
        let index = rule.cursor.fetch_add(1, Ordering::SeqCst).min(rule.replies.len() - 1);

        let text = match &rule.replies[index] {
            Reply::Text(text) => text.clone(),
            Reply::Error(message) => return Err(AppError::LLMApi(message.clone())),
            Reply::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                text.clone()
            }
        };

        Ok(LLMResponse {
            content: text,
            finish_reason: "stop".to_string(),
            usage: TokenUsage::default(),
        })
    }
}

pub(crate) const HYPOTHESIS: &str = "Propose up to three competing";
pub(crate) const SYNTHESIS: &str = "Synthesize what the evidence";
pub(crate) const ANALYSIS: &str = "Analyse the strength";
pub(crate) const SELECT: &str = "AVAILABLE AGENTS";
pub(crate) const VALIDATION: &str = "Test each hypothesis";
pub(crate) const CONCLUSION: &str = "Write the conclusion";
pub(crate) const METACOGNITION: &str = "Review the reasoning for biases";
pub(crate) const SYNTHESIZE: &str = "Merge the conclusion and the agent results";

/// Well-formed replies for every phase of the built-in method document
pub(crate) fn scientific_llm(missing_information: &[&str]) -> ScriptedLLM {
    scientific_replies(ScriptedLLM::new(), missing_information)
}

/// Fill every phase marker not already scripted in `script`
pub(crate) fn scientific_replies(script: ScriptedLLM, missing_information: &[&str]) -> ScriptedLLM {
    script
        .or_on(
            HYPOTHESIS,
            json!({
                "hypotheses": [{
                    "statement": "Metformin extends lifespan in mammals",
                    "falsification_criteria": ["Median lifespan increase below 5% in two independent cohorts"]
                }],
                "missing_information": missing_information,
                "confidence": 0.6
            }),
        )
        .or_on(
            SYNTHESIS,
            json!({
                "synthesis": "Rodent data are mixed; human data are observational.",
                "citations": ["Martin-Montalvo 2013", "Barzilai 2016"],
                "confidence": 0.55
            }),
        )
        .or_on(
            ANALYSIS,
            json!({ "findings": ["Confounding by indication"], "evidence_strength": "moderate", "confidence": 0.5 }),
        )
        .or_on(
            SELECT,
            json!({
                "sub_queries": [
                    { "agent_id": "literature", "query": "metformin lifespan RCT" },
                    { "agent_id": "clinical-trials", "query": "TAME trial status" }
                ],
                "parallel_agent_ids": ["literature"],
                "sequential_agent_ids": ["clinical-trials"],
                "rationale": "Trial data is missing"
            }),
        )
        .or_on(
            VALIDATION,
            json!({
                "validated_hypotheses": [{ "statement": "Metformin extends lifespan in mammals", "supported": false }],
                "success_criteria": ["Hazard ratio for all-cause mortality below 0.9"],
                "confidence": 0.5
            }),
        )
        .or_on(
            CONCLUSION,
            json!({
                "conclusion": "Evidence is insufficient to claim lifespan extension in humans [1].",
                "citations": ["Barzilai 2016", "Keys 2021"],
                "confidence": 0.45
            }),
        )
        .or_on(
            METACOGNITION,
            json!({ "reflection": "Observational bias", "biases": ["healthy user"], "calibrated_confidence": 0.4, "confidence": 0.4 }),
        )
        .or_on(
            SYNTHESIZE,
            json!({
                "final_answer": "Not yet: human lifespan benefit is unproven; the TAME trial is pending.",
                "confidence": 0.5,
                "conflicts_detected": [],
                "citations": ["TAME protocol"]
            }),
        )
}

pub(crate) struct StaticSearch {
    kind: BackendKind,
    hits: Vec<SearchHit>,
}

impl StaticSearch {
    pub(crate) fn new(kind: BackendKind, hits: Vec<SearchHit>) -> Self {
        Self { kind, hits }
    }
}

#[async_trait]
impl SearchBackend for StaticSearch {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<SearchHit>, SearchError> {
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

pub(crate) struct FailingSearch {
    kind: BackendKind,
}

impl FailingSearch {
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl SearchBackend for FailingSearch {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::Unavailable(format!("{} backend is down", self.kind)))
    }
}

/// Agent invoker that echoes its input, fails for chosen ids and tracks
/// dispatch order and peak concurrency.
#[derive(Default)]
pub(crate) struct RecordingAgents {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingAgents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(mut self, agent_id: &str) -> Self {
        self.failing.insert(agent_id.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for RecordingAgents {
    async fn invoke(&self, agent_id: &str, sub_query: &str) -> Result<Value, AgentError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((agent_id.to_string(), sub_query.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(agent_id) {
            return Err(AgentError::RequestFailed(format!("{} is down", agent_id)));
        }
        Ok(json!({ "agent": agent_id, "answer": format!("findings for {}", sub_query) }))
    }
}

/// Router state wired to scripted collaborators
pub(crate) fn test_app_state(script: &ScriptedLLM, streaming: bool) -> crate::models::AppState {
    use crate::agents::AgentRegistry;
    use crate::method::{MethodConfig, MethodConfigStore};
    use crate::metrics::MetricsController;
    use crate::pipeline::Orchestrator;
    use crate::search::SearchFusionEngine;

    let mut config = crate::config::Config::load(None).unwrap();
    config.server.streaming_enabled = streaming;
    let mut method = MethodConfig::builtin().unwrap();
    method.supervisor_enabled = false;
    let store = MethodConfigStore::new(method);
    let metrics = Arc::new(MetricsController::new(store.clone(), config.metrics.window));
    let search = SearchFusionEngine::new(5, 10).with_backend(
        Arc::new(StaticSearch::new(
            BackendKind::Vector,
            vec![SearchHit {
                id: "doc-1".to_string(),
                score: 1.0,
                payload: json!({ "title": "Metformin review" }),
            }],
        )),
        1.0,
    );
    let orchestrator = Orchestrator::new(store, script.llm(), search, AgentRegistry::research_defaults(), None)
        .with_metrics(Arc::clone(&metrics))
        .with_streaming(streaming);
    crate::models::AppState::new(config, Arc::new(orchestrator), metrics)
}
