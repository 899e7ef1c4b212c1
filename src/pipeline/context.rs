use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::search::SearchResult;

/// Per-phase state. `Success`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Success | PhaseStatus::Failed | PhaseStatus::Skipped)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Success => write!(f, "success"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one phase, written once into the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub phase_id: String,
    pub status: PhaseStatus,
    pub output: Value,
    pub confidence: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PhaseResult {
    /// Successful result; confidence is read from `output.confidence`
    pub fn success(phase_id: impl Into<String>, output: Value, duration_ms: u64) -> Self {
        let confidence = confidence_from_output(&output).unwrap_or(0.5);
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::Success,
            output,
            confidence,
            duration_ms,
            metadata: Map::new(),
        }
    }

    /// Failed result carrying the error in `output.error`
    pub fn failed(phase_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::Failed,
            output: serde_json::json!({ "error": error.into() }),
            confidence: 0.0,
            duration_ms,
            metadata: Map::new(),
        }
    }

    pub fn skipped(phase_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::Skipped,
            output: serde_json::json!({ "reason": reason.into() }),
            confidence: 0.0,
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PhaseStatus::Success
    }

    pub fn error(&self) -> Option<&str> {
        self.output.get("error").and_then(|v| v.as_str())
    }
}

/// `output.confidence` clamped to [0, 1]
pub fn confidence_from_output(output: &Value) -> Option<f64> {
    output
        .get("confidence")
        .and_then(|v| v.as_f64())
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

/// Mutable state of one in-flight query. Owned by a single orchestrator run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub query_id: Uuid,
    pub user_query: String,
    pub search_results: Vec<SearchResult>,
    phase_results: Vec<PhaseResult>,
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            user_query: user_query.into(),
            search_results: Vec::new(),
            phase_results: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Append a phase result. A phase is written at most once; a second write
    /// for the same id is refused.
    pub fn record(&mut self, result: PhaseResult) -> bool {
        if self.phase(&result.phase_id).is_some() {
            warn!(phase_id = %result.phase_id, "Phase result already recorded, ignoring");
            return false;
        }
        self.phase_results.push(result);
        true
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|r| r.phase_id == phase_id)
    }

    /// Results in pipeline order
    pub fn phase_results(&self) -> &[PhaseResult] {
        &self.phase_results
    }

    pub fn into_phase_results(self) -> Vec<PhaseResult> {
        self.phase_results
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}
