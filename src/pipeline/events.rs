use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::context::{PhaseResult, PhaseStatus};
use super::orchestrator::QueryOutcome;
use crate::method::{ExecutorKind, PhaseConfig};

/// Progress of one query, emitted in pipeline order
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    PhaseStart {
        phase_id: String,
        name: String,
        executor_kind: ExecutorKind,
        /// Always `running`
        status: PhaseStatus,
        index: usize,
        total: usize,
    },
    #[serde(rename_all = "camelCase")]
    PhaseComplete {
        phase_id: String,
        status: PhaseStatus,
        confidence: f64,
        duration_ms: u64,
        output: serde_json::Value,
    },
    FinalResult {
        result: Box<QueryOutcome>,
    },
    Error {
        message: String,
    },
    Done,
}

impl PipelineEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::PhaseStart { .. } => "phase_start",
            PipelineEvent::PhaseComplete { .. } => "phase_complete",
            PipelineEvent::FinalResult { .. } => "final_result",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done | PipelineEvent::Error { .. })
    }

    pub fn phase_start(phase: &PhaseConfig, index: usize, total: usize) -> Self {
        PipelineEvent::PhaseStart {
            phase_id: phase.phase_id.clone(),
            name: phase.display_name().to_string(),
            executor_kind: phase.executor_kind,
            status: PhaseStatus::Running,
            index,
            total,
        }
    }

    pub fn phase_complete(result: &PhaseResult) -> Self {
        PipelineEvent::PhaseComplete {
            phase_id: result.phase_id.clone(),
            status: result.status,
            confidence: result.confidence,
            duration_ms: result.duration_ms,
            output: result.output.clone(),
        }
    }
}

/// Optional event sink; sending never fails the pipeline
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}
