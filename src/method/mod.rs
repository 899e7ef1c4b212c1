//! Method Configuration
//!
//! The versioned, declarative description of the reasoning pipeline: which
//! phases run, in what order, which executor handles each one, how inputs
//! flow between phases and what each phase must return.
//!
//! A `MethodConfig` is an immutable value. The metrics controller never edits
//! one in place; it derives a new version and publishes it through
//! [`MethodConfigStore`].

pub mod store;

pub use store::MethodConfigStore;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use validator::Validate;

use crate::metrics::ImprovementSuggestion;
use crate::pipeline::mapper::{InputPath, PathRoot};

const DEFAULT_METHOD_DOCUMENT: &str = include_str!("../../config/default_method.json");

/// Errors raised while loading or validating a method configuration.
///
/// These are fatal at startup: a service with a malformed configuration must
/// not accept queries.
#[derive(Debug, Error)]
pub enum MethodConfigError {
    #[error("failed to read method config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed method config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid method config: {0}")]
    Invalid(String),

    #[error("duplicate phase id `{0}`")]
    DuplicatePhase(String),

    #[error("phase `{phase}` has an invalid input path `{path}`: {reason}")]
    InvalidPath {
        phase: String,
        path: String,
        reason: String,
    },

    #[error("phase `{phase}` maps `{name}` to `{path}`, which is not an earlier phase")]
    ForwardReference {
        phase: String,
        name: String,
        path: String,
    },

    #[error("conditional phase `{0}` is not declared")]
    UnknownConditionalPhase(String),

    #[error("supervisor phase `{0}` does not declare a method")]
    MissingMethod(String),

    #[error("phase `{phase}` has an invalid output schema: {reason}")]
    InvalidSchema { phase: String, reason: String },

    #[error("invalid version `{0}`, expected major.minor.patch")]
    InvalidVersion(String),
}

/// Which executor runs a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorKind {
    Reasoning,
    Supervisor,
    #[serde(alias = "agent_coordination", alias = "agent-coordination")]
    AgentCoordination,
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::Reasoning => write!(f, "reasoning"),
            ExecutorKind::Supervisor => write!(f, "supervisor"),
            ExecutorKind::AgentCoordination => write!(f, "agentCoordination"),
        }
    }
}

/// Supervisor operation selected by `PhaseConfig::method`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorMethod {
    #[serde(alias = "select_agents")]
    SelectAgents,
    #[serde(alias = "synthesize_results")]
    SynthesizeResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    #[validate(range(min = 0.0, max = 2.0))]
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[validate(range(min = 1, max = 200000))]
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[validate(range(max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_temperature_decay")]
    pub temperature_decay: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            temperature_decay: default_temperature_decay(),
        }
    }
}

/// One phase's declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PhaseConfig {
    #[validate(length(min = 1))]
    pub phase_id: String,
    #[serde(default)]
    pub name: String,
    pub executor_kind: ExecutorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SupervisorMethod>,
    /// Input name -> dotted context path
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_output_schema")]
    pub output_schema: serde_json::Value,
    #[validate(nested)]
    #[serde(default)]
    pub model_params: ModelParams,
    #[validate(nested)]
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[validate(range(min = 1))]
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub critical: bool,
}

impl PhaseConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.phase_id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfig {
    /// Phases that only run while `supervisorEnabled` is set
    #[serde(default)]
    pub conditional_phase_ids: Vec<String>,
    /// Phase whose output is the answer when no supervisor synthesis ran
    #[validate(length(min = 1))]
    #[serde(default = "default_conclusion_phase")]
    pub conclusion_phase_id: String,
    /// Upper bound on concurrent agent dispatches
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_max_parallel")]
    pub max_parallel_agents: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            conditional_phase_ids: Vec::new(),
            conclusion_phase_id: default_conclusion_phase(),
            max_parallel_agents: default_max_parallel(),
        }
    }
}

/// Quality thresholds the improvement cycle compares window aggregates against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QualityTargets {
    #[validate(range(min = 0.0, max = 1.0))]
    pub schema_valid_rate: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_calibration_error: f64,
    #[validate(range(min = 0.0))]
    pub max_vague_criteria: f64,
    #[validate(range(min = 0.0))]
    pub min_citations: f64,
}

impl Default for QualityTargets {
    fn default() -> Self {
        Self {
            schema_valid_rate: 0.98,
            max_calibration_error: 0.15,
            max_vague_criteria: 1.0,
            min_citations: 3.0,
        }
    }
}

/// Record of one improvement cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigHistoryEntry {
    pub version: String,
    pub previous_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_quality_score: Option<f64>,
    pub new_quality_score: f64,
    pub suggestions: Vec<ImprovementSuggestion>,
    pub timestamp: DateTime<Utc>,
}

/// One versioned pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MethodConfig {
    #[validate(length(min = 1))]
    pub version: String,
    #[serde(default)]
    pub supervisor_enabled: bool,
    /// Shared reasoning instructions prepended to every reasoning prompt
    #[serde(default)]
    pub reasoning_preamble: String,
    #[serde(default)]
    pub guidelines: Vec<String>,
    #[validate(length(min = 1), nested)]
    pub phases: Vec<PhaseConfig>,
    #[validate(nested)]
    #[serde(default)]
    pub orchestration_config: OrchestrationConfig,
    #[validate(nested)]
    #[serde(default)]
    pub quality_targets: QualityTargets,
    #[serde(default)]
    pub history: Vec<ConfigHistoryEntry>,
}

impl MethodConfig {
    /// Parse and validate a JSON method document
    pub fn from_json(document: &str) -> Result<Self, MethodConfigError> {
        let config: MethodConfig = serde_json::from_str(document)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and validate a method document from disk
    pub async fn load(path: &Path) -> Result<Self, MethodConfigError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MethodConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_json(&document)?;
        info!(
            path = %path.display(),
            version = %config.version,
            phases = config.phases.len(),
            "Loaded method config"
        );
        Ok(config)
    }

    /// The built-in scientific-method document
    pub fn builtin() -> Result<Self, MethodConfigError> {
        Self::from_json(DEFAULT_METHOD_DOCUMENT)
    }

    pub fn to_json_pretty(&self) -> Result<String, MethodConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    pub fn is_conditional(&self, phase_id: &str) -> bool {
        self.orchestration_config
            .conditional_phase_ids
            .iter()
            .any(|id| id == phase_id)
    }

    /// Conditional phases are skipped while the supervisor layer is off
    pub fn should_skip(&self, phase: &PhaseConfig) -> bool {
        !self.supervisor_enabled && self.is_conditional(&phase.phase_id)
    }

    pub fn has_executor(&self, kind: ExecutorKind) -> bool {
        self.phases.iter().any(|p| p.executor_kind == kind)
    }

    /// Version with the minor component incremented and patch reset
    pub fn next_version(&self) -> Result<String, MethodConfigError> {
        let (major, minor, _) = parse_version(&self.version)?;
        Ok(format!("{}.{}.0", major, minor + 1))
    }

    /// Full validation: field ranges, then the structural rules the
    /// orchestrator relies on.
    pub fn check(&self) -> Result<(), MethodConfigError> {
        self.validate()
            .map_err(|e| MethodConfigError::Invalid(e.to_string()))?;
        parse_version(&self.version)?;

        let mut seen: HashSet<&str> = HashSet::new();
        for phase in &self.phases {
            for (name, raw_path) in &phase.input_mapping {
                let path = InputPath::parse(raw_path).map_err(|reason| MethodConfigError::InvalidPath {
                    phase: phase.phase_id.clone(),
                    path: raw_path.clone(),
                    reason,
                })?;
                if let PathRoot::Phase(referenced) = path.root() {
                    if !seen.contains(referenced.as_str()) {
                        return Err(MethodConfigError::ForwardReference {
                            phase: phase.phase_id.clone(),
                            name: name.clone(),
                            path: raw_path.clone(),
                        });
                    }
                }
            }

            if !seen.insert(phase.phase_id.as_str()) {
                return Err(MethodConfigError::DuplicatePhase(phase.phase_id.clone()));
            }

            if phase.executor_kind == ExecutorKind::Supervisor && phase.method.is_none() {
                return Err(MethodConfigError::MissingMethod(phase.phase_id.clone()));
            }

            jsonschema::JSONSchema::compile(&phase.output_schema).map_err(|e| {
                MethodConfigError::InvalidSchema {
                    phase: phase.phase_id.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        for id in &self.orchestration_config.conditional_phase_ids {
            if !seen.contains(id.as_str()) {
                return Err(MethodConfigError::UnknownConditionalPhase(id.clone()));
            }
        }

        Ok(())
    }
}

/// Parse `major.minor.patch`
pub fn parse_version(version: &str) -> Result<(u64, u64, u64), MethodConfigError> {
    let parts: Vec<&str> = version.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(MethodConfigError::InvalidVersion(version.to_string()));
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|_| MethodConfigError::InvalidVersion(version.to_string()))?;
    }
    Ok((numbers[0], numbers[1], numbers[2]))
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_temperature_decay() -> f32 {
    0.9
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_conclusion_phase() -> String {
    "conclusion".to_string()
}

fn default_max_parallel() -> usize {
    5
}

fn default_output_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(phases: serde_json::Value) -> String {
        serde_json::json!({
            "version": "1.0.0",
            "supervisorEnabled": false,
            "phases": phases,
        })
        .to_string()
    }

    #[test]
    fn test_builtin_document_is_valid() {
        let config = MethodConfig::builtin().unwrap();
        assert!(config.phases.len() >= 6);
        assert!(config.phase("hypothesis").is_some());
        assert!(config.phase("conclusion").is_some());
        assert!(config.is_conditional("supervisor_select"));
        assert!(config.has_executor(ExecutorKind::AgentCoordination));
    }

    #[test]
    fn test_round_trip_preserves_pipeline_shape() {
        let config = MethodConfig::builtin().unwrap();
        let reloaded = MethodConfig::from_json(&config.to_json_pretty().unwrap()).unwrap();

        let ids = |c: &MethodConfig| c.phases.iter().map(|p| p.phase_id.clone()).collect::<Vec<_>>();
        let kinds = |c: &MethodConfig| c.phases.iter().map(|p| p.executor_kind).collect::<Vec<_>>();
        assert_eq!(ids(&config), ids(&reloaded));
        assert_eq!(kinds(&config), kinds(&reloaded));
        assert_eq!(
            config.orchestration_config.conditional_phase_ids,
            reloaded.orchestration_config.conditional_phase_ids
        );
    }

    #[test]
    fn test_forward_reference_rejected() {
        let doc = minimal(serde_json::json!([
            {
                "phaseId": "a",
                "executorKind": "reasoning",
                "inputMapping": { "later": "phases.b.output.x" }
            },
            { "phaseId": "b", "executorKind": "reasoning" }
        ]));
        let err = MethodConfig::from_json(&doc).unwrap_err();
        assert!(matches!(err, MethodConfigError::ForwardReference { .. }));
    }

    #[test]
    fn test_self_reference_rejected() {
        let doc = minimal(serde_json::json!([
            {
                "phaseId": "a",
                "executorKind": "reasoning",
                "inputMapping": { "me": "phases.a.output" }
            }
        ]));
        assert!(matches!(
            MethodConfig::from_json(&doc).unwrap_err(),
            MethodConfigError::ForwardReference { .. }
        ));
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let doc = minimal(serde_json::json!([
            { "phaseId": "a", "executorKind": "reasoning" },
            { "phaseId": "a", "executorKind": "reasoning" }
        ]));
        assert!(matches!(
            MethodConfig::from_json(&doc).unwrap_err(),
            MethodConfigError::DuplicatePhase(_)
        ));
    }

    #[test]
    fn test_supervisor_requires_method() {
        let doc = minimal(serde_json::json!([
            { "phaseId": "sup", "executorKind": "supervisor" }
        ]));
        assert!(matches!(
            MethodConfig::from_json(&doc).unwrap_err(),
            MethodConfigError::MissingMethod(_)
        ));
    }

    #[test]
    fn test_unknown_conditional_phase_rejected() {
        let doc = serde_json::json!({
            "version": "1.0.0",
            "phases": [{ "phaseId": "a", "executorKind": "reasoning" }],
            "orchestrationConfig": { "conditionalPhaseIds": ["ghost"] }
        })
        .to_string();
        assert!(matches!(
            MethodConfig::from_json(&doc).unwrap_err(),
            MethodConfigError::UnknownConditionalPhase(_)
        ));
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let doc = minimal(serde_json::json!([
            {
                "phaseId": "a",
                "executorKind": "reasoning",
                "modelParams": { "temperature": 3.5, "maxTokens": 100 }
            }
        ]));
        assert!(matches!(
            MethodConfig::from_json(&doc).unwrap_err(),
            MethodConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            MethodConfig::from_json("{ not json").unwrap_err(),
            MethodConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_version_handling() {
        assert_eq!(parse_version("2.4.1").unwrap(), (2, 4, 1));
        assert!(parse_version("2.4").is_err());
        assert!(parse_version("v2.x.1").is_err());

        let mut config = MethodConfig::builtin().unwrap();
        config.version = "1.3.7".to_string();
        assert_eq!(config.next_version().unwrap(), "1.4.0");
    }

    #[test]
    fn test_executor_kind_accepts_spellings() {
        for spelling in ["agentCoordination", "agent_coordination", "agent-coordination"] {
            let kind: ExecutorKind = serde_json::from_value(serde_json::json!(spelling)).unwrap();
            assert_eq!(kind, ExecutorKind::AgentCoordination);
        }
        assert!(serde_json::from_value::<ExecutorKind>(serde_json::json!("agent coordination")).is_err());
        assert_eq!(
            serde_json::to_value(ExecutorKind::AgentCoordination).unwrap(),
            "agentCoordination"
        );
    }

    #[test]
    fn test_skip_only_when_supervisor_disabled() {
        let mut config = MethodConfig::builtin().unwrap();
        let select = config.phase("supervisor_select").unwrap().clone();
        let hypothesis = config.phase("hypothesis").unwrap().clone();

        config.supervisor_enabled = false;
        assert!(config.should_skip(&select));
        assert!(!config.should_skip(&hypothesis));

        config.supervisor_enabled = true;
        assert!(!config.should_skip(&select));
    }
}
