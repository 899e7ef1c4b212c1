//! Reasoning-step executor: one schema-validated completion per phase,
//! retried with exponential backoff and temperature decay.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::context::{ExecutionContext, PhaseResult};
use super::mapper::{map_inputs, ResolvedInputs};
use super::template::{build_prompt, preamble, render};
use super::PhaseExecutor;
use crate::llm::LLM;
use crate::method::{MethodConfig, PhaseConfig};
use crate::utils::retry::{with_retry, RetryOutcome};

/// Output fix-up applied before schema validation
pub type Normalizer = fn(&mut Value);

#[derive(Debug, Error)]
enum StepError {
    #[error("completion failed: {0}")]
    Completion(String),

    #[error("response is not valid JSON: {0}")]
    Parse(String),

    #[error("response does not match output schema: {0}")]
    Schema(String),
}

pub struct ReasoningExecutor {
    llm: Arc<LLM>,
}

impl ReasoningExecutor {
    pub fn new(llm: Arc<LLM>) -> Self {
        Self { llm }
    }

    pub fn llm(&self) -> &Arc<LLM> {
        &self.llm
    }

    /// Render, complete, parse and validate, retrying per the phase policy.
    ///
    /// `extra` supplies template values that are not input mappings (e.g. the
    /// supervisor's complexity tier).
    pub async fn run_step(
        &self,
        phase: &PhaseConfig,
        config: &MethodConfig,
        inputs: &ResolvedInputs,
        extra: &BTreeMap<String, String>,
        normalize: Option<Normalizer>,
    ) -> PhaseResult {
        let started = Instant::now();
        let phase_id = phase.phase_id.as_str();

        let schema = match JSONSchema::compile(&phase.output_schema) {
            Ok(schema) => schema,
            Err(e) => {
                return PhaseResult::failed(phase_id, format!("invalid output schema: {}", e), 0);
            }
        };

        let body = render(&phase.prompt_template, inputs, extra);
        let prompt = build_prompt(&preamble(config), &body, &phase.output_schema);
        let system_prompt = phase.system_prompt.as_deref();
        let max_tokens = phase.model_params.max_tokens;

        let responses: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let schema_valid = AtomicU32::new(0);
        let last_temperature = Mutex::new(phase.model_params.temperature);

        let outcome = with_retry(&phase.retry_policy, phase.model_params.temperature, |attempt, temperature| {
            let llm = &self.llm;
            let prompt = prompt.as_str();
            let schema = &schema;
            let responses = &responses;
            let schema_valid = &schema_valid;
            let last_temperature = &last_temperature;
            async move {
                debug!(phase_id, attempt, temperature, "Requesting completion");
                if let Ok(mut t) = last_temperature.lock() {
                    *t = temperature;
                }

                let text = llm
                    .complete(prompt, temperature, max_tokens, system_prompt)
                    .await
                    .map_err(|e| StepError::Completion(e.to_string()))?;
                if let Ok(mut log) = responses.lock() {
                    log.push(text.clone());
                }

                let mut value = parse_json_response(&text).map_err(StepError::Parse)?;
                if let Some(normalize) = normalize {
                    normalize(&mut value);
                }

                if let Err(errors) = schema.validate(&value) {
                    let reasons = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                    warn!(phase_id, attempt, reasons = %reasons, "Schema validation failed");
                    return Err(StepError::Schema(reasons));
                }

                schema_valid.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        let attempts = outcome.attempts();
        let responses = responses.into_inner().unwrap_or_default();
        let final_temperature = last_temperature.into_inner().unwrap_or(phase.model_params.temperature);

        let result = match outcome {
            RetryOutcome::Success { value, .. } => {
                info!(phase_id, attempts, duration_ms = elapsed, "Reasoning step succeeded");
                PhaseResult::success(phase_id, value, elapsed)
            }
            RetryOutcome::Exhausted { last_error, .. } => {
                warn!(phase_id, attempts, error = %last_error, "Reasoning step exhausted retries");
                PhaseResult::failed(phase_id, last_error.to_string(), elapsed)
            }
        };

        result
            .with_metadata("prompt", prompt.clone())
            .with_metadata("system_prompt", system_prompt.map(str::to_string))
            .with_metadata("model", self.llm.model())
            .with_metadata("attempts", attempts)
            .with_metadata("completions", responses.len() as u64)
            .with_metadata("schema_valid_attempts", schema_valid.into_inner())
            .with_metadata("final_temperature", f64::from(final_temperature))
            .with_metadata("responses", responses)
    }
}

#[async_trait]
impl PhaseExecutor for ReasoningExecutor {
    async fn execute(&self, phase: &PhaseConfig, config: &MethodConfig, ctx: &ExecutionContext) -> PhaseResult {
        let inputs = map_inputs(&phase.input_mapping, ctx);
        self.run_step(phase, config, &inputs, &BTreeMap::new(), None).await
    }
}

/// Extract a JSON value from model text: the whole text, else the first
/// fenced block, else the outermost `{...}` span.
pub fn parse_json_response(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(block) {
            return Ok(value);
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
        }
        _ => Err("no JSON object found in response".to_string()),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // skip the language tag line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}
