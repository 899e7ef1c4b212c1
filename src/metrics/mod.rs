//! Quality Metrics
//!
//! One [`QueryMetrics`] sample is extracted from every completed query. The
//! [`MetricsController`] aggregates a window of samples, compares the
//! aggregates with the method's quality targets and, when a target is missed,
//! publishes a revised method configuration.

pub mod controller;

pub use controller::{ImprovementReport, MetricsController, MetricsSnapshot};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::method::QualityTargets;
use crate::pipeline::{PhaseStatus, QueryOutcome};

const HEDGE_TERMS: &[&str] = &[
    "may", "might", "could", "possibly", "perhaps", "probably", "likely", "some", "somewhat", "various",
    "generally", "relatively", "unclear", "appropriate", "adequate", "significant", "sufficient",
];

/// Quality signal for one completed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetrics {
    pub query_id: Uuid,
    pub config_version: String,
    /// Schema-valid completions / all completions
    pub schema_valid_rate: f64,
    pub predicted_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_confidence: Option<f64>,
    pub vague_criteria_count: u32,
    pub citation_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl QueryMetrics {
    pub fn from_outcome(outcome: &QueryOutcome) -> Self {
        let mut completions = 0u64;
        let mut valid = 0u64;
        let mut actual_confidence = None;
        let mut vague = 0u32;
        let mut citations: HashSet<String> = HashSet::new();

        for result in &outcome.phase_results {
            completions += result.metadata.get("completions").and_then(Value::as_u64).unwrap_or(0);
            valid += result
                .metadata
                .get("schema_valid_attempts")
                .and_then(Value::as_u64)
                .unwrap_or(0);

            if result.status != PhaseStatus::Success {
                continue;
            }
            if let Some(c) = calibrated_confidence(&result.output) {
                actual_confidence = Some(c);
            }
            vague += count_vague_criteria(&result.output, false);
            collect_citations(&result.output, &mut citations);
        }

        let markers = count_citation_markers(&outcome.answer);
        let schema_valid_rate = if completions == 0 {
            1.0
        } else {
            valid as f64 / completions as f64
        };

        Self {
            query_id: outcome.query_id,
            config_version: outcome.config_version.clone(),
            schema_valid_rate,
            predicted_confidence: outcome.confidence,
            actual_confidence,
            vague_criteria_count: vague,
            citation_count: citations.len() as u32 + markers,
            timestamp: Utc::now(),
        }
    }
}

fn calibrated_confidence(output: &Value) -> Option<f64> {
    output
        .get("calibrated_confidence")
        .or_else(|| output.get("calibratedConfidence"))
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

/// Criteria strings (under any key containing "criteria") that use hedging terms
fn count_vague_criteria(value: &Value, in_criteria: bool) -> u32 {
    match value {
        Value::String(text) if in_criteria => u32::from(is_vague(text)),
        Value::Array(items) => items.iter().map(|v| count_vague_criteria(v, in_criteria)).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| count_vague_criteria(v, in_criteria || key.to_lowercase().contains("criteria")))
            .sum(),
        _ => 0,
    }
}

fn is_vague(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| HEDGE_TERMS.contains(&w.to_lowercase().as_str()))
}

fn collect_citations(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match (key.as_str(), v) {
                    ("citations" | "sources", Value::Array(items)) => {
                        for item in items {
                            let text = match item {
                                Value::String(s) => s.trim().to_lowercase(),
                                other => other.to_string(),
                            };
                            if !text.is_empty() {
                                out.insert(text);
                            }
                        }
                    }
                    _ => collect_citations(v, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_citations(v, out)),
        _ => {}
    }
}

/// Distinct `[n]` reference markers
fn count_citation_markers(text: &str) -> u32 {
    let mut seen = HashSet::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) => {
                let inner = &after[..close];
                if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                    seen.insert(inner.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    seen.len() as u32
}

/// Aggregates over one window of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub samples: usize,
    pub mean_schema_valid_rate: f64,
    /// Mean |predicted - actual| over samples with an actual confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_calibration_error: Option<f64>,
    pub mean_vague_criteria: f64,
    pub mean_citations: f64,
    /// Composite score in [0,1]
    pub quality_score: f64,
}

impl MetricsSummary {
    pub fn from_samples(samples: &[QueryMetrics], targets: &QualityTargets) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = |f: fn(&QueryMetrics) -> f64| samples.iter().map(f).sum::<f64>() / n;

        let errors: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.actual_confidence.map(|a| (s.predicted_confidence - a).abs()))
            .collect();
        let mean_calibration_error = if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        };

        let mean_schema_valid_rate = mean(|s| s.schema_valid_rate);
        let mean_vague_criteria = mean(|s| f64::from(s.vague_criteria_count));
        let mean_citations = mean(|s| f64::from(s.citation_count));

        let citation_component = if targets.min_citations > 0.0 {
            (mean_citations / targets.min_citations).min(1.0)
        } else {
            1.0
        };
        let components = [
            mean_schema_valid_rate,
            1.0 - mean_calibration_error.unwrap_or(0.0).min(1.0),
            1.0 / (1.0 + mean_vague_criteria),
            citation_component,
        ];
        let quality_score = components.iter().sum::<f64>() / components.len() as f64;

        Some(Self {
            samples: samples.len(),
            mean_schema_valid_rate,
            mean_calibration_error,
            mean_vague_criteria,
            mean_citations,
            quality_score,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    SchemaValidRate,
    CalibrationError,
    VagueCriteria,
    Citations,
}

/// Concrete configuration edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImprovementAction {
    /// Multiply every phase temperature by `factor`
    LowerTemperature { factor: f32 },
    /// Add `by` retries to every phase, capped at the policy maximum
    IncreaseRetries { by: u32 },
    /// Append a method-level guideline
    AddGuideline { text: String },
}

/// One proposed config edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementSuggestion {
    pub target_metric: TargetMetric,
    pub current_value: f64,
    pub target_value: f64,
    pub action: ImprovementAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(rate: f64, predicted: f64, actual: Option<f64>, vague: u32, citations: u32) -> QueryMetrics {
        QueryMetrics {
            query_id: Uuid::new_v4(),
            config_version: "1.0.0".to_string(),
            schema_valid_rate: rate,
            predicted_confidence: predicted,
            actual_confidence: actual,
            vague_criteria_count: vague,
            citation_count: citations,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_vague_criteria_only_counts_criteria_keys() {
        let output = json!({
            "hypotheses": [
                { "statement": "X may cause Y", "falsification_criteria": "Effect might be small" },
                { "statement": "Z", "falsification_criteria": "HR above 1.2 in two cohorts" }
            ],
            "success_criteria": ["Some improvement", "p < 0.01"]
        });
        assert_eq!(count_vague_criteria(&output, false), 2);
    }

    #[test]
    fn test_citation_counting() {
        let mut found = HashSet::new();
        collect_citations(
            &json!({ "citations": ["A 2020", "a 2020 "], "nested": { "sources": [{ "doi": "10.1/x" }] } }),
            &mut found,
        );
        assert_eq!(found.len(), 2);
        assert_eq!(count_citation_markers("see [1], [2] and [1]; not [a]"), 2);
    }

    #[test]
    fn test_summary_aggregates() {
        let targets = QualityTargets::default();
        let samples = vec![
            sample(1.0, 0.8, Some(0.6), 0, 4),
            sample(0.5, 0.6, None, 2, 2),
        ];
        let summary = MetricsSummary::from_samples(&samples, &targets).unwrap();
        assert_eq!(summary.samples, 2);
        assert!((summary.mean_schema_valid_rate - 0.75).abs() < 1e-9);
        assert!((summary.mean_calibration_error.unwrap() - 0.2).abs() < 1e-9);
        assert!((summary.mean_vague_criteria - 1.0).abs() < 1e-9);
        assert!((summary.mean_citations - 3.0).abs() < 1e-9);
        assert!(summary.quality_score > 0.0 && summary.quality_score <= 1.0);
        assert!(MetricsSummary::from_samples(&[], &targets).is_none());
    }

    #[test]
    fn test_suggestion_serialization() {
        let suggestion = ImprovementSuggestion {
            target_metric: TargetMetric::SchemaValidRate,
            current_value: 0.92,
            target_value: 0.98,
            action: ImprovementAction::IncreaseRetries { by: 1 },
        };
        let value = serde_json::to_value(&suggestion).unwrap();
        assert_eq!(value["targetMetric"], "schema_valid_rate");
        assert_eq!(value["action"]["type"], "increase_retries");
    }
}
