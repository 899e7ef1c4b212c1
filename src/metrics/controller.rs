use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{ImprovementAction, ImprovementSuggestion, MetricsSummary, QueryMetrics, TargetMetric};
use crate::method::{ConfigHistoryEntry, MethodConfig, MethodConfigError, MethodConfigStore};

const MAX_RETRIES_CAP: u32 = 10;
const TEMPERATURE_FACTOR: f32 = 0.9;

/// Outcome of one improvement cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementReport {
    pub previous_version: String,
    /// `None` when every target was met
    pub new_version: Option<String>,
    pub summary: MetricsSummary,
    pub suggestions: Vec<ImprovementSuggestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub config_version: String,
    pub window_size: usize,
    pub samples_in_window: usize,
    pub total_recorded: u64,
    pub last_summary: Option<MetricsSummary>,
    pub history: Vec<ConfigHistoryEntry>,
}

#[derive(Default)]
struct ControllerState {
    window: Vec<QueryMetrics>,
    total_recorded: u64,
    last_summary: Option<MetricsSummary>,
}

/// Rolling metrics window plus the improvement cycle.
///
/// The state lock is held for the whole record-analyze-publish sequence so a
/// window is analysed exactly once and versions are published one at a time.
pub struct MetricsController {
    store: MethodConfigStore,
    window_size: usize,
    log_path: Option<PathBuf>,
    state: Mutex<ControllerState>,
}

impl MetricsController {
    pub fn new(store: MethodConfigStore, window_size: usize) -> Self {
        Self {
            store,
            window_size: window_size.max(1),
            log_path: None,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Append every sample as a JSON line to `path`
    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub async fn current_config(&self) -> Arc<MethodConfig> {
        self.store.current().await
    }

    /// Record one sample; runs an improvement cycle when the window fills
    pub async fn record(&self, metrics: QueryMetrics) -> Result<Option<ImprovementReport>, MethodConfigError> {
        self.append_log(&metrics).await;

        let mut state = self.state.lock().await;
        state.window.push(metrics);
        state.total_recorded += 1;

        if state.window.len() < self.window_size {
            return Ok(None);
        }

        self.run_cycle(&mut state).await.map(Some)
    }

    /// Analyse the current window immediately, regardless of its size
    pub async fn analyze_and_improve(&self) -> Result<Option<ImprovementReport>, MethodConfigError> {
        let mut state = self.state.lock().await;
        if state.window.is_empty() {
            return Ok(None);
        }
        self.run_cycle(&mut state).await.map(Some)
    }

    /// The window is cleared only once the cycle succeeds. On failure the
    /// most recent `window_size` samples are kept for the next attempt.
    async fn run_cycle(&self, state: &mut ControllerState) -> Result<ImprovementReport, MethodConfigError> {
        match self.improve(&state.window, state.last_summary.as_ref()).await {
            Ok(report) => {
                state.window.clear();
                state.last_summary = Some(report.summary.clone());
                Ok(report)
            }
            Err(e) => {
                let excess = state.window.len().saturating_sub(self.window_size);
                state.window.drain(..excess);
                warn!(error = %e, samples = state.window.len(), "Improvement cycle failed, keeping metrics window");
                Err(e)
            }
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let config = self.store.current().await;
        let state = self.state.lock().await;
        MetricsSnapshot {
            config_version: config.version.clone(),
            window_size: self.window_size,
            samples_in_window: state.window.len(),
            total_recorded: state.total_recorded,
            last_summary: state.last_summary.clone(),
            history: config.history.clone(),
        }
    }

    async fn improve(
        &self,
        samples: &[QueryMetrics],
        previous: Option<&MetricsSummary>,
    ) -> Result<ImprovementReport, MethodConfigError> {
        let config = self.store.current().await;
        let summary = MetricsSummary::from_samples(samples, &config.quality_targets)
            .ok_or_else(|| MethodConfigError::Invalid("empty metrics window".to_string()))?;
        let suggestions = suggest(&summary, &config);

        info!(
            samples = summary.samples,
            schema_valid_rate = summary.mean_schema_valid_rate,
            quality_score = summary.quality_score,
            suggestions = suggestions.len(),
            "Analysed metrics window"
        );

        if suggestions.is_empty() {
            return Ok(ImprovementReport {
                previous_version: config.version.clone(),
                new_version: None,
                summary,
                suggestions,
            });
        }

        let revised = apply(&config, &suggestions, &summary, previous)?;
        let published = self.store.publish(revised).await?;

        Ok(ImprovementReport {
            previous_version: config.version.clone(),
            new_version: Some(published.version.clone()),
            summary,
            suggestions,
        })
    }

    async fn append_log(&self, metrics: &QueryMetrics) {
        let Some(path) = &self.log_path else {
            return;
        };
        let line = match serde_json::to_string(metrics) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize query metrics");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %parent.display(), error = %e, "Failed to create metrics log directory");
                    return;
                }
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await;
        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    warn!(path = %path.display(), error = %e, "Failed to append metrics log");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to open metrics log"),
        }
    }
}

/// One suggestion per metric that misses its target
pub fn suggest(summary: &MetricsSummary, config: &MethodConfig) -> Vec<ImprovementSuggestion> {
    let targets = &config.quality_targets;
    let mut suggestions = Vec::new();

    if summary.mean_schema_valid_rate < targets.schema_valid_rate {
        let retries_saturated = config
            .phases
            .iter()
            .all(|p| p.retry_policy.max_retries >= MAX_RETRIES_CAP);
        let action = if retries_saturated {
            ImprovementAction::LowerTemperature {
                factor: TEMPERATURE_FACTOR,
            }
        } else {
            ImprovementAction::IncreaseRetries { by: 1 }
        };
        suggestions.push(ImprovementSuggestion {
            target_metric: TargetMetric::SchemaValidRate,
            current_value: summary.mean_schema_valid_rate,
            target_value: targets.schema_valid_rate,
            action,
        });
    }

    if let Some(error) = summary.mean_calibration_error {
        if error > targets.max_calibration_error {
            suggestions.push(ImprovementSuggestion {
                target_metric: TargetMetric::CalibrationError,
                current_value: error,
                target_value: targets.max_calibration_error,
                action: ImprovementAction::AddGuideline {
                    text: "Lower stated confidence when evidence is indirect, observational or conflicting."
                        .to_string(),
                },
            });
        }
    }

    if summary.mean_vague_criteria > targets.max_vague_criteria {
        suggestions.push(ImprovementSuggestion {
            target_metric: TargetMetric::VagueCriteria,
            current_value: summary.mean_vague_criteria,
            target_value: targets.max_vague_criteria,
            action: ImprovementAction::AddGuideline {
                text: "State falsification and success criteria as measurable thresholds without hedging words."
                    .to_string(),
            },
        });
    }

    if summary.mean_citations < targets.min_citations {
        suggestions.push(ImprovementSuggestion {
            target_metric: TargetMetric::Citations,
            current_value: summary.mean_citations,
            target_value: targets.min_citations,
            action: ImprovementAction::AddGuideline {
                text: format!(
                    "Cite at least {} specific sources by title or identifier.",
                    targets.min_citations.ceil() as u32
                ),
            },
        });
    }

    suggestions
}

/// Derive the next method version with `suggestions` applied
pub fn apply(
    config: &MethodConfig,
    suggestions: &[ImprovementSuggestion],
    summary: &MetricsSummary,
    previous: Option<&MetricsSummary>,
) -> Result<MethodConfig, MethodConfigError> {
    let mut revised = config.clone();

    for suggestion in suggestions {
        match &suggestion.action {
            ImprovementAction::LowerTemperature { factor } => {
                for phase in &mut revised.phases {
                    phase.model_params.temperature = (phase.model_params.temperature * factor).max(0.0);
                }
            }
            ImprovementAction::IncreaseRetries { by } => {
                for phase in &mut revised.phases {
                    phase.retry_policy.max_retries = (phase.retry_policy.max_retries + by).min(MAX_RETRIES_CAP);
                }
            }
            ImprovementAction::AddGuideline { text } => {
                if !revised.guidelines.iter().any(|g| g == text) {
                    revised.guidelines.push(text.clone());
                }
            }
        }
    }

    revised.version = config.next_version()?;
    revised.history.push(ConfigHistoryEntry {
        version: revised.version.clone(),
        previous_version: config.version.clone(),
        prior_quality_score: previous.map(|s| s.quality_score),
        new_quality_score: summary.quality_score,
        suggestions: suggestions.to_vec(),
        timestamp: Utc::now(),
    });

    info!(
        previous = %config.version,
        version = %revised.version,
        suggestions = suggestions.len(),
        "Derived improved method config"
    );
    Ok(revised)
}
