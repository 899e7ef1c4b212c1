//! Search Module
//!
//! Hybrid retrieval over independent backends:
//! - Vector: dense similarity search
//! - Graph: knowledge-graph traversal
//! - Relational: structured lookup
//!
//! The fusion engine queries every configured backend concurrently and merges
//! the ranked lists by per-backend weight. A backend that errors or times out
//! contributes nothing and its weight is redistributed over the others.

pub mod http;

pub use http::HttpSearchBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during search operations
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search backend unavailable: {0}")]
    Unavailable(String),

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search results: {0}")]
    ParseError(String),

    #[error("Search backend timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Vector,
    Graph,
    Relational,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Vector, BackendKind::Graph, BackendKind::Relational];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Vector => "vector",
            BackendKind::Graph => "graph",
            BackendKind::Relational => "relational",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked hit as returned by a single backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One fused retrieval hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// Backend with the largest share of the fused score
    pub source: BackendKind,
    pub score: f64,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Ranked top-`top_k` hits for `query`
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, SearchError>;
}

struct WeightedBackend {
    backend: Arc<dyn SearchBackend>,
    weight: f64,
}

pub struct SearchFusionEngine {
    backends: Vec<WeightedBackend>,
    top_k: usize,
    max_results: usize,
    timeout: Duration,
}

impl SearchFusionEngine {
    pub fn new(top_k: usize, max_results: usize) -> Self {
        Self {
            backends: Vec::new(),
            top_k: top_k.max(1),
            max_results,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>, weight: f64) -> Self {
        let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        self.backends.push(WeightedBackend { backend, weight });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backends.iter().any(|b| b.backend.kind() == kind)
    }

    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.backend.kind()).collect()
    }

    /// Query every backend concurrently and fuse the ranked lists. Never fails:
    /// with no responding backend the result is empty.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        if self.backends.is_empty() {
            debug!("No search backends configured");
            return Vec::new();
        }

        let requests = self.backends.iter().map(|wb| async move {
            let kind = wb.backend.kind();
            let outcome = match tokio::time::timeout(self.timeout, wb.backend.search(query, self.top_k)).await {
                Ok(result) => result,
                Err(_) => Err(SearchError::Timeout(self.timeout)),
            };
            (kind, wb.weight, outcome)
        });

        let mut responded = Vec::new();
        for (kind, weight, outcome) in join_all(requests).await {
            match outcome {
                Ok(mut hits) => {
                    hits.truncate(self.top_k);
                    debug!(backend = %kind, hits = hits.len(), "Search backend responded");
                    responded.push((kind, weight, hits));
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Search backend unavailable, excluding from fusion");
                }
            }
        }

        let fused = fuse(responded, self.max_results);
        info!(results = fused.len(), "Search fusion complete");
        fused
    }
}

struct Candidate {
    score: f64,
    best_share: f64,
    source: BackendKind,
    payload: serde_json::Value,
    first_seen: usize,
}

/// Weighted fusion of per-backend ranked lists.
///
/// Scores are normalised per backend by its top score, multiplied by the
/// backend weight renormalised over the backends that responded, and summed
/// for ids returned by several backends.
fn fuse(responded: Vec<(BackendKind, f64, Vec<SearchHit>)>, max_results: usize) -> Vec<SearchResult> {
    let total_weight: f64 = responded.iter().map(|(_, w, _)| *w).sum();
    let backends = responded.len();

    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let mut order = 0usize;

    for (kind, weight, hits) in responded {
        let share_weight = if total_weight > 0.0 {
            weight / total_weight
        } else {
            1.0 / backends as f64
        };
        let top = hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);

        for hit in hits {
            let normalized = if top > 0.0 {
                (hit.score / top).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let share = normalized * share_weight;

            match candidates.get_mut(&hit.id) {
                Some(existing) => {
                    existing.score += share;
                    if share > existing.best_share {
                        existing.best_share = share;
                        existing.source = kind;
                        existing.payload = hit.payload;
                    }
                }
                None => {
                    candidates.insert(
                        hit.id,
                        Candidate {
                            score: share,
                            best_share: share,
                            source: kind,
                            payload: hit.payload,
                            first_seen: order,
                        },
                    );
                    order += 1;
                }
            }
        }
    }

    let mut fused: Vec<(String, Candidate)> = candidates.into_iter().collect();
    fused.sort_by(|(_, a), (_, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.first_seen.cmp(&b.first_seen))
    });
    fused.truncate(max_results);

    fused
        .into_iter()
        .map(|(id, c)| SearchResult {
            id,
            source: c.source,
            score: c.score,
            payload: c.payload,
        })
        .collect()
}
