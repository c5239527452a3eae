//! Reranker Chain
//!
//! Three-stage ordered fallback over recalled candidates:
//!
//! 1. LLM-as-scorer with a per-candidate latency budget
//! 2. cross-encoder pairwise scorer (`embeddings` feature)
//! 3. heuristic scorer, always available, never fails
//!
//! Any stage error falls through to the next. Whatever stage wins, the
//! output is a permutation of the input with `final_score` in [0, 1] and a
//! `reranker_used` tag.

#[cfg(feature = "embeddings")]
mod cross_encoder;
mod heuristic;
mod llm;

#[cfg(feature = "embeddings")]
pub use cross_encoder::CrossEncoderReranker;
pub use heuristic::HeuristicReranker;
pub use llm::{DEFAULT_SCORE_BUDGET, LlmReranker, ScoreModel};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Reranker error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum RerankerError {
    /// Failed to initialize a reranker model
    #[error("Reranker initialization failed: {0}")]
    ModelInit(String),
    /// Scoring failed mid-stage
    #[error("Reranking failed: {0}")]
    ScoreFailed(String),
    /// A score call blew its latency budget
    #[error("scoring took {elapsed_ms}ms, budget {budget_ms}ms")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },
}

// ============================================================================
// CANDIDATES
// ============================================================================

/// A recalled brick moving through the chain
#[derive(Debug, Clone, Serialize)]
pub struct RerankCandidate {
    pub brick_id: String,
    pub brick_text: String,
    /// Confidence from the vector stage, already in [0, 1]
    pub base_confidence: f32,
    pub scope: String,
    /// Score assigned by whichever stage handled the batch
    pub final_score: f32,
    /// Which stage scored this batch
    pub reranker_used: String,
}

impl RerankCandidate {
    pub fn new(
        brick_id: impl Into<String>,
        brick_text: impl Into<String>,
        base_confidence: f32,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            brick_id: brick_id.into(),
            brick_text: brick_text.into(),
            base_confidence,
            scope: scope.into(),
            final_score: base_confidence,
            reranker_used: "none".to_string(),
        }
    }
}

// ============================================================================
// CHAIN
// ============================================================================

/// The ordered fallback chain
pub struct RerankerChain {
    primary: Option<LlmReranker>,
    #[cfg(feature = "embeddings")]
    secondary: Option<CrossEncoderReranker>,
    tertiary: HeuristicReranker,
}

impl Default for RerankerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RerankerChain {
    /// Heuristic-only chain; stages are opted in explicitly
    pub fn new() -> Self {
        Self {
            primary: None,
            #[cfg(feature = "embeddings")]
            secondary: None,
            tertiary: HeuristicReranker::new(),
        }
    }

    /// Attach the primary scoring model
    pub fn with_score_model(mut self, model: Arc<dyn ScoreModel>, budget: Duration) -> Self {
        self.primary = Some(LlmReranker::with_budget(model, budget));
        self
    }

    /// Try to load the cross-encoder; on failure the chain just logs and
    /// continues without a secondary stage
    #[cfg(feature = "embeddings")]
    pub fn with_cross_encoder(mut self) -> Self {
        match CrossEncoderReranker::new() {
            Ok(model) => self.secondary = Some(model),
            Err(e) => tracing::warn!("cross-encoder unavailable, chain will fall through: {e}"),
        }
        self
    }

    /// Rank candidates, falling through on any stage failure. Conservation:
    /// the output is always a permutation of the input.
    pub fn rank(&mut self, query: &str, candidates: Vec<RerankCandidate>) -> Vec<RerankCandidate> {
        if candidates.is_empty() {
            return candidates;
        }

        if let Some(primary) = &self.primary {
            match primary.rank(query, candidates.clone()) {
                Ok(ranked) => return ranked,
                Err(e) => tracing::debug!("primary reranker fell through: {e}"),
            }
        }

        #[cfg(feature = "embeddings")]
        if let Some(secondary) = &mut self.secondary {
            match secondary.rank(query, candidates.clone()) {
                Ok(ranked) => return ranked,
                Err(e) => tracing::debug!("secondary reranker fell through: {e}"),
            }
        }

        self.tertiary.rank(query, candidates)
    }
}

// ============================================================================
// TESTS
// ============================================================================
