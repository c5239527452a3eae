//! LLM-as-scorer Reranker
//!
//! Primary stage: a local scoring model rates each candidate's relevance in
//! [0, 1] under a per-candidate latency budget. Any scoring error or budget
//! breach fails the whole stage so the chain falls through; candidates are
//! never partially scored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RerankCandidate, RerankerError};

/// Opaque `score(query, text) -> float` model seam
pub trait ScoreModel: Send + Sync {
    /// Relevance of `text` to `query`, expected in [0, 1]
    fn score(&self, query: &str, text: &str) -> Result<f32, RerankerError>;
}

/// Default per-candidate latency budget
pub const DEFAULT_SCORE_BUDGET: Duration = Duration::from_millis(500);

/// Primary reranker over an injected scoring model
pub struct LlmReranker {
    model: Arc<dyn ScoreModel>,
    budget: Duration,
}

impl LlmReranker {
    pub fn new(model: Arc<dyn ScoreModel>) -> Self {
        Self {
            model,
            budget: DEFAULT_SCORE_BUDGET,
        }
    }

    pub fn with_budget(model: Arc<dyn ScoreModel>, budget: Duration) -> Self {
        Self { model, budget }
    }

    /// Score and sort. Errors or budget breaches abort the stage.
    pub fn rank(
        &self,
        query: &str,
        mut candidates: Vec<RerankCandidate>,
    ) -> Result<Vec<RerankCandidate>, RerankerError> {
        for cand in &mut candidates {
            let started = Instant::now();
            let score = self.model.score(query, &cand.brick_text)?;
            let elapsed = started.elapsed();
            if elapsed > self.budget {
                return Err(RerankerError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    budget_ms: self.budget.as_millis() as u64,
                });
            }
            cand.final_score = score.clamp(0.0, 1.0);
            cand.reranker_used = "llm_scorer".to_string();
        }

        candidates.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.brick_id.cmp(&b.brick_id))
        });
        Ok(candidates)
    }
}

// ============================================================================
// TESTS
// ============================================================================
