//! Heuristic Reranker
//!
//! The safety net at the end of the chain: token-set overlap, an
//! exact-phrase bonus, and a small prior from the vector confidence.
//! No models, no IO, always available.

use super::RerankCandidate;

/// Tertiary reranker. Zero dependencies, infallible.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicReranker;

impl HeuristicReranker {
    pub fn new() -> Self {
        Self
    }

    /// Score and sort the candidates. Returns a permutation of the input.
    pub fn rank(&self, query: &str, mut candidates: Vec<RerankCandidate>) -> Vec<RerankCandidate> {
        let query_lower = query.to_lowercase();
        let query_tokens = tokenize(&query_lower);

        for cand in &mut candidates {
            let text = cand.brick_text.to_lowercase();
            let mut score = 0.0f32;

            if !query_tokens.is_empty() {
                let tokens = tokenize(&text);
                let overlap = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
                score += (overlap as f32 / query_tokens.len() as f32) * 0.5;
            }

            if text.contains(&query_lower) {
                score += 0.4;
            }

            // Weak prior: trust the vector distance a little when the
            // lexical signals are flat
            score += cand.base_confidence * 0.1;

            cand.final_score = score.clamp(0.0, 1.0);
            cand.reranker_used = "heuristic".to_string();
        }

        candidates.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.brick_id.cmp(&b.brick_id))
        });
        candidates
    }
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
