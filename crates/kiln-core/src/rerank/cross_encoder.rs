//! Cross-Encoder Reranker
//!
//! Secondary stage: pairwise (query, text) scoring with fastembed's Jina
//! Reranker v1 Turbo. Raw logits are min-max normalised over the batch to
//! keep `final_score` in [0, 1]; for ranking only the relative order
//! matters.

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use super::{RerankCandidate, RerankerError};

/// Secondary reranker over a local cross-encoder model
pub struct CrossEncoderReranker {
    model: TextRerank,
}

impl CrossEncoderReranker {
    /// Load the model (~150MB, downloads on first use). Failure here makes
    /// the chain skip this stage entirely.
    pub fn new() -> Result<Self, RerankerError> {
        let options = RerankInitOptions::new(RerankerModel::JINARerankerV1TurboEn)
            .with_show_download_progress(true);
        let model = TextRerank::try_new(options)
            .map_err(|e| RerankerError::ModelInit(e.to_string()))?;
        Ok(Self { model })
    }

    /// Score and sort. Returns a permutation of the input.
    pub fn rank(
        &mut self,
        query: &str,
        mut candidates: Vec<RerankCandidate>,
    ) -> Result<Vec<RerankCandidate>, RerankerError> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.brick_text.as_str()).collect();
        let results = self
            .model
            .rerank(query, &documents, false, None)
            .map_err(|e| RerankerError::ScoreFailed(e.to_string()))?;

        let mut scores = vec![0.0f32; candidates.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }

        let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;

        for (cand, raw) in candidates.iter_mut().zip(scores) {
            cand.final_score = if range > 0.0 { (raw - min) / range } else { 0.5 };
            cand.reranker_used = "cross_encoder".to_string();
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
