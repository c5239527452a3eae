//! Recall Engine
//!
//! Read-only retrieval over the brick corpus: embed the query, oversample
//! from the vector index, enforce hierarchical scope ACLs, convert distance
//! to confidence, then hand the survivors to the reranker chain.
//!
//! For a fixed index state and query the result sequence is reproducible;
//! ordering ties break on ascending brick id at every stage.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;

use crate::compile::ExtractorClient;
use crate::graph::{GraphError, GraphStore};
use crate::rerank::{RerankCandidate, RerankerChain};
use crate::store::{StoreError, SyncStore};
use crate::vector::{Embedder, EmbeddingError, LocalVectorIndex, VectorSearchError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Recall error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Embedding failure
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Vector index failure
    #[error(transparent)]
    Vector(#[from] VectorSearchError),
    /// Graph lookup failure
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Brick store failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Lock poisoned
    #[error("recall lock poisoned")]
    Poisoned,
}

// ============================================================================
// CONFIG & RESULTS
// ============================================================================

/// Recall knobs
#[derive(Debug, Clone)]
pub struct RecallConfig {
    /// How far to oversample the ANN search so ACL filtering still leaves
    /// enough candidates
    pub oversample_factor: usize,
    /// How many oversampled survivors to hand to the reranker
    pub rerank_factor: usize,
    /// Query-embedding cache capacity
    pub query_cache_size: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 5,
            rerank_factor: 2,
            query_cache_size: 100,
        }
    }
}

/// One recalled brick
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecallResult {
    pub brick_id: String,
    pub confidence: f32,
    pub reranker_used: String,
    pub brick_text: String,
    pub scope: String,
}

/// System prompt for optional query expansion
const REWRITE_SYSTEM_PROMPT: &str = "You are a query expansion specialist for a knowledge recall system.\n\
Expand the raw user query into a comprehensive search string that includes relevant technical terms and synonyms.\n\
Strict rules:\n\
1. Output ONLY the expanded query string.\n\
2. Do not explain your reasoning.";

// ============================================================================
// RECALL ENGINE
// ============================================================================

/// Vector + scope-ACL + rerank retrieval, read-only over the graph
pub struct RecallEngine {
    index: Arc<RwLock<LocalVectorIndex>>,
    sync: Arc<SyncStore>,
    graph: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Mutex<RerankerChain>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    rewriter: Option<Arc<dyn ExtractorClient>>,
    config: RecallConfig,
}

impl RecallEngine {
    pub fn new(
        index: Arc<RwLock<LocalVectorIndex>>,
        sync: Arc<SyncStore>,
        graph: Arc<GraphStore>,
        embedder: Arc<dyn Embedder>,
        reranker: RerankerChain,
    ) -> Self {
        Self::with_config(index, sync, graph, embedder, reranker, RecallConfig::default())
    }

    pub fn with_config(
        index: Arc<RwLock<LocalVectorIndex>>,
        sync: Arc<SyncStore>,
        graph: Arc<GraphStore>,
        embedder: Arc<dyn Embedder>,
        reranker: RerankerChain,
        config: RecallConfig,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.query_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            index,
            sync,
            graph,
            embedder,
            reranker: Mutex::new(reranker),
            query_cache: Mutex::new(LruCache::new(cache_size)),
            rewriter: None,
            config,
        }
    }

    /// Attach a model for `use_rewrite` query expansion
    pub fn with_rewriter(mut self, rewriter: Arc<dyn ExtractorClient>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    /// Shared access to the underlying embedder
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Recall the top-`k` bricks for `query` visible to `allowed_scopes`
    pub fn recall(
        &self,
        query: &str,
        k: usize,
        allowed_scopes: &[String],
        use_rewrite: bool,
    ) -> Result<Vec<RecallResult>, RecallError> {
        {
            let index = self.index.read().map_err(|_| RecallError::Poisoned)?;
            if index.is_empty() {
                return Ok(vec![]);
            }
        }

        // Optional rewrite; any failure falls back to the raw query
        let search_text = if use_rewrite {
            self.rewrite_query(query)
        } else {
            query.to_string()
        };

        let query_vec = self.embed_cached(&search_text)?;

        // Resolve effective scopes through the hierarchy
        let mut effective: Vec<String> = allowed_scopes.iter().map(|s| s.to_lowercase()).collect();
        for scope in allowed_scopes {
            if scope.to_lowercase() != "global" {
                effective.extend(self.graph.scope_hierarchy(scope)?);
            }
        }
        effective.sort();
        effective.dedup();

        // Oversample so the ACL filter can drop without starving the reranker
        let hits = {
            let index = self.index.read().map_err(|_| RecallError::Poisoned)?;
            index.search(&query_vec, k * self.config.oversample_factor)?
        };

        let mut candidates = Vec::new();
        for (brick_id, distance) in hits {
            let Some(brick) = self.sync.get_brick(&brick_id)? else {
                continue;
            };
            let scope = brick.scope.to_lowercase();
            if scope != "global" && !effective.contains(&scope) {
                continue;
            }
            let confidence = (1.0 - distance / 2.0).clamp(0.0, 1.0);
            candidates.push(RerankCandidate::new(brick_id, brick.content, confidence, scope));
        }

        candidates.truncate(k * self.config.rerank_factor);

        let ranked = self
            .reranker
            .lock()
            .map_err(|_| RecallError::Poisoned)?
            .rank(query, candidates);

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|c| RecallResult {
                brick_id: c.brick_id,
                confidence: c.final_score,
                reranker_used: c.reranker_used,
                brick_text: c.brick_text,
                scope: c.scope,
            })
            .collect())
    }

    fn embed_cached(&self, text: &str) -> Result<Vec<f32>, RecallError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vec) = cache.get(text) {
                return Ok(vec.clone());
            }
        }
        let vec = self.embedder.embed(text)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vec.clone());
        }
        Ok(vec)
    }

    fn rewrite_query(&self, query: &str) -> String {
        let Some(rewriter) = &self.rewriter else {
            return query.to_string();
        };
        let user = format!("Original Query: '{query}'\nExpanded Technical Query:");
        match rewriter.generate(REWRITE_SYSTEM_PROMPT, &user) {
            Ok(expanded) => {
                let cleaned = expanded.trim().replace(['"', '\''], "");
                if cleaned.is_empty() {
                    query.to_string()
                } else {
                    tracing::debug!("query rewritten to '{cleaned}'");
                    cleaned
                }
            }
            Err(e) => {
                tracing::warn!("query rewrite failed, using original: {e}");
                query.to_string()
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
