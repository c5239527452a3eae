//! Embedder Seam
//!
//! Everything downstream of recall treats embedding as an opaque function.
//! [`LocalEmbedder`] provides local ONNX inference via fastembed when the
//! `embeddings` feature is on; tests and air-gapped deployments inject their
//! own implementations.

/// Hard cap on text length fed to the model; longer inputs are truncated
pub const MAX_EMBED_CHARS: usize = 2000;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    #[error("Model initialization failed: {0}")]
    ModelInit(String),
    /// Failed to generate an embedding
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// TRAIT
// ============================================================================

/// Opaque `embed(text) -> vector` function
pub trait Embedder: Send + Sync {
    /// Output dimensionality; every vector this embedder returns has this length
    fn dimensions(&self) -> usize;

    /// Embed one text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch; the default just loops
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Cosine similarity between two vectors; 0.0 when either is degenerate
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ============================================================================
// LOCAL EMBEDDER (fastembed)
// ============================================================================

#[cfg(feature = "embeddings")]
mod local {
    use std::sync::{Mutex, OnceLock};

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{Embedder, EmbeddingError, MAX_EMBED_CHARS};

    /// all-MiniLM-L6-v2 output dimensionality
    const LOCAL_DIMENSIONS: usize = 384;

    static EMBEDDING_MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

    fn cache_dir() -> std::path::PathBuf {
        if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
            return std::path::PathBuf::from(path);
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "kiln", "core") {
            return proj_dirs.cache_dir().join("fastembed");
        }
        std::path::PathBuf::from(".fastembed_cache")
    }

    fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
        let result = EMBEDDING_MODEL.get_or_init(|| {
            let cache = cache_dir();
            if let Err(e) = std::fs::create_dir_all(&cache) {
                tracing::warn!("failed to create fastembed cache dir {:?}: {e}", cache);
            }
            let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(true)
                .with_cache_dir(cache);
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| format!("failed to initialize all-MiniLM-L6-v2: {e}"))
        });

        match result {
            Ok(model) => model
                .lock()
                .map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
            Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
        }
    }

    /// Local ONNX embedder (all-MiniLM-L6-v2, 384 dimensions).
    /// The model downloads lazily on first use; construction is free.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LocalEmbedder;

    impl LocalEmbedder {
        pub fn new() -> Self {
            Self
        }
    }

    impl Embedder for LocalEmbedder {
        fn dimensions(&self) -> usize {
            LOCAL_DIMENSIONS
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.is_empty() {
                return Err(EmbeddingError::InvalidInput("empty text".to_string()));
            }
            let capped: String = text.chars().take(MAX_EMBED_CHARS).collect();
            let mut model = get_model()?;
            let mut vectors = model
                .embed(vec![capped], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("model returned no vector".into()))
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            let capped: Vec<String> = texts
                .iter()
                .map(|t| t.chars().take(MAX_EMBED_CHARS).collect())
                .collect();
            let mut model = get_model()?;
            model
                .embed(capped, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
        }
    }
}

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

// ============================================================================
// TESTS
// ============================================================================
