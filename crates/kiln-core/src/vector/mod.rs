//! Vector Layer
//!
//! The embedding model is an opaque `embed(text) -> vector` function behind
//! the [`Embedder`] trait; a fastembed-backed implementation ships behind the
//! `embeddings` feature. The index itself is USearch HNSW over squared-L2
//! distance, mirrored by a parallel brick-id list and persisted atomically.

mod embedder;

#[cfg(feature = "vector-search")]
mod index;

pub use embedder::{Embedder, EmbeddingError, MAX_EMBED_CHARS, cosine_similarity};

#[cfg(feature = "embeddings")]
pub use embedder::LocalEmbedder;

#[cfg(feature = "vector-search")]
pub use index::{
    DEFAULT_DIMENSIONS, LocalVectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError,
};
