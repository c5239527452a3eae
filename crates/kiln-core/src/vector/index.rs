//! Local Vector Index
//!
//! USearch HNSW over squared-L2 distance. Row `i` of the index corresponds to
//! `brick_ids[i]`; the two are persisted together (binary index file + JSON
//! sidecar), each written to a temp file and renamed so readers never observe
//! a torn pair.
//!
//! A dimension change is handled by refusing to load the old index: the
//! caller rebuilds from the brick table instead of migrating vectors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default embedding dimensionality (all-MiniLM-L6-v2)
pub const DEFAULT_DIMENSIONS: usize = 384;

/// HNSW connectivity parameter
pub const DEFAULT_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
pub const DEFAULT_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector search error types
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorSearchError {
    /// Failed to create the index
    #[error("Index creation failed: {0}")]
    IndexCreation(String),
    /// Failed to add a vector
    #[error("Failed to add vector: {0}")]
    IndexAdd(String),
    /// Failed to search
    #[error("Search failed: {0}")]
    IndexSearch(String),
    /// Failed to persist/load the index pair
    #[error("Persistence failed: {0}")]
    IndexPersistence(String),
    /// Dimension mismatch: expected, got
    #[error("Invalid dimensions: expected {0}, got {1}")]
    InvalidDimensions(usize, usize),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    /// Number of dimensions
    pub dimensions: usize,
    /// HNSW connectivity parameter
    pub connectivity: usize,
    /// Expansion factor for adding vectors
    pub expansion_add: usize,
    /// Expansion factor for searching
    pub expansion_search: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

impl VectorIndexConfig {
    fn index_options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub connectivity: usize,
    pub memory_bytes: usize,
}

/// What the JSON sidecar records alongside the binary index
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    dimensions: usize,
    brick_ids: Vec<String>,
}

// ============================================================================
// LOCAL VECTOR INDEX
// ============================================================================

/// HNSW index keyed by row number with a parallel brick-id list
pub struct LocalVectorIndex {
    index: Index,
    config: VectorIndexConfig,
    brick_ids: Vec<String>,
    id_to_row: HashMap<String, u64>,
}

impl std::fmt::Debug for LocalVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVectorIndex")
            .field("config", &self.config)
            .field("brick_ids", &self.brick_ids)
            .field("id_to_row", &self.id_to_row)
            .finish()
    }
}

impl LocalVectorIndex {
    /// Create an empty index with default configuration
    pub fn new() -> Result<Self, VectorSearchError> {
        Self::with_config(VectorIndexConfig::default())
    }

    /// Create an empty index with custom configuration
    pub fn with_config(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let index = Index::new(&config.index_options())
            .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
        Ok(Self {
            index,
            config,
            brick_ids: Vec::new(),
            id_to_row: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, brick_id: &str) -> bool {
        self.id_to_row.contains_key(brick_id)
    }

    /// The parallel id list, row-ordered
    pub fn brick_ids(&self) -> &[String] {
        &self.brick_ids
    }

    fn ensure_capacity(&self, extra: usize) -> Result<(), VectorSearchError> {
        let needed = self.index.size() + extra;
        if needed > self.index.capacity() {
            let reserve = needed.next_power_of_two().max(16);
            self.index
                .reserve(reserve)
                .map_err(|e| VectorSearchError::IndexCreation(format!("reserve failed: {e}")))?;
        }
        Ok(())
    }

    /// Add (or re-embed) one brick. Re-adding an existing id replaces its
    /// vector in place; the row mapping does not change.
    pub fn add(&mut self, brick_id: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                vector.len(),
            ));
        }

        if let Some(&row) = self.id_to_row.get(brick_id) {
            self.index
                .remove(row)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.ensure_capacity(1)?;
            self.index
                .add(row, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        self.ensure_capacity(1)?;
        let row = self.brick_ids.len() as u64;
        self.index
            .add(row, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        self.brick_ids.push(brick_id.to_string());
        self.id_to_row.insert(brick_id.to_string(), row);
        Ok(())
    }

    /// Nearest neighbours as `(brick_id, squared_l2_distance)`, distance
    /// ascending, ties broken by ascending brick id so the sequence is
    /// reproducible for a fixed index state.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.config.dimensions,
                query.len(),
            ));
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut results: Vec<(String, f32)> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(row, distance)| {
                self.brick_ids
                    .get(*row as usize)
                    .map(|id| (id.clone(), *distance))
            })
            .collect();

        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(results)
    }

    /// Persist the index pair: binary index to `path`, sidecar JSON beside
    /// it. Both go through temp-file + rename.
    pub fn save(&self, path: &Path) -> Result<(), VectorSearchError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        }

        let tmp_index = path_with_suffix(path, ".tmp");
        let tmp_str = tmp_index
            .to_str()
            .ok_or_else(|| VectorSearchError::IndexPersistence("invalid path".to_string()))?;
        self.index
            .save(tmp_str)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

        let sidecar = Sidecar {
            dimensions: self.config.dimensions,
            brick_ids: self.brick_ids.clone(),
        };
        let sidecar_path = sidecar_path(path);
        let tmp_sidecar = path_with_suffix(&sidecar_path, ".tmp");
        let body = serde_json::to_string(&sidecar)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        std::fs::write(&tmp_sidecar, body)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

        std::fs::rename(&tmp_index, path)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        std::fs::rename(&tmp_sidecar, &sidecar_path)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        Ok(())
    }

    /// Load a persisted pair. A sidecar recorded at different dimensions is
    /// refused with `InvalidDimensions`; rebuild from the brick table.
    pub fn load(path: &Path, config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let sidecar_body = std::fs::read_to_string(sidecar_path(path))
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        let sidecar: Sidecar = serde_json::from_str(&sidecar_body)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

        if sidecar.dimensions != config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                config.dimensions,
                sidecar.dimensions,
            ));
        }

        let index = Index::new(&config.index_options())
            .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
        let path_str = path
            .to_str()
            .ok_or_else(|| VectorSearchError::IndexPersistence("invalid path".to_string()))?;
        index
            .load(path_str)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

        let id_to_row = sidecar
            .brick_ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), row as u64))
            .collect();

        Ok(Self {
            index,
            config,
            brick_ids: sidecar.brick_ids,
            id_to_row,
        })
    }

    /// Get index statistics
    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            connectivity: self.config.connectivity,
            memory_bytes: self.index.serialized_length(),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("ids.json")
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

// ============================================================================
// TESTS
// ============================================================================
