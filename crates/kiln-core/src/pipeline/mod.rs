//! Sync Pipeline
//!
//! End-to-end orchestration of one deterministic sync: load a conversation
//! dump, linearise every tree into Source Runs, register them, compile each
//! run against every active topic, write per-run brick artifacts, and fold
//! new bricks into the unified graph.
//!
//! Malformed input aborts the whole sync. Per-run compile failures are
//! logged and counted; a prompt governance violation aborts, because it
//! would fail every remaining run identically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditError, AuditLog};
use crate::compile::{CompileError, Compiler, ExtractorClient};
use crate::graph::{GraphError, GraphStore};
use crate::ingest::{IngestError, SplitterOptions, load_conversations, split_conversation};
use crate::prompts::{GovernanceConfig, PromptError, PromptStore};
use crate::store::{StoreError, SyncStore, Topic, TopicDefinition};

#[cfg(feature = "vector-search")]
use crate::store::Brick;
#[cfg(feature = "vector-search")]
use crate::vector::{Embedder, EmbeddingError, LocalVectorIndex, VectorSearchError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Pipeline error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed ingest input; aborts the sync
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Relational store failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Graph failure
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Prompt governance failure; aborts the sync
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Audit log failure
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// Brick artifact IO failure
    #[error("brick artifact IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    /// Vector index failure during reindex
    #[cfg(feature = "vector-search")]
    #[error(transparent)]
    Vector(#[from] VectorSearchError),
    /// Embedding failure during reindex
    #[cfg(feature = "vector-search")]
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

// ============================================================================
// OPTIONS & REPORT
// ============================================================================

/// Sync behavior switches
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Preserve typed content blocks and provenance on every message
    pub rich_ingest: bool,
    /// Write one brick artifact file per run under `<data_dir>/bricks/`
    pub write_brick_artifacts: bool,
    /// Seed a default topic when the topic table is empty
    pub bootstrap_default_topic: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            rich_ingest: false,
            write_brick_artifacts: true,
            bootstrap_default_topic: true,
        }
    }
}

/// What one sync pass accomplished
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub conversations_processed: usize,
    pub runs_registered: usize,
    pub bricks_created: usize,
    pub runs_failed: usize,
    pub bricks_unified: usize,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Owns the stores and the compiler for one kiln data directory
pub struct SyncPipeline {
    data_dir: PathBuf,
    sync: Arc<SyncStore>,
    graph: Arc<GraphStore>,
    prompts: Arc<PromptStore>,
    audit: AuditLog,
    compiler: Compiler,
}

impl SyncPipeline {
    /// Open every store under `data_dir` (created if missing)
    pub fn open(
        data_dir: &Path,
        extractor: Arc<dyn ExtractorClient>,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("kiln.db");
        let audit = AuditLog::open(&data_dir.join("audit.jsonl"))?;
        let sync = Arc::new(SyncStore::open(&db_path)?);
        let graph = Arc::new(GraphStore::open(&db_path, audit.clone())?);
        let prompts = Arc::new(PromptStore::open(
            &db_path,
            GovernanceConfig::default(),
            audit.clone(),
        )?);
        let compiler = Compiler::new(
            sync.clone(),
            prompts.clone(),
            extractor,
            audit.clone(),
        );
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            sync,
            graph,
            prompts,
            audit,
            compiler,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sync_store(&self) -> Arc<SyncStore> {
        self.sync.clone()
    }

    pub fn graph(&self) -> Arc<GraphStore> {
        self.graph.clone()
    }

    pub fn prompts(&self) -> Arc<PromptStore> {
        self.prompts.clone()
    }

    pub fn audit(&self) -> AuditLog {
        self.audit.clone()
    }

    /// Run one deterministic sync over a conversation dump file
    pub fn run_sync(
        &self,
        input_path: &Path,
        options: SyncOptions,
    ) -> Result<SyncReport, PipelineError> {
        tracing::info!("starting deterministic sync from {}", input_path.display());
        let dump = load_conversations(input_path)?;

        let mut topics = self.sync.get_all_topics()?;
        if topics.is_empty() && options.bootstrap_default_topic {
            tracing::info!("no topics found, bootstrapping default topic");
            self.sync.create_topic(&default_topic())?;
            topics = self.sync.get_all_topics()?;
        }
        tracing::info!(
            "active topics: [{}]",
            topics.iter().map(|t| t.id.as_str()).collect::<Vec<_>>().join(", ")
        );

        let splitter_opts = SplitterOptions {
            rich_ingest: options.rich_ingest,
        };

        let mut report = SyncReport::default();

        for conversation in &dump.conversations {
            if conversation.id.is_none() {
                continue;
            }
            tracing::info!(
                "processing conversation {} ({})",
                conversation.title.as_deref().unwrap_or("Untitled"),
                conversation.conversation_id(),
            );

            for run in split_conversation(conversation, splitter_opts) {
                let raw = serde_json::to_value(&run.content)?;
                // Upsert content so regrown paths re-enter the compile window
                // while the boundary stays wherever it was
                self.sync.refresh_run_content(&run.run_id, &raw)?;
                report.runs_registered += 1;

                for topic in &topics {
                    match self.compiler.compile_run(&run.run_id, &topic.id) {
                        Ok(count) => {
                            report.bricks_created += count;
                            if count > 0 {
                                tracing::info!(
                                    "extracted {count} bricks for '{}' from {}",
                                    topic.id,
                                    run.run_id
                                );
                            }
                        }
                        Err(CompileError::Prompt(e)) => return Err(e.into()),
                        Err(e) => {
                            tracing::warn!(
                                "compile failed for run {} topic {}: {e}",
                                run.run_id,
                                topic.id
                            );
                            report.runs_failed += 1;
                        }
                    }
                }

                if options.write_brick_artifacts {
                    self.write_brick_artifact(&run.run_id)?;
                }
            }

            report.conversations_processed += 1;
        }

        report.bricks_unified = self.graph.unify_bricks()?;

        tracing::info!(
            "sync complete: {} conversations, {} runs, {} bricks",
            report.conversations_processed,
            report.runs_registered,
            report.bricks_created,
        );
        Ok(report)
    }

    /// One JSON array of brick records per run, mirroring the vault
    fn write_brick_artifact(&self, run_id: &str) -> Result<(), PipelineError> {
        let bricks = self.sync.get_bricks_for_run(run_id)?;
        if bricks.is_empty() {
            return Ok(());
        }
        let dir = self.data_dir.join("bricks");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{run_id}_bricks.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&bricks)?)?;
        Ok(())
    }
}

fn default_topic() -> Topic {
    Topic {
        id: "system-architecture".to_string(),
        display_name: "System Architecture".to_string(),
        definition: TopicDefinition {
            scope_description:
                "Technical constraints, architectural decisions, and data flow rules discussed in the conversation."
                    .to_string(),
            exclusion_criteria: vec![
                "General pleasantries".to_string(),
                "Drafting or brainstorming that was explicitly rejected".to_string(),
                "UI styling details".to_string(),
            ],
        },
        ordering_rule: "chronological".to_string(),
        state: "ACTIVE".to_string(),
    }
}

// ============================================================================
// INDEX MAINTENANCE
// ============================================================================

/// Embed and add every brick the index does not already hold.
/// Returns how many vectors were added.
#[cfg(feature = "vector-search")]
pub fn index_bricks(
    index: &mut LocalVectorIndex,
    bricks: &[Brick],
    embedder: &dyn Embedder,
) -> Result<usize, PipelineError> {
    let mut added = 0;
    for brick in bricks {
        if index.contains(&brick.id) {
            continue;
        }
        let vector = embedder.embed(&brick.content)?;
        index.add(&brick.id, &vector)?;
        added += 1;
    }
    Ok(added)
}

/// Rebuild the index from scratch over the whole brick table
#[cfg(feature = "vector-search")]
pub fn rebuild_index(
    sync: &SyncStore,
    embedder: &dyn Embedder,
    config: crate::vector::VectorIndexConfig,
) -> Result<LocalVectorIndex, PipelineError> {
    let mut index = LocalVectorIndex::with_config(config)?;
    let bricks = sync.get_all_bricks()?;
    let added = index_bricks(&mut index, &bricks, embedder)?;
    tracing::info!("rebuilt vector index with {added} bricks");
    Ok(index)
}

// ============================================================================
// TESTS
// ============================================================================
