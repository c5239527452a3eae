//! Shared application state
//!
//! One kiln data directory backs everything: the SQLite database, the audit
//! stream, the vector index pair and the artifact output directory. The
//! index loads from disk when its dimensions still match, and is otherwise
//! rebuilt from the brick table and re-persisted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;

use kiln_core::audit::AuditLog;
use kiln_core::cognition::{Assembler, AssemblerConfig};
use kiln_core::compile::ExtractorClient;
use kiln_core::graph::GraphStore;
use kiln_core::pipeline::{SyncPipeline, rebuild_index};
use kiln_core::prompts::PromptStore;
use kiln_core::recall::RecallEngine;
use kiln_core::rerank::RerankerChain;
use kiln_core::store::SyncStore;
use kiln_core::vector::{LocalEmbedder, LocalVectorIndex, VectorIndexConfig};

/// Everything the HTTP handlers and CLI commands share
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub sync: Arc<SyncStore>,
    pub graph: Arc<GraphStore>,
    pub prompts: Arc<PromptStore>,
    pub audit: AuditLog,
    pub index: Arc<RwLock<LocalVectorIndex>>,
    pub index_path: PathBuf,
    pub recall: Arc<RecallEngine>,
    pub assembler: Arc<Assembler>,
}

/// Construction switches
#[derive(Debug, Clone, Copy, Default)]
pub struct StateOptions {
    /// Load the cross-encoder reranker stage at startup (~150MB download on
    /// first use)
    pub cross_encoder: bool,
}

/// Build the full state over `data_dir`
pub fn build_state(
    data_dir: &Path,
    extractor: Arc<dyn ExtractorClient>,
    options: StateOptions,
) -> anyhow::Result<AppState> {
    let pipeline = Arc::new(
        SyncPipeline::open(data_dir, extractor).context("opening kiln data directory")?,
    );
    let sync = pipeline.sync_store();
    let graph = pipeline.graph();
    let prompts = pipeline.prompts();
    let audit = pipeline.audit();

    // Fold any bricks from earlier syncs into the unified graph
    graph.unify_bricks().context("brick unification")?;

    let embedder = Arc::new(LocalEmbedder::new());
    let index_path = data_dir.join("index").join("bricks.usearch");
    let index_config = VectorIndexConfig::default();

    let index = match LocalVectorIndex::load(&index_path, index_config.clone()) {
        Ok(index) => {
            tracing::info!("loaded vector index with {} bricks", index.len());
            index
        }
        Err(e) => {
            tracing::info!("index unavailable ({e}), rebuilding from brick table");
            let index = rebuild_index(&sync, embedder.as_ref(), index_config)
                .context("rebuilding vector index")?;
            index.save(&index_path).context("persisting rebuilt index")?;
            index
        }
    };
    let index = Arc::new(RwLock::new(index));

    let mut chain = RerankerChain::new();
    if options.cross_encoder {
        chain = chain.with_cross_encoder();
    }

    let recall = Arc::new(RecallEngine::new(
        index.clone(),
        sync.clone(),
        graph.clone(),
        embedder,
        chain,
    ));

    let assembler = Arc::new(Assembler::new(
        recall.clone(),
        sync.clone(),
        graph.clone(),
        audit.clone(),
        AssemblerConfig::new(data_dir.join("artifacts")),
    ));

    Ok(AppState {
        pipeline,
        sync,
        graph,
        prompts,
        audit,
        index,
        index_path,
        recall,
        assembler,
    })
}
