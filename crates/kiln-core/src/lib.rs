//! # Kiln Core
//!
//! Conversation-to-knowledge compiler. Kiln ingests branching conversation
//! archives and fires them into **bricks**: atomic claims anchored byte-for-byte
//! to their source, governed inside a typed knowledge graph.
//!
//! - **Tree Splitter**: DFS linearisation of branched transcripts into stable
//!   Source Runs
//! - **Compiler**: zero-trust validation of extractor pointers against raw
//!   source bytes, with a monotonic processing boundary
//! - **Knowledge Graph**: typed nodes/edges, lifecycle FSM, cycle-guarded
//!   OVERRIDES/SUPERSEDED_BY, savepoint-nested transactions
//! - **Prompt Governance**: versioned extractor prompts with an approved-slug
//!   allow-list and fail-closed critical prompts
//! - **Audit Log**: append-only JSON-Lines stream covering every decision and
//!   every paid model call (economic invariant)
//! - **Recall**: HNSW vector search + hierarchical scope ACLs + a three-stage
//!   reranker fallback chain
//! - **Cognition**: content-addressed topic artifacts with provenance edges
//!   and monotonic conflict resolution
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kiln_core::pipeline::{SyncPipeline, SyncOptions};
//!
//! let pipeline = SyncPipeline::open(data_dir, extractor)?;
//! let report = pipeline.run_sync("conversations.json", SyncOptions::default())?;
//! println!("{} bricks from {} runs", report.bricks_created, report.runs_registered);
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding + cross-encoder models via fastembed
//! - `vector-search` (default): HNSW index, recall engine and the assembler
//! - `bundled-sqlite` (default): compile SQLite into the binary

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod audit;
pub mod compile;
pub mod graph;
pub mod ingest;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod store;
pub mod vector;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod cognition;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod recall;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Ingest
pub use ingest::{
    ContentBlock, Conversation, ConversationDump, IngestError, NormalisedMessage, Provenance,
    SourceRunContent, SplitterOptions, load_conversations, split_conversation,
};

// Relational store
pub use store::{
    Brick, BrickState, SourceAddress, SourceRunRecord, StoreError, SyncStore, Topic,
    TopicDefinition,
};

// Knowledge graph
pub use graph::{
    Edge, EdgeType, GraphError, GraphStore, Intent, IntentType, Lifecycle, NodeKind, NodeRecord,
    ScopeNode,
};
pub use graph::validation::{IntegrityReport, run_integrity_sweep};

// Audit
pub use audit::{
    AuditError, AuditEvent, AuditEventType, AuditFilter, AuditLog, Cost, Decision, DecisionAction,
    ModelTier,
};

// Prompt governance
pub use prompts::{GovernanceConfig, PromptError, PromptRecord, PromptStore};

// Compiler
pub use compile::{CompileError, Compiler, ExtractorClient, ExtractorError, Pointer};

// Vector search
pub use vector::{Embedder, EmbeddingError};
#[cfg(feature = "vector-search")]
pub use vector::{LocalVectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};
#[cfg(feature = "embeddings")]
pub use vector::LocalEmbedder;

// Reranking
pub use rerank::{HeuristicReranker, RerankCandidate, RerankerChain, RerankerError, ScoreModel};

// Recall
#[cfg(feature = "vector-search")]
pub use recall::{RecallConfig, RecallEngine, RecallError, RecallResult};

// Cognition
#[cfg(feature = "vector-search")]
pub use cognition::{
    AssembleError, AssembledArtifact, Assembler, AssemblerConfig, CognitionOutput,
    CognitiveExtractor,
};

// Pipeline
pub use pipeline::{PipelineError, SyncOptions, SyncPipeline, SyncReport};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Artifact schema identifier stamped into every cognition payload
pub const ARTIFACT_TYPE: &str = "TOPIC_COGNITION_V1";
