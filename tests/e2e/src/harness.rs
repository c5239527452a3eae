//! Test harness: every store wired over one temporary data directory

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use kiln_core::audit::AuditLog;
use kiln_core::cognition::{Assembler, AssemblerConfig};
use kiln_core::compile::Compiler;
use kiln_core::graph::{Edge, EdgeType, GraphStore, Intent, Lifecycle, NodeKind, ScopeNode};
use kiln_core::prompts::{GovernanceConfig, PromptStore};
use kiln_core::recall::RecallEngine;
use kiln_core::rerank::RerankerChain;
use kiln_core::store::{SyncStore, Topic, TopicDefinition};
use kiln_core::vector::{Embedder, LocalVectorIndex, VectorIndexConfig};

use crate::mocks::{KeywordEmbedder, ScriptedExtractor, StaticCognition, TEST_DIMS};

/// One fully-wired kiln over a temp directory
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub sync: Arc<SyncStore>,
    pub graph: Arc<GraphStore>,
    pub prompts: Arc<PromptStore>,
    pub audit: AuditLog,
    pub index: Arc<RwLock<LocalVectorIndex>>,
    pub embedder: Arc<KeywordEmbedder>,
    pub extractor: Arc<ScriptedExtractor>,
}

impl TestEnv {
    pub fn new() -> Self {
        // Keywords give tests exact control over embedding collisions
        Self::with_keywords(&["cosine", "euclidean", "boundary", "kiln"])
    }

    pub fn with_keywords(keywords: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("kiln.db");
        let audit = AuditLog::open(&dir.path().join("audit.jsonl")).unwrap();
        let sync = Arc::new(SyncStore::open(&db).unwrap());
        let graph = Arc::new(GraphStore::open(&db, audit.clone()).unwrap());
        let prompts = Arc::new(
            PromptStore::open(&db, GovernanceConfig::default(), audit.clone()).unwrap(),
        );
        let index = LocalVectorIndex::with_config(VectorIndexConfig {
            dimensions: TEST_DIMS,
            ..Default::default()
        })
        .unwrap();

        Self {
            dir,
            sync,
            graph,
            prompts,
            audit,
            index: Arc::new(RwLock::new(index)),
            embedder: Arc::new(KeywordEmbedder::new(keywords)),
            extractor: ScriptedExtractor::new(),
        }
    }

    pub fn compiler(&self) -> Compiler {
        Compiler::new(
            self.sync.clone(),
            self.prompts.clone(),
            self.extractor.clone(),
            self.audit.clone(),
        )
    }

    pub fn recall_engine(&self) -> Arc<RecallEngine> {
        Arc::new(RecallEngine::new(
            self.index.clone(),
            self.sync.clone(),
            self.graph.clone(),
            self.embedder.clone(),
            RerankerChain::new(),
        ))
    }

    pub fn assembler(&self) -> Assembler {
        Assembler::new(
            self.recall_engine(),
            self.sync.clone(),
            self.graph.clone(),
            self.audit.clone(),
            AssemblerConfig::new(self.artifacts_dir()),
        )
    }

    pub fn assembler_with_facts(&self, facts: &[&str]) -> Assembler {
        self.assembler().with_extractor(StaticCognition::new(facts))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn seed_topic(&self, topic_id: &str) {
        self.sync
            .create_topic(&Topic {
                id: topic_id.to_string(),
                display_name: format!("Topic {topic_id}"),
                definition: TopicDefinition {
                    scope_description: "test extraction contract".to_string(),
                    exclusion_criteria: vec![],
                },
                ordering_rule: "chronological".to_string(),
                state: "ACTIVE".to_string(),
            })
            .unwrap();
    }

    /// Embed every brick in the vault into the vector index
    pub fn index_all_bricks(&self) {
        let bricks = self.sync.get_all_bricks().unwrap();
        let mut index = self.index.write().unwrap();
        for brick in bricks {
            if !index.contains(&brick.id) {
                let vec = self.embedder.embed(&brick.content).unwrap();
                index.add(&brick.id, &vec).unwrap();
            }
        }
    }

    /// Register a FROZEN intent linked to a topic node via ASSEMBLED_IN,
    /// with the scope edge freezing requires
    pub fn frozen_intent(&self, intent_id: &str, statement: &str, topic_node_id: &str) {
        self.graph
            .register_node(
                NodeKind::Topic,
                topic_node_id,
                &serde_json::json!({"topic_slug": topic_node_id}),
                true,
            )
            .unwrap();
        self.graph
            .add_intent(&Intent {
                id: intent_id.to_string(),
                statement: statement.to_string(),
                lifecycle: Lifecycle::Loose,
                intent_type: kiln_core::graph::IntentType::Fact,
                metadata: serde_json::json!({}),
                created_at: None,
            })
            .unwrap();
        self.graph
            .add_scope(&ScopeNode {
                id: format!("scope-{intent_id}"),
                name: format!("scope for {intent_id}"),
                description: String::new(),
                metadata: serde_json::Value::Null,
            })
            .unwrap();
        self.graph
            .register_edge(
                intent_id,
                &format!("scope-{intent_id}"),
                EdgeType::AppliesTo,
                None,
            )
            .unwrap();
        self.graph
            .register_edge(topic_node_id, intent_id, EdgeType::AssembledIn, None)
            .unwrap();
        self.graph
            .promote_intent(intent_id, Lifecycle::Forming)
            .unwrap();
        self.graph
            .promote_intent(intent_id, Lifecycle::Frozen)
            .unwrap();
    }

    /// Shorthand for a typed edge
    pub fn edge(&self, src: &str, dst: &str, edge_type: EdgeType) -> Edge {
        Edge::new(src, dst, edge_type)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
