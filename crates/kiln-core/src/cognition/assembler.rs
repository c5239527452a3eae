//! Cognition Assembler
//!
//! Turns a topic query into a content-addressed artifact: recall the
//! evidence, expand each brick to its originating Source Run, deduplicate
//! documents by content hash, normalise the excerpts, and hash the
//! time-independent payload into the artifact id. Provenance lands in the
//! graph as `topic -ASSEMBLED_IN-> artifact -DERIVED_FROM-> brick` edges.
//!
//! When a cognitive extractor is attached, its facts feed **monotonic
//! conflict resolution** against the topic's existing intents: a frozen
//! anchor always wins (`anchor -OVERRIDES-> new`), a matching forming intent
//! is retired (`old -SUPERSEDED_BY-> new`), and everything else registers as
//! a fresh forming intent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventType, AuditLog, DecisionAction};
use crate::compile::{ExtractorError, message_index};
use crate::graph::{Edge, EdgeType, GraphError, GraphStore, Lifecycle, NodeKind};
use crate::recall::{RecallEngine, RecallError};
use crate::store::{StoreError, SyncStore};
use crate::vector::{EmbeddingError, cosine_similarity};

use super::extract::{CognitionOutput, CognitiveExtractor};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Assembler error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    /// Recall failure
    #[error(transparent)]
    Recall(#[from] RecallError),
    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Graph failure
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Embedding failure during conflict resolution
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Cognitive extractor failure
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    /// Artifact IO failure
    #[error("artifact IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// ARTIFACT TYPES
// ============================================================================

/// Whether recall produced any evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageStatus {
    Assembled,
    NoRecallMatches,
}

/// A span of a source document one brick covers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSpan {
    pub message_id: Option<String>,
    pub block_index: Option<usize>,
}

/// One normalised message inside an excerpt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcerptMessage {
    pub message_id: Option<String>,
    pub role: Option<String>,
    pub created_at: Option<String>,
    pub blocks: Vec<ExcerptBlock>,
}

/// One text block of a normalised message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcerptBlock {
    pub index: usize,
    pub text: String,
}

/// One deduplicated source document with its coverage map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExcerpt {
    pub source_file: String,
    pub coverage: Coverage,
    pub conversation: Vec<ExcerptMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coverage {
    pub spans: Vec<CoverageSpan>,
}

/// The strictly time-independent payload the artifact id is computed over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub topic: String,
    pub provenance: Provenance,
    pub raw_excerpts: Vec<RawExcerpt>,
    pub coverage_status: CoverageStatus,
    pub extracted_facts: Vec<String>,
    pub visuals: Visuals,
    pub decisions: Vec<String>,
    pub constraints: Vec<String>,
    pub edge_cases: Vec<String>,
    pub artifact_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub brick_ids: Vec<String>,
    pub source_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Visuals {
    pub mermaid: Vec<String>,
    pub latex: Vec<String>,
}

/// The persisted envelope around the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    /// sha256 over the canonical JSON of the payload
    pub artifact_id: String,
    pub created_at: String,
    pub query: String,
    pub derived_from: Vec<String>,
    pub payload: ArtifactPayload,
}

/// What `assemble_topic` hands back
#[derive(Debug, Clone)]
pub struct AssembledArtifact {
    pub artifact_id: String,
    pub path: PathBuf,
    pub coverage_status: CoverageStatus,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Canonical content hash: serde_json's object maps are key-ordered, so
/// serialising a `Value` gives a canonical byte string to digest
pub fn canonical_content_hash(value: &Value) -> String {
    let bytes = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(bytes.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Filename-safe slug, max 64 chars
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if c.is_whitespace() || c == '-' || c == '_' {
            if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
    }
    let trimmed = slug.trim_end_matches('-');
    trimmed.chars().take(64).collect()
}

/// Block index a brick's path addresses, when it goes through content_blocks
fn block_index(path: &str) -> Option<usize> {
    let after = path.split("content_blocks[").nth(1)?;
    after.split(']').next()?.trim().parse().ok()
}

// ============================================================================
// CONFIG
// ============================================================================

/// Assembler knobs
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Where artifact files land
    pub artifacts_dir: PathBuf,
    /// Recall depth for the evidence sweep
    pub recall_k: usize,
    /// Semantic similarity above which a new fact collides with an existing
    /// intent. A tuning constant, not an invariant.
    pub override_threshold: f32,
}

impl AssemblerConfig {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            recall_k: 15,
            override_threshold: 0.85,
        }
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

const COMPONENT: &str = "cognition";
const AGENT: &str = "kiln-assembler";

/// Builds content-addressed topic artifacts and governs the intents they spawn
pub struct Assembler {
    recall: Arc<RecallEngine>,
    sync: Arc<SyncStore>,
    graph: Arc<GraphStore>,
    audit: AuditLog,
    extractor: Option<Arc<dyn CognitiveExtractor>>,
    config: AssemblerConfig,
}

impl Assembler {
    pub fn new(
        recall: Arc<RecallEngine>,
        sync: Arc<SyncStore>,
        graph: Arc<GraphStore>,
        audit: AuditLog,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            recall,
            sync,
            graph,
            audit,
            extractor: None,
            config,
        }
    }

    /// Attach a cognitive extractor for fact/visual distillation
    pub fn with_extractor(mut self, extractor: Arc<dyn CognitiveExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.emit(event) {
            tracing::warn!("assembler audit emit failed: {e}");
        }
    }

    /// Assemble the canonical cognition artifact for a topic query
    pub fn assemble_topic(&self, query: &str) -> Result<AssembledArtifact, AssembleError> {
        self.audit_event(
            AuditEvent::new(
                AuditEventType::QueryReceived,
                COMPONENT,
                AGENT,
                DecisionAction::Accepted,
                format!("assembling topic '{query}'"),
            ),
        );

        // 1. Recall phase (read-only, global scope)
        let candidates =
            self.recall
                .recall(query, self.config.recall_k, &["global".to_string()], false)?;

        if candidates.is_empty() {
            tracing::info!("no recall matches for '{query}', emitting empty artifact");
            let payload = empty_payload(query);
            return self.persist(query, payload, vec![]);
        }

        // 2. Expansion & deduplication: brick -> originating run, keyed by
        // document content hash so identical documents collapse
        struct DocEntry {
            run_id: String,
            raw_content: Value,
            brick_ids: BTreeSet<String>,
            spans: Vec<CoverageSpan>,
        }
        let mut unique_docs: BTreeMap<String, DocEntry> = BTreeMap::new();
        let mut all_brick_ids: BTreeSet<String> = BTreeSet::new();

        for candidate in &candidates {
            let Some(brick) = self.sync.get_brick(&candidate.brick_id)? else {
                tracing::warn!("missing brick {} behind recall hit", candidate.brick_id);
                continue;
            };
            let run_id = brick.source_address.run_id.clone();
            let Some(run) = self.sync.get_run(&run_id)? else {
                tracing::warn!("missing run {run_id} behind brick {}", brick.id);
                continue;
            };

            let doc_hash = canonical_content_hash(&run.raw_content);
            let entry = unique_docs.entry(doc_hash).or_insert_with(|| DocEntry {
                run_id,
                raw_content: run.raw_content,
                brick_ids: BTreeSet::new(),
                spans: Vec::new(),
            });
            entry.brick_ids.insert(brick.id.clone());
            all_brick_ids.insert(brick.id.clone());

            let path = &brick.source_address.json_path;
            let message_id = message_index(path).and_then(|i| {
                entry.raw_content["messages"]
                    .get(i)
                    .and_then(|m| m.get("message_id").or_else(|| m.get("id")))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            entry.spans.push(CoverageSpan {
                message_id,
                block_index: block_index(path),
            });
        }

        // 3. Normalise each document into role/block structure
        let mut raw_excerpts = Vec::with_capacity(unique_docs.len());
        for entry in unique_docs.values() {
            raw_excerpts.push(RawExcerpt {
                source_file: entry.run_id.clone(),
                coverage: Coverage {
                    spans: entry.spans.clone(),
                },
                conversation: normalise_document(&entry.raw_content),
            });
        }

        // 4. Optional cognitive distillation
        let cognition = match &self.extractor {
            Some(extractor) => {
                let context: String = candidates
                    .iter()
                    .map(|c| c.brick_text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let output = extractor.extract(&context)?;
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::SynthesisTriggered,
                        COMPONENT,
                        AGENT,
                        DecisionAction::Accepted,
                        format!("distilled {} facts", output.facts.len()),
                    ),
                );
                output
            }
            None => CognitionOutput::default(),
        };

        // 5. Assemble the time-independent payload
        let payload = ArtifactPayload {
            topic: query.to_string(),
            provenance: Provenance {
                brick_ids: all_brick_ids.iter().cloned().collect(),
                source_files: unique_docs.values().map(|d| d.run_id.clone()).collect(),
            },
            raw_excerpts,
            coverage_status: CoverageStatus::Assembled,
            extracted_facts: cognition.facts.clone(),
            visuals: Visuals {
                mermaid: cognition.mermaid,
                latex: cognition.latex,
            },
            decisions: vec![],
            constraints: vec![],
            edge_cases: vec![],
            artifact_type: crate::ARTIFACT_TYPE.to_string(),
        };

        let derived_from: Vec<String> = all_brick_ids.into_iter().collect();
        let artifact = self.persist(query, payload, derived_from.clone())?;

        // 6. Graph linkage + provenance edges
        let slug = slugify(query);
        let topic_node_id = format!("topic_{slug}");
        self.graph.register_node(
            NodeKind::Artifact,
            &artifact.artifact_id,
            &json!({
                "topic": query,
                "type": crate::ARTIFACT_TYPE,
            }),
            false,
        )?;
        self.graph.register_node(
            NodeKind::Topic,
            &topic_node_id,
            &json!({ "topic_slug": slug, "original_query": query }),
            true,
        )?;
        self.graph
            .register_edge(&topic_node_id, &artifact.artifact_id, EdgeType::AssembledIn, None)?;
        for brick_id in &derived_from {
            self.graph
                .register_node(NodeKind::Brick, brick_id, &json!({}), false)?;
            self.graph
                .register_edge(&artifact.artifact_id, brick_id, EdgeType::DerivedFrom, None)?;
        }

        self.audit_event(
            AuditEvent::new(
                AuditEventType::PulseEmitted,
                COMPONENT,
                AGENT,
                DecisionAction::Accepted,
                format!("artifact {} assembled", artifact.artifact_id),
            )
            .with_metadata(json!({
                "artifact_id": artifact.artifact_id,
                "brick_count": derived_from.len(),
            })),
        );

        // 7. Monotonic conflict resolution over the extracted facts
        if !cognition.facts.is_empty() {
            self.resolve_conflicts(&topic_node_id, &artifact.artifact_id, &cognition.facts)?;
        }

        Ok(artifact)
    }

    /// Write the envelope to disk under its content address
    fn persist(
        &self,
        query: &str,
        payload: ArtifactPayload,
        derived_from: Vec<String>,
    ) -> Result<AssembledArtifact, AssembleError> {
        let payload_value = serde_json::to_value(&payload)?;
        let artifact_id = canonical_content_hash(&payload_value);
        let coverage_status = payload.coverage_status;

        let envelope = ArtifactEnvelope {
            artifact_id: artifact_id.clone(),
            created_at: Utc::now().to_rfc3339(),
            query: query.to_string(),
            derived_from,
            payload,
        };

        std::fs::create_dir_all(&self.config.artifacts_dir)?;
        let filename = format!(
            "{}_{}_{}.json",
            slugify(query),
            &artifact_id[..12],
            Utc::now().timestamp(),
        );
        let path = self.config.artifacts_dir.join(filename);
        std::fs::write(&path, serde_json::to_string_pretty(&envelope)?)?;

        tracing::info!("assembled '{query}' to {}", path.display());
        Ok(AssembledArtifact {
            artifact_id,
            path,
            coverage_status,
        })
    }

    /// Compare each fact against the topic's live intents; frozen anchors
    /// win via OVERRIDES, forming matches retire via SUPERSEDED_BY, and
    /// novel facts register as fresh forming intents.
    fn resolve_conflicts(
        &self,
        topic_node_id: &str,
        artifact_id: &str,
        facts: &[String],
    ) -> Result<(), AssembleError> {
        let embedder = self.recall.embedder();

        let existing: Vec<(crate::graph::Intent, Vec<f32>)> = self
            .graph
            .get_intents_by_topic(topic_node_id)?
            .into_iter()
            .filter(|i| matches!(i.lifecycle, Lifecycle::Forming | Lifecycle::Frozen))
            .map(|i| {
                let vec = embedder.embed(&i.statement)?;
                Ok((i, vec))
            })
            .collect::<Result<_, EmbeddingError>>()?;

        for fact in facts {
            let fact_vec = embedder.embed(fact)?;

            let best = existing
                .iter()
                .map(|(intent, vec)| (intent, cosine_similarity(&fact_vec, vec)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            let new_id = format!("intent-{}", Uuid::new_v4());
            let new_intent = crate::graph::Intent {
                id: new_id.clone(),
                statement: fact.clone(),
                lifecycle: Lifecycle::Forming,
                intent_type: crate::graph::IntentType::Fact,
                metadata: json!({ "origin_artifact": artifact_id }),
                created_at: None,
            };
            self.graph.add_intent(&new_intent)?;
            self.graph
                .register_edge(topic_node_id, &new_id, EdgeType::AssembledIn, None)?;
            self.graph
                .register_edge(&new_id, artifact_id, EdgeType::DerivedFrom, None)?;

            match best {
                Some((anchor, similarity)) if similarity >= self.config.override_threshold => {
                    match anchor.lifecycle {
                        Lifecycle::Frozen => {
                            // The frozen anchor wins: it overrides the newcomer
                            let edge = Edge {
                                source_id: anchor.id.clone(),
                                target_id: new_id.clone(),
                                edge_type: EdgeType::Overrides,
                                metadata: json!({ "similarity": similarity }),
                            };
                            if let Err(e) = self.graph.add_typed_edge(&edge) {
                                tracing::warn!(
                                    "override edge {} -> {new_id} rejected: {e}",
                                    anchor.id
                                );
                            }
                        }
                        _ => {
                            // A forming match is retired by the newer fact
                            if let Err(e) = self.graph.register_edge(
                                &anchor.id,
                                &new_id,
                                EdgeType::SupersededBy,
                                Some(&json!({ "similarity": similarity })),
                            ) {
                                tracing::warn!(
                                    "supersession edge {} -> {new_id} rejected: {e}",
                                    anchor.id
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Normalise one run document into message/block structure
fn normalise_document(raw_content: &Value) -> Vec<ExcerptMessage> {
    let Some(messages) = raw_content.get("messages").and_then(Value::as_array) else {
        return vec![];
    };

    messages
        .iter()
        .map(|msg| {
            let content = msg.get("content").and_then(Value::as_str).unwrap_or_default();
            let blocks = content
                .split("\n\n")
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .enumerate()
                .map(|(index, text)| ExcerptBlock {
                    index,
                    text: text.to_string(),
                })
                .collect();

            ExcerptMessage {
                message_id: msg
                    .get("message_id")
                    .or_else(|| msg.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                role: msg.get("role").and_then(Value::as_str).map(str::to_string),
                created_at: msg
                    .get("created_at")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                blocks,
            }
        })
        .collect()
}

fn empty_payload(query: &str) -> ArtifactPayload {
    ArtifactPayload {
        topic: query.to_string(),
        provenance: Provenance {
            brick_ids: vec![],
            source_files: vec![],
        },
        raw_excerpts: vec![],
        coverage_status: CoverageStatus::NoRecallMatches,
        extracted_facts: vec![],
        visuals: Visuals::default(),
        decisions: vec![],
        constraints: vec![],
        edge_cases: vec![],
        artifact_type: crate::ARTIFACT_TYPE.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
