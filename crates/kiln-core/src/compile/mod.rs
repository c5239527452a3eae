//! Compiler
//!
//! The deterministic core of the pipeline. For one (Source Run, Topic) pair:
//!
//! 1. **Boundary scan**: only messages past `last_processed_index` are
//!    considered; nothing new means no model call at all
//! 2. **Prompt fetch**: the extraction prompt comes from governance
//! 3. **Extract**: one opaque model call proposes Pointers
//! 4. **Materialise**: every Pointer passes a zero-trust gate that checks
//!    the quote against the raw source bytes before a Brick exists
//! 5. **Advance boundary**: bricks and the new boundary commit in a single
//!    transaction
//!
//! No write transaction is ever held across the network call: pointers are
//! fetched first, validated in memory, then committed.

mod extractor;
mod pointer;

pub use extractor::{
    ExtractorClient, ExtractorError, FALLBACK_SYSTEM_PROMPT, build_user_prompt,
    estimate_cost_usd, estimate_tokens, parse_pointer_response, strip_code_fences,
};
pub use pointer::{Pointer, message_index, resolve_json_path, resolved_text};

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::audit::{AuditEvent, AuditEventType, AuditLog, Cost, DecisionAction, ModelTier};
use crate::prompts::{PromptError, PromptStore};
use crate::store::{Brick, BrickState, SourceAddress, StoreError, SyncStore};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Compiler error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Unknown run id
    #[error("run not found: {0}")]
    RunNotFound(String),
    /// Unknown topic id
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    /// Relational store failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Prompt governance failure (fail-closed critical prompt)
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Extractor transport failure. The boundary stays put; retry is safe.
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Compiler knobs
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Governance slug of the extraction system prompt
    pub prompt_slug: String,
    /// Whether the built-in prompt may stand in when governance has no copy.
    /// With this off, a missing critical prompt fails the compile closed.
    pub allow_prompt_fallback: bool,
    /// Tier the extractor bills at
    pub model_tier: ModelTier,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            prompt_slug: "compiler-extraction-system".to_string(),
            allow_prompt_fallback: true,
            model_tier: ModelTier::L2,
        }
    }
}

// ============================================================================
// COMPILER
// ============================================================================

const COMPONENT: &str = "compiler";
const AGENT: &str = "kiln-compiler";

/// Compiles a Source Run against a Topic into verified Bricks
pub struct Compiler {
    sync: Arc<SyncStore>,
    prompts: Arc<PromptStore>,
    extractor: Arc<dyn ExtractorClient>,
    audit: AuditLog,
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(
        sync: Arc<SyncStore>,
        prompts: Arc<PromptStore>,
        extractor: Arc<dyn ExtractorClient>,
        audit: AuditLog,
    ) -> Self {
        Self::with_config(sync, prompts, extractor, audit, CompilerConfig::default())
    }

    pub fn with_config(
        sync: Arc<SyncStore>,
        prompts: Arc<PromptStore>,
        extractor: Arc<dyn ExtractorClient>,
        audit: AuditLog,
        config: CompilerConfig,
    ) -> Self {
        Self {
            sync,
            prompts,
            extractor,
            audit,
            config,
        }
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.emit(event) {
            tracing::warn!("compiler audit emit failed: {e}");
        }
    }

    /// Compile one run for one topic. Returns the number of bricks committed
    /// by this pass (zero when the boundary already covers the run).
    pub fn compile_run(&self, run_id: &str, topic_id: &str) -> Result<usize, CompileError> {
        let run = self
            .sync
            .get_run(run_id)?
            .ok_or_else(|| CompileError::RunNotFound(run_id.to_string()))?;
        let topic = self
            .sync
            .get_topic(topic_id)?
            .ok_or_else(|| CompileError::TopicNotFound(topic_id.to_string()))?;

        let last_processed = run.last_processed_index;

        self.audit_event(
            AuditEvent::new(
                AuditEventType::RunCompileStarted,
                COMPONENT,
                AGENT,
                DecisionAction::Accepted,
                format!("starting compilation for {}", topic.display_name),
            )
            .with_run(run_id)
            .with_topic(topic_id)
            .with_metadata(json!({ "last_processed_index": last_processed })),
        );

        tracing::info!(
            run_id,
            topic_id,
            from_index = last_processed + 1,
            "compiling run"
        );

        // Phase 1: boundary scan
        let scan = boundary_scan(&run.raw_content, last_processed);
        if scan.filtered_messages.is_empty() {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::LlmCallSkipped,
                    COMPONENT,
                    AGENT,
                    DecisionAction::Skipped,
                    "no new messages beyond last_processed_index",
                )
                .with_run(run_id)
                .with_topic(topic_id),
            );
            return Ok(0);
        }

        // Phase 2: governed prompt
        let fallback = self
            .config
            .allow_prompt_fallback
            .then_some(FALLBACK_SYSTEM_PROMPT);
        let system_prompt = self
            .prompts
            .get_prompt(&self.config.prompt_slug, None, fallback)?;

        // Phase 3: extraction call; no transaction is open here
        let user_prompt = build_user_prompt(&topic, &Value::Array(scan.filtered_messages.clone()));
        let tokens_in = estimate_tokens(&system_prompt) + estimate_tokens(&user_prompt);

        let response = match self.extractor.generate(&system_prompt, &user_prompt) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(run_id, topic_id, "extractor call failed: {e}");
                return Err(e.into());
            }
        };

        let tokens_out = estimate_tokens(&response);
        let cost = Cost {
            usd: Some(estimate_cost_usd(tokens_in, tokens_out)),
            tokens_in,
            tokens_out,
        };

        let pointers = match parse_pointer_response(&response) {
            Ok(pointers) => {
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::LlmCallExecuted,
                        COMPONENT,
                        AGENT,
                        DecisionAction::LlmCall,
                        "executing extraction call",
                    )
                    .with_run(run_id)
                    .with_topic(topic_id)
                    .with_tier(self.config.model_tier)
                    .with_cost(cost)
                    .with_metadata(json!({ "prompt_char_count": user_prompt.len() })),
                );
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::PointersExtracted,
                        COMPONENT,
                        AGENT,
                        DecisionAction::Accepted,
                        format!("extracted {} potential pointers", pointers.len()),
                    )
                    .with_run(run_id)
                    .with_topic(topic_id)
                    .with_metadata(json!({ "pointer_count": pointers.len() })),
                );
                pointers
            }
            Err(e) => {
                // The call happened (and cost money) but produced garbage.
                // The brick set is empty and the boundary stays put, so the
                // retry re-extracts the same window.
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::LlmCallExecuted,
                        COMPONENT,
                        AGENT,
                        DecisionAction::Rejected,
                        format!("parse-error: {e}"),
                    )
                    .with_run(run_id)
                    .with_topic(topic_id)
                    .with_tier(self.config.model_tier)
                    .with_cost(cost),
                );
                return Ok(0);
            }
        };

        // Phase 4: zero-trust validation gate
        let mut bricks: Vec<Brick> = Vec::new();
        for pointer in &pointers {
            if let Some(brick) = self.materialize(
                &run.raw_content,
                run_id,
                pointer,
                topic_id,
                scan.scanned_indices.as_ref(),
            ) {
                bricks.push(brick);
            }
        }

        // Phase 5: transactional commit + boundary advance
        let advanced = self
            .sync
            .commit_compilation(run_id, &bricks, scan.max_index)?;

        for brick in &bricks {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::BrickMaterialized,
                    COMPONENT,
                    AGENT,
                    DecisionAction::Accepted,
                    format!("materialised brick {}", brick.id),
                )
                .with_run(run_id)
                .with_topic(topic_id)
                .with_metadata(json!({
                    "brick_id": brick.id,
                    "json_path": brick.source_address.json_path,
                })),
            );
        }

        if advanced {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::BoundaryAdvanced,
                    COMPONENT,
                    AGENT,
                    DecisionAction::Accepted,
                    format!("advanced boundary to {}", scan.max_index),
                )
                .with_run(run_id)
                .with_topic(topic_id)
                .with_metadata(json!({ "before": last_processed, "after": scan.max_index })),
            );
        }

        self.audit_event(
            AuditEvent::new(
                AuditEventType::RunCompileCompleted,
                COMPONENT,
                AGENT,
                DecisionAction::Accepted,
                format!("completed; created {} bricks", bricks.len()),
            )
            .with_run(run_id)
            .with_topic(topic_id)
            .with_metadata(json!({ "new_bricks": bricks.len() })),
        );

        Ok(bricks.len())
    }

    /// The zero-trust validation gate: a Pointer becomes a Brick only after
    /// every mechanical check passes. Rejections never abort the run.
    fn materialize(
        &self,
        raw_content: &Value,
        run_id: &str,
        pointer: &Pointer,
        topic_id: &str,
        scanned_indices: Option<&HashSet<usize>>,
    ) -> Option<Brick> {
        // Trust boundary 1: topic mismatch
        if pointer.topic_id != topic_id {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::LlmPointerMismatch,
                    COMPONENT,
                    AGENT,
                    DecisionAction::Rejected,
                    format!(
                        "extractor suggested topic {} but run is for {topic_id}",
                        pointer.topic_id
                    ),
                )
                .with_run(run_id)
                .with_topic(topic_id)
                .with_metadata(json!({ "pointer": pointer })),
            );
            return None;
        }

        // Trust boundary 2: path outside the scan window
        if let (Some(scanned), Some(index)) = (scanned_indices, message_index(&pointer.json_path)) {
            if !scanned.contains(&index) {
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::LlmPathOutOfBounds,
                        COMPONENT,
                        AGENT,
                        DecisionAction::Rejected,
                        format!("pointer addresses message {index} outside the scan window"),
                    )
                    .with_run(run_id)
                    .with_topic(topic_id)
                    .with_metadata(json!({ "pointer": pointer })),
                );
                return None;
            }
        }

        // Trust boundary 3: the path must resolve at all
        let Some(node) = resolve_json_path(raw_content, &pointer.json_path) else {
            tracing::debug!(path = %pointer.json_path, "pointer path failed to resolve");
            return None;
        };
        let node_text = resolved_text(node);

        // Hard verification gate: the quote must exist at the path, verbatim
        let Some(start_index) = node_text.find(&pointer.verbatim_quote) else {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::LlmHallucinationDetected,
                    COMPONENT,
                    AGENT,
                    DecisionAction::Rejected,
                    format!("verbatim quote not found at path {}", pointer.json_path),
                )
                .with_run(run_id)
                .with_topic(topic_id)
                .with_metadata(json!({ "pointer": pointer })),
            );
            return None;
        };
        let end_index = start_index + pointer.verbatim_quote.len();

        let fingerprint = sha256_hex(pointer.verbatim_quote.trim().to_lowercase().as_bytes());
        let checksum = sha256_hex(node_text.as_bytes());
        let brick_id = sha256_hex(format!("{topic_id}{fingerprint}").as_bytes());

        Some(Brick {
            id: brick_id,
            topic_id: topic_id.to_string(),
            content: pointer.verbatim_quote.clone(),
            fingerprint,
            state: BrickState::Improvise,
            scope: "global".to_string(),
            source_address: SourceAddress {
                run_id: run_id.to_string(),
                json_path: pointer.json_path.clone(),
                start_index,
                end_index,
                checksum,
            },
        })
    }
}

// ============================================================================
// BOUNDARY SCAN
// ============================================================================

struct BoundaryScan {
    /// Messages at indices past the boundary, in order
    filtered_messages: Vec<Value>,
    /// Highest message index seen, or the old boundary if nothing new
    max_index: i64,
    /// Indices in the scan window; `None` when the content has no messages
    /// array and the bounds guard cannot apply
    scanned_indices: Option<HashSet<usize>>,
}

fn boundary_scan(raw_content: &Value, last_processed: i64) -> BoundaryScan {
    let Some(messages) = raw_content.get("messages").and_then(Value::as_array) else {
        return BoundaryScan {
            filtered_messages: if raw_content.is_null() {
                vec![]
            } else {
                vec![raw_content.clone()]
            },
            max_index: last_processed,
            scanned_indices: None,
        };
    };

    let mut filtered = Vec::new();
    let mut scanned = HashSet::new();
    let mut max_index = last_processed;

    for (i, msg) in messages.iter().enumerate() {
        if (i as i64) > last_processed {
            filtered.push(msg.clone());
            scanned.insert(i);
            max_index = max_index.max(i as i64);
        }
    }

    BoundaryScan {
        filtered_messages: filtered,
        max_index,
        scanned_indices: Some(scanned),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// TESTS
// ============================================================================
