//! Audit Log
//!
//! Append-only JSON-Lines stream recording every decision, rejection and
//! model spend in the pipeline. One record per line; write order is the
//! only ordering guarantee.
//!
//! The **economic invariant** lives here: any event tagged with a paid model
//! tier (L2/L3) must carry a dollar cost. A paid event without one is still
//! written, but a violation record is appended immediately after it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Audit log error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// IO error on the log file
    #[error("audit log IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Lock poisoned
    #[error("audit log lock poisoned")]
    Poisoned,
}

// ============================================================================
// EVENT VOCABULARY
// ============================================================================

/// Every event the pipeline can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    // Compiler / ingestion
    RunCompileStarted,
    RunCompileCompleted,
    LlmCallExecuted,
    LlmCallSkipped,
    PointersExtracted,
    BrickMaterialized,
    LlmPointerMismatch,
    LlmPathOutOfBounds,
    LlmHallucinationDetected,
    BoundaryAdvanced,
    // Graph / governance
    EdgeCreated,
    EdgeRejected,
    NodePromoted,
    NodeFrozen,
    NodeSuperseded,
    NodeKilled,
    // Prompt governance
    PromptLoaded,
    PromptFallbackUsed,
    PromptNotApproved,
    PromptGovernanceViolation,
    // Query / cognition
    QueryReceived,
    QueryRouted,
    PulseEmitted,
    SynthesisTriggered,
}

/// Model cost tier. L1 is free/local; L2 and L3 are paid and must carry cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    L1,
    L2,
    L3,
}

impl ModelTier {
    /// Whether events at this tier must carry a dollar cost
    pub fn is_paid(&self) -> bool {
        matches!(self, ModelTier::L2 | ModelTier::L3)
    }
}

/// What the component decided to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    LlmCall,
    Skipped,
    Accepted,
    Rejected,
    Promoted,
    Superseded,
    Blocked,
}

/// The decision attached to an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: String,
}

/// Spend attached to a model call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd: Option<f64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub component: String,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<ModelTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl AuditEvent {
    /// Start a record; the remaining fields chain on
    pub fn new(
        event_type: AuditEventType,
        component: &str,
        agent: &str,
        action: DecisionAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            component: component.to_string(),
            agent: agent.to_string(),
            topic_id: None,
            run_id: None,
            model_tier: None,
            cost: None,
            decision: Decision {
                action,
                reason: reason.into(),
            },
            metadata: Value::Null,
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = Some(tier);
        self
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Reader filter; all fields are optional conjunctions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    /// Event type name, e.g. `"BRICK_MATERIALIZED"`
    pub event: Option<String>,
    pub component: Option<String>,
    pub run_id: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

const DEFAULT_READ_LIMIT: usize = 100;

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Shared handle to the append-only audit stream.
///
/// Cloning is cheap; every clone appends to the same file under one mutex,
/// which is what keeps record order total.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl AuditLog {
    /// Open (creating if needed) the JSONL file at `path`
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. If the record claims a paid tier without a dollar
    /// cost, a violation record follows it on the next line.
    pub fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let violation = event
            .model_tier
            .is_some_and(|t| t.is_paid())
            .then(|| event.cost.as_ref().map_or(true, |c| c.usd.is_none()))
            .unwrap_or(false);

        {
            let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;

            if violation {
                tracing::warn!(
                    event = ?event.event_type,
                    component = %event.component,
                    "paid-tier audit event missing cost.usd"
                );
                let flag = AuditEvent::new(
                    event.event_type,
                    "audit",
                    "audit-log",
                    DecisionAction::Blocked,
                    "cost missing for paid model tier",
                )
                .with_metadata(serde_json::json!({
                    "violation": "economic_invariant",
                    "offending_component": event.component,
                }));
                let line = serde_json::to_string(&flag)?;
                writeln!(file, "{line}")?;
            }
        }

        Ok(())
    }

    /// Read records newest-first with optional filters and offset/limit
    /// paging. Unparsable lines are skipped, not fatal.
    pub fn read_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut events: Vec<AuditEvent> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("skipping malformed audit line: {e}"),
            }
        }

        events.reverse();

        let limit = filter.limit.unwrap_or(DEFAULT_READ_LIMIT);
        let matches = |e: &AuditEvent| {
            if let Some(event) = &filter.event {
                let name = serde_json::to_value(e.event_type)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                if &name != event {
                    return false;
                }
            }
            if let Some(component) = &filter.component {
                if &e.component != component {
                    return false;
                }
            }
            if let Some(run_id) = &filter.run_id {
                if e.run_id.as_deref() != Some(run_id.as_str()) {
                    return false;
                }
            }
            true
        };

        Ok(events
            .into_iter()
            .filter(matches)
            .skip(filter.offset)
            .take(limit)
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
