//! Graph Schema
//!
//! Typed vocabulary for the knowledge graph: node kinds, edge types, the
//! intent lifecycle FSM and the record structs stores hand back.
//!
//! The lifecycle transition table is a constant; every transition decision in
//! the crate goes through [`Lifecycle::can_transition`] so the rules live in
//! exactly one place.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// NODE KINDS
// ============================================================================

/// Types of graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Intent,
    Source,
    Scope,
    Topic,
    Artifact,
    Brick,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Intent => "intent",
            NodeKind::Source => "source",
            NodeKind::Scope => "scope",
            NodeKind::Topic => "topic",
            NodeKind::Artifact => "artifact",
            NodeKind::Brick => "brick",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// LIFECYCLE FSM
// ============================================================================

/// The five-state intent lifecycle.
///
/// LOOSE → FORMING → FROZEN → SUPERSEDED, with KILLED reachable from every
/// live state and terminal. Anything else is an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Loose,
    Forming,
    Frozen,
    Superseded,
    Killed,
}

/// Allowed transitions, source-state first
const TRANSITIONS: &[(Lifecycle, &[Lifecycle])] = &[
    (Lifecycle::Loose, &[Lifecycle::Forming, Lifecycle::Killed]),
    (Lifecycle::Forming, &[Lifecycle::Frozen, Lifecycle::Killed]),
    (Lifecycle::Frozen, &[Lifecycle::Superseded, Lifecycle::Killed]),
    (Lifecycle::Superseded, &[Lifecycle::Killed]),
    (Lifecycle::Killed, &[]),
];

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Loose => "loose",
            Lifecycle::Forming => "forming",
            Lifecycle::Frozen => "frozen",
            Lifecycle::Superseded => "superseded",
            Lifecycle::Killed => "killed",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "forming" => Lifecycle::Forming,
            "frozen" => Lifecycle::Frozen,
            "superseded" => Lifecycle::Superseded,
            "killed" => Lifecycle::Killed,
            _ => Lifecycle::Loose,
        }
    }

    /// Whether `self -> to` is a legal move. A self-transition is not legal
    /// here; callers treat it as an idempotent no-op before asking.
    pub fn can_transition(&self, to: Lifecycle) -> bool {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .is_some_and(|(_, targets)| targets.contains(&to))
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// INTENT TYPES
// ============================================================================

/// Classification of an intent's statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Rule,
    Fact,
    Formula,
    Structure,
    Question,
    Goal,
    #[default]
    Unknown,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Rule => "rule",
            IntentType::Fact => "fact",
            IntentType::Formula => "formula",
            IntentType::Structure => "structure",
            IntentType::Question => "question",
            IntentType::Goal => "goal",
            IntentType::Unknown => "unknown",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "rule" => IntentType::Rule,
            "fact" => IntentType::Fact,
            "formula" => IntentType::Formula,
            "structure" => IntentType::Structure,
            "question" => IntentType::Question,
            "goal" => IntentType::Goal,
            _ => IntentType::Unknown,
        }
    }
}

// ============================================================================
// EDGE TYPES
// ============================================================================

/// Typed relations between nodes.
///
/// Only `OVERRIDES` and `SUPERSEDED_BY` can form cycles on their own, so the
/// write-time cycle guard runs per-type on exactly those two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Intent/Artifact -> Source/Brick
    DerivedFrom,
    /// Intent -> Scope
    AppliesTo,
    /// Intent -> Intent; source must be FROZEN, one per target
    Overrides,
    /// Intent -> Intent
    ConflictsWith,
    /// Intent -> Intent
    Refines,
    /// Intent -> Intent
    DependsOn,
    /// Topic -> Artifact or Topic -> Intent
    AssembledIn,
    /// Old intent -> its replacement
    SupersededBy,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::DerivedFrom => "derived_from",
            EdgeType::AppliesTo => "applies_to",
            EdgeType::Overrides => "overrides",
            EdgeType::ConflictsWith => "conflicts_with",
            EdgeType::Refines => "refines",
            EdgeType::DependsOn => "depends_on",
            EdgeType::AssembledIn => "assembled_in",
            EdgeType::SupersededBy => "superseded_by",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "derived_from" => Some(EdgeType::DerivedFrom),
            "applies_to" => Some(EdgeType::AppliesTo),
            "overrides" => Some(EdgeType::Overrides),
            "conflicts_with" => Some(EdgeType::ConflictsWith),
            "refines" => Some(EdgeType::Refines),
            "depends_on" => Some(EdgeType::DependsOn),
            "assembled_in" => Some(EdgeType::AssembledIn),
            "superseded_by" => Some(EdgeType::SupersededBy),
            _ => None,
        }
    }

    /// Edge types that are cycle-guarded at write time
    pub fn is_cycle_guarded(&self) -> bool {
        matches!(self, EdgeType::Overrides | EdgeType::SupersededBy)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A governed intent node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub statement: String,
    pub lifecycle: Lifecycle,
    pub intent_type: IntentType,
    #[serde(default)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Intent {
    pub fn new(id: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            statement: statement.into(),
            lifecycle: Lifecycle::Loose,
            intent_type: IntentType::Unknown,
            metadata: Value::Null,
            created_at: None,
        }
    }
}

/// An access/inheritance domain. Scopes form a tree via edges whose metadata
/// carries `"rel": "parent"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Value,
}

/// A typed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub metadata: Value,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            metadata: Value::Null,
        }
    }
}

/// A raw node row, kind untyped. What the snapshot endpoint serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub created_at: String,
}

// ============================================================================
// TESTS
// ============================================================================
