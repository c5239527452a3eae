//! Raw conversation dump model
//!
//! Mirrors the export format: a conversation is a mapping from node id to
//! `{parent, children, message?}`, where messages carry typed content parts.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::IngestError;

/// One conversation tree from the dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier; some exporters use `conversation_id` instead
    #[serde(default, alias = "conversation_id")]
    pub id: Option<String>,
    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,
    /// Epoch seconds at creation
    #[serde(default)]
    pub create_time: Option<f64>,
    /// Node id -> tree node
    #[serde(default)]
    pub mapping: HashMap<String, MappingNode>,
}

impl Conversation {
    /// Resolved conversation id, falling back to `"unknown"`
    pub fn conversation_id(&self) -> &str {
        self.id.as_deref().unwrap_or("unknown")
    }
}

/// A node in the conversation tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingNode {
    /// Parent node id; roots have none
    #[serde(default)]
    pub parent: Option<String>,
    /// Child node ids in branch order
    #[serde(default)]
    pub children: Vec<String>,
    /// The message at this node, if any (roots are often empty)
    #[serde(default)]
    pub message: Option<RawMessage>,
}

/// A raw message as exported
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub content: Option<RawContent>,
    /// Epoch seconds
    #[serde(default)]
    pub create_time: Option<f64>,
    #[serde(default)]
    pub update_time: Option<f64>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Message author
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub role: Option<String>,
}

/// Typed message content: a content type plus a list of parts.
/// String parts are text; object parts are rich payloads (tool output etc.).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub parts: Vec<Value>,
}

/// A parsed dump: the list of conversations it contained
#[derive(Debug, Clone)]
pub struct ConversationDump {
    pub conversations: Vec<Conversation>,
}

/// Parse a dump value. Accepts `{"conversations": [...]}` or a bare list;
/// anything else is an input-shape error.
pub fn parse_dump(value: Value) -> Result<ConversationDump, IngestError> {
    let list = match value {
        Value::Object(mut map) => match map.remove("conversations") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(IngestError::InputShape(format!(
                    "\"conversations\" is {}, expected an array",
                    type_name(&other)
                )));
            }
            None => {
                return Err(IngestError::InputShape(
                    "object without a \"conversations\" key".to_string(),
                ));
            }
        },
        Value::Array(items) => items,
        other => {
            return Err(IngestError::InputShape(format!(
                "top-level {}, expected object or array",
                type_name(&other)
            )));
        }
    };

    let conversations = list
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Conversation>, _>>()?;

    Ok(ConversationDump { conversations })
}

/// Load and parse a dump file from disk
pub fn load_conversations(path: &Path) -> Result<ConversationDump, IngestError> {
    let raw = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw)?;
    parse_dump(value)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
