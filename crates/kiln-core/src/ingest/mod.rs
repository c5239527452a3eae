//! Conversation Ingest
//!
//! Parses raw conversation dumps (a tree of messages with parent/child
//! pointers) and linearises them into Source Runs via DFS. Every root-to-leaf
//! path becomes one run with a stable, path-derived identity.

mod conversation;
mod splitter;

pub use conversation::{
    Author, Conversation, ConversationDump, MappingNode, RawContent, RawMessage,
    load_conversations, parse_dump,
};
pub use splitter::{
    ContentBlock, NormalisedMessage, Provenance, SourceRun, SourceRunContent, SplitterOptions,
    split_conversation,
};

use std::path::PathBuf;

/// Ingest error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed dump: neither `{"conversations": [...]}` nor a bare list
    #[error("unrecognised conversation dump shape: {0}")]
    InputShape(String),
    /// IO error reading the dump file
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON parse error
    #[error("invalid JSON in conversation dump: {0}")]
    Json(#[from] serde_json::Error),
}
