//! Tree Splitter
//!
//! Flattens a branched conversation into linear Source Runs: one run per
//! DFS root-to-leaf path. Run identity is the first 16 hex chars of the
//! SHA-256 over the `>`-joined node id sequence, so the same path always
//! yields the same run id regardless of when it is re-ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::conversation::{Conversation, MappingNode};

/// Options controlling message normalisation
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitterOptions {
    /// Preserve typed content blocks, provenance and tiered metadata on each
    /// message. Legacy mode (default) collapses everything to flat text.
    pub rich_ingest: bool,
}

/// A typed content block inside a normalised message.
///
/// The flat `content` rendering always exists alongside these, so JSON-path
/// addressing works on the exact bytes the extractor saw either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(String),
    Code(String),
    ToolOutput(Value),
}

/// Where a message came from inside the original tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub conversation_id: String,
    pub mapping_id: String,
    pub path_id: String,
    pub branch_depth: usize,
}

/// A message flattened into run order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalisedMessage {
    pub message_id: String,
    pub role: String,
    /// Flat text rendering: string parts joined by newlines, non-string parts
    /// shown as bracketed `[TYPE]` tags
    pub content: String,
    pub model_name: String,
    /// ISO-8601 UTC
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The raw content of one Source Run: a linear transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRunContent {
    pub conversation_id: String,
    pub title: String,
    /// `>`-joined node ids of the path this run was cut from
    pub tree_path_id: String,
    pub messages: Vec<NormalisedMessage>,
}

/// A Source Run ready for registration
#[derive(Debug, Clone)]
pub struct SourceRun {
    /// first-16-hex(sha256(join('>', node_ids)))
    pub run_id: String,
    pub content: SourceRunContent,
}

/// Split a conversation into Source Runs, one per root-to-leaf path.
/// Paths that normalise to zero messages are skipped.
pub fn split_conversation(conv: &Conversation, opts: SplitterOptions) -> Vec<SourceRun> {
    let roots = find_root_nodes(conv);
    let mut paths = Vec::new();
    for root in roots {
        dfs_paths(conv, &root, &mut Vec::new(), &mut paths);
    }

    let title = conv.title.clone().unwrap_or_else(|| "untitled".to_string());
    let mut runs = Vec::with_capacity(paths.len());

    for path in paths {
        let path_id = path_hash(&path);
        let mut messages = Vec::new();
        for (depth, node_id) in path.iter().enumerate() {
            let Some(node) = conv.mapping.get(node_id) else {
                continue;
            };
            if let Some(msg) = extract_message(node_id, node, conv, &path_id, depth, opts) {
                messages.push(msg);
            }
        }
        if messages.is_empty() {
            continue;
        }
        runs.push(SourceRun {
            run_id: path_id.clone(),
            content: SourceRunContent {
                conversation_id: conv.conversation_id().to_string(),
                title: title.clone(),
                tree_path_id: path.join(">"),
                messages,
            },
        });
    }

    runs
}

/// Nodes with no parent pointer, in sorted order for deterministic output
fn find_root_nodes(conv: &Conversation) -> Vec<String> {
    let mut roots: Vec<String> = conv
        .mapping
        .iter()
        .filter(|(_, node)| node.parent.is_none())
        .map(|(id, _)| id.clone())
        .collect();
    roots.sort();
    roots
}

/// Enumerate every root-to-leaf path under `node_id`
fn dfs_paths(conv: &Conversation, node_id: &str, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    path.push(node_id.to_string());

    let children = conv
        .mapping
        .get(node_id)
        .map(|n| n.children.as_slice())
        .unwrap_or(&[]);

    // Children missing from the mapping terminate the path there
    let live: Vec<&String> = children
        .iter()
        .filter(|c| conv.mapping.contains_key(c.as_str()))
        .collect();

    if live.is_empty() {
        out.push(path.clone());
    } else {
        for child in live {
            dfs_paths(conv, child, path, out);
        }
    }

    path.pop();
}

fn path_hash(path: &[String]) -> String {
    let digest = Sha256::digest(path.join(">").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

fn extract_message(
    node_id: &str,
    node: &MappingNode,
    conv: &Conversation,
    path_id: &str,
    depth: usize,
    opts: SplitterOptions,
) -> Option<NormalisedMessage> {
    let msg = node.message.as_ref()?;
    let content = msg.content.as_ref()?;

    let content_type = content.content_type.as_deref().unwrap_or("text");

    let mut text_parts: Vec<String> = Vec::new();
    let mut blocks: Vec<ContentBlock> = Vec::new();

    for part in &content.parts {
        match part {
            Value::String(s) => {
                text_parts.push(s.clone());
                if opts.rich_ingest {
                    // Code-typed messages carry their snippet in string parts
                    if content_type == "code" {
                        blocks.push(ContentBlock::Code(s.clone()));
                    } else {
                        blocks.push(ContentBlock::Text(s.clone()));
                    }
                }
            }
            Value::Object(obj) => {
                let part_type = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                text_parts.push(format!("[{}]", part_type.to_uppercase()));
                if opts.rich_ingest {
                    blocks.push(ContentBlock::ToolOutput(part.clone()));
                }
            }
            _ => continue,
        }
    }

    let text = text_parts.join("\n");

    let role = msg
        .author
        .as_ref()
        .and_then(|a| a.role.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let raw_meta = msg.metadata.clone().unwrap_or(Value::Null);
    let model_name = raw_meta
        .get("model_slug")
        .or_else(|| raw_meta.get("model"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let mut result = NormalisedMessage {
        message_id: msg.id.clone().unwrap_or_else(|| node_id.to_string()),
        role,
        content: text,
        model_name,
        created_at: utc_timestamp(msg.create_time),
        content_blocks: None,
        provenance: None,
        metadata: None,
    };

    if opts.rich_ingest {
        result.content_blocks = Some(blocks);
        result.provenance = Some(Provenance {
            conversation_id: conv.conversation_id().to_string(),
            mapping_id: node_id.to_string(),
            path_id: path_id.to_string(),
            branch_depth: depth,
        });
        result.metadata = Some(serde_json::json!({
            "tier1": {
                "content_type": content_type,
                "recipient": msg.recipient.as_deref().unwrap_or("all"),
                "citations": raw_meta.get("citations").cloned().unwrap_or(Value::Array(vec![])),
                "update_time": utc_timestamp(msg.update_time),
            },
            "tier2": raw_meta,
        }));
    }

    Some(result)
}

fn utc_timestamp(epoch: Option<f64>) -> String {
    match epoch.and_then(|ts| {
        let secs = ts.trunc() as i64;
        let nanos = ((ts.fract()) * 1e9) as u32;
        DateTime::<Utc>::from_timestamp(secs, nanos)
    }) {
        Some(dt) => dt.to_rfc3339(),
        None => Utc::now().to_rfc3339(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
