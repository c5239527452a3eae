//! Pointers & JSON-path resolution
//!
//! A Pointer is the extractor's unverified proposal: a topic, a path into the
//! run's raw content, and a quote it claims lives there. Pointers only exist
//! in flight; nothing persists until the validation gate has checked the
//! quote against the actual bytes.
//!
//! The resolver covers the closed path dialect the extraction prompt
//! mandates: `$` followed by `.name` and `[index]` segments, e.g.
//! `$.messages[3].content_blocks[0].value`. Wildcards, filters and slices are
//! out of contract and simply fail to resolve.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An extractor proposal naming a location and a quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pointer {
    #[serde(default)]
    pub topic_id: String,
    #[serde(default)]
    pub json_path: String,
    #[serde(default)]
    pub verbatim_quote: String,
}

/// Resolve a path against a JSON document. `None` on any malformed segment,
/// missing key or out-of-range index.
pub fn resolve_json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let rest = path.strip_prefix('$')?;
    let mut current = root;
    let mut chars = rest.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' || c == '[' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return None;
                }
                current = current.get(name.as_str())?;
            }
            '[' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ']' {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                if chars.next() != Some(']') {
                    return None;
                }
                let index: usize = digits.trim().parse().ok()?;
                current = current.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// The message index a path addresses, if it goes through `messages[i]`.
/// Used by the incremental bounds guard.
pub fn message_index(path: &str) -> Option<usize> {
    let after = path.split("messages[").nth(1)?;
    let digits = after.split(']').next()?;
    digits.trim().parse().ok()
}

/// The text the validator compares quotes against: strings verbatim,
/// everything else via its JSON rendering
pub fn resolved_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
