//! Extractor Adapter
//!
//! The extraction model is an opaque text-in/JSON-out function behind
//! [`ExtractorClient`]. This module owns everything around the call: prompt
//! assembly, markdown fence stripping, response parsing and the token/cost
//! estimates that feed the economic invariant.

use serde::Deserialize;

use crate::store::Topic;

use super::pointer::Pointer;

/// Extractor adapter error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// Transport or model failure
    #[error("extractor call failed: {0}")]
    Call(String),
    /// Call exceeded its budget
    #[error("extractor call timed out after {0}ms")]
    Timeout(u64),
}

/// Opaque `extract(system, user) -> json` seam. Implementations wrap a real
/// model endpoint; tests inject deterministic fakes.
pub trait ExtractorClient: Send + Sync {
    /// Run one extraction call, returning the raw model output
    fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ExtractorError>;
}

/// Built-in system prompt used when the governed prompt is missing and
/// fallback is allowed
pub const FALLBACK_SYSTEM_PROMPT: &str = r#"You are a Deterministic Data Extraction Engine.
You are NOT a chat assistant. You are a compiler component.

Your Goal: Scan the provided Source JSON and identify text segments that belong to the requested Topic IDs.
Your Output: A raw JSON array of "Pointer Objects."

---

### INPUT DATA
1. "Topics": A list of Topic IDs and their descriptions.
2. "Source_JSON": A raw JSON transcript. Nodes may contain:
   - "content": A plain-text fallback string.
   - "content_blocks": Structured blocks (text, code, tool_output). PREFER these for precise extraction.
   - "metadata": Contextual info (content_type, recipient, model).

---

### CRITICAL RULES (VIOLATION = SYSTEM FAILURE)
1. NO PARAPHRASING: You must return the text EXACTLY as it appears in the source.
2. NO MERGING: If information is split across nodes, output separate Pointer Objects.
3. PREFER STRUCTURE: If a fact is found in a `content_blocks` node (e.g., a code snippet or tool result), use the path to that specific block.
4. NO INTERPRETATION: Do not infer facts. Only extract explicit statements.

---

### OUTPUT SCHEMA
Return a JSON Object with a single key "extracted_pointers" containing a list:

{
  "extracted_pointers": [
    {
      "topic_id": "string (must match one of the Input Topics)",
      "json_path": "string (RFC 9535 standard path, e.g., $.messages[3].content_blocks[0].value)",
      "verbatim_quote": "string (exact copy-paste of the text found at that path)"
    }
  ]
}
"#;

/// Assemble the per-call user prompt from the topic contract and the
/// boundary-filtered messages
pub fn build_user_prompt(topic: &Topic, filtered: &serde_json::Value) -> String {
    format!(
        "TARGET TOPIC: \"{}\"\n\nDEFINITION:\n{}\n\nEXCLUSIONS (Do NOT extract):\n{}\n\nSOURCE JSON TO SCAN:\n{}",
        topic.id,
        topic.definition.scope_description,
        serde_json::to_string(&topic.definition.exclusion_criteria).unwrap_or_else(|_| "[]".into()),
        serde_json::to_string(filtered).unwrap_or_default(),
    )
}

/// Strip a ```json / ``` fence if the model wrapped its output in one
pub fn strip_code_fences(response: &str) -> &str {
    if let Some(inner) = response.split("```json").nth(1) {
        if let Some(body) = inner.split("```").next() {
            return body.trim();
        }
    }
    if let Some(inner) = response.split("```").nth(1) {
        return inner.trim();
    }
    response.trim()
}

#[derive(Debug, Deserialize)]
struct PointerResponse {
    #[serde(default)]
    extracted_pointers: Vec<Pointer>,
}

/// Parse the extractor output into pointers
pub fn parse_pointer_response(response: &str) -> Result<Vec<Pointer>, serde_json::Error> {
    let cleaned = strip_code_fences(response);
    let parsed: PointerResponse = serde_json::from_str(cleaned)?;
    Ok(parsed.extracted_pointers)
}

/// Rough token estimate: four chars per token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Standard-tier price used for cost estimates, USD per 1k total tokens
pub const L2_COST_PER_1K_TOKENS: f64 = 0.01;

/// Estimated spend for one call
pub fn estimate_cost_usd(tokens_in: u64, tokens_out: u64) -> f64 {
    ((tokens_in + tokens_out) as f64 / 1000.0) * L2_COST_PER_1K_TOKENS
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let fenced = "Here you go:\n```json\n{\"extracted_pointers\": []}\n```\nDone.";
        assert_eq!(strip_code_fences(fenced), "{\"extracted_pointers\": []}");
    }

    #[test]
    fn test_strip_plain_fence() {
        let fenced = "```\n{\"extracted_pointers\": []}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"extracted_pointers\": []}");
    }

    #[test]
    fn test_bare_response_passthrough() {
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_pointers() {
        let response = r#"{"extracted_pointers": [
            {"topic_id": "t", "json_path": "$.messages[0].content", "verbatim_quote": "beta"}
        ]}"#;
        let pointers = parse_pointer_response(response).unwrap();
        assert_eq!(pointers.len(), 1);
        assert_eq!(pointers[0].verbatim_quote, "beta");
    }

    #[test]
    fn test_parse_missing_key_is_empty() {
        let pointers = parse_pointer_response("{}").unwrap();
        assert!(pointers.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_pointer_response("not json at all").is_err());
    }

    #[test]
    fn test_cost_estimate() {
        let cost = estimate_cost_usd(1500, 500);
        assert!((cost - 0.02).abs() < 1e-9);
    }
}
