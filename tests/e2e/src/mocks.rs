//! Deterministic mocks for the opaque model seams

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use kiln_core::cognition::{CognitionOutput, CognitiveExtractor};
use kiln_core::compile::{ExtractorClient, ExtractorError};
use kiln_core::vector::{Embedder, EmbeddingError};

/// Embedding dimensionality used across the e2e suite
pub const TEST_DIMS: usize = 8;

/// Deterministic embedder with controllable collisions.
///
/// Texts containing the same keyword map to the same basis vector (cosine
/// similarity 1.0); everything else falls back to a normalised character
/// histogram, which keeps unrelated texts far apart.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        assert!(keywords.len() < TEST_DIMS, "one slot is reserved for fallback");
        Self {
            keywords: keywords.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

impl Embedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        TEST_DIMS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        for (i, keyword) in self.keywords.iter().enumerate() {
            if lower.contains(keyword) {
                let mut v = vec![0.0f32; TEST_DIMS];
                v[i] = 1.0;
                return Ok(v);
            }
        }

        let mut v = vec![0.0f32; TEST_DIMS];
        for (i, b) in lower.bytes().enumerate() {
            v[(b as usize + i) % TEST_DIMS] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        Ok(v.into_iter().map(|x| x / norm).collect())
    }
}

/// Extractor that replays queued responses in order; an exhausted queue
/// errors, which doubles as an assertion that no unexpected call happened
pub struct ScriptedExtractor {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    /// Queue a single-pointer response
    pub fn push_pointer(&self, topic_id: &str, json_path: &str, quote: &str) {
        self.push(
            serde_json::json!({
                "extracted_pointers": [{
                    "topic_id": topic_id,
                    "json_path": json_path,
                    "verbatim_quote": quote,
                }]
            })
            .to_string(),
        );
    }
}

impl ExtractorClient for ScriptedExtractor {
    fn generate(&self, _system: &str, _user: &str) -> Result<String, ExtractorError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExtractorError::Call("scripted extractor exhausted".to_string()))
    }
}

/// Cognitive extractor returning a fixed fact set
pub struct StaticCognition {
    pub facts: Vec<String>,
}

impl StaticCognition {
    pub fn new(facts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            facts: facts.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl CognitiveExtractor for StaticCognition {
    fn extract(&self, _context: &str) -> Result<CognitionOutput, ExtractorError> {
        Ok(CognitionOutput {
            facts: self.facts.clone(),
            mermaid: vec![],
            latex: vec![],
        })
    }
}

/// A small branched conversation dump: root -> question -> two answers
pub fn branched_dump() -> serde_json::Value {
    serde_json::json!({
        "conversations": [{
            "id": "conv-e2e",
            "title": "Branching discussion",
            "mapping": {
                "root": {"parent": null, "children": ["q"]},
                "q": {
                    "parent": "root",
                    "children": ["a1", "a2"],
                    "message": {
                        "id": "msg-q",
                        "author": {"role": "user"},
                        "content": {"content_type": "text",
                                    "parts": ["Which similarity metric should we use?"]},
                        "create_time": 1700000000.0
                    }
                },
                "a1": {
                    "parent": "q",
                    "children": [],
                    "message": {
                        "id": "msg-a1",
                        "author": {"role": "assistant"},
                        "content": {"content_type": "text",
                                    "parts": ["Use cosine similarity for normalised vectors."]},
                        "create_time": 1700000001.0
                    }
                },
                "a2": {
                    "parent": "q",
                    "children": [],
                    "message": {
                        "id": "msg-a2",
                        "author": {"role": "assistant"},
                        "content": {"content_type": "text",
                                    "parts": ["Euclidean distance also works for dense embeddings."]},
                        "create_time": 1700000002.0
                    }
                }
            }
        }]
    })
}
