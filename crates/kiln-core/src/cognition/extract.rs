//! Cognitive Extractor Seam
//!
//! An optional external model that distills recalled evidence into atomic
//! facts and visual representations. Like the pointer extractor, it is an
//! opaque function: the assembler works identically with or without one.

use serde::{Deserialize, Serialize};

use crate::compile::ExtractorError;

/// What the cognitive extractor produces from aggregated brick text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CognitionOutput {
    /// Atomic propositional statements
    #[serde(default)]
    pub facts: Vec<String>,
    /// Mermaid diagrams for flows and structures
    #[serde(default)]
    pub mermaid: Vec<String>,
    /// LaTeX formulas found or derived
    #[serde(default)]
    pub latex: Vec<String>,
}

/// Opaque `extract(context) -> {facts, mermaid, latex}` seam
pub trait CognitiveExtractor: Send + Sync {
    /// Distill the aggregated context
    fn extract(&self, context: &str) -> Result<CognitionOutput, ExtractorError>;
}
