//! Extractor wiring for the binaries
//!
//! The core treats the extraction model as an opaque function; deployments
//! wire a real endpoint through [`ExtractorClient`]. Without one configured,
//! the offline client keeps every pipeline stage runnable: it returns an
//! empty pointer set, so syncs advance boundaries without materialising
//! anything.

use kiln_core::compile::{ExtractorClient, ExtractorError};

/// Stand-in extractor for deployments without a model endpoint
pub struct OfflineExtractor;

impl ExtractorClient for OfflineExtractor {
    fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, ExtractorError> {
        tracing::warn!("no extractor endpoint configured, returning empty pointer set");
        Ok(r#"{"extracted_pointers": []}"#.to_string())
    }
}
