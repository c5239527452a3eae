//! Cognition
//!
//! Topic assembly over the recalled corpus: content-addressed artifacts,
//! provenance edges, and monotonic conflict resolution between new facts and
//! the topic's governed intents.

mod assembler;
mod extract;

pub use assembler::{
    ArtifactEnvelope, ArtifactPayload, AssembleError, AssembledArtifact, Assembler,
    AssemblerConfig, Coverage, CoverageSpan, CoverageStatus, ExcerptBlock, ExcerptMessage,
    Provenance, RawExcerpt, Visuals, canonical_content_hash, slugify,
};
pub use extract::{CognitionOutput, CognitiveExtractor};
