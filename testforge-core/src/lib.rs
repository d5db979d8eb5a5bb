// TestForge Core Library
//
// Turns a requirements document into a confidence-tiered test-case tree and
// packages it as a mind-map archive, with defects and open questions found
// along the way. Main entry point is `TestCaseGenerator::generate`.

pub mod ai;
pub mod analytics;
pub mod archive;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod normalizer;
pub mod parser;
pub mod processor;
pub mod prompter;
pub mod types;

// Re-export main types and functions for easy use
pub use types::*;
pub use ai::{AiClient, CompletionBackend, ModelBackendImpl, RetryPolicy};
pub use archive::{build_archive, inspect, read_manifest, repair, ArchiveInspection, ArchiveMeta, RepairReport};
pub use config::GeneratorConfig;
pub use error::{ErrorKind, GenerationError};
pub use normalizer::{default_normalizers, Normalizer};
pub use processor::{GenerationFailure, GenerationOutcome, GenerationReport, PipelineState, TestCaseGenerator};
