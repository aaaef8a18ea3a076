//! Error types for the paperflow library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (nothing to
//!   process, unusable configuration, output root cannot be created).
//!   Returned as `Err(PipelineError)` from the top-level `run*` functions.
//!
//! * [`StageError`] — **Non-fatal**: a single document failed in one pipeline
//!   stage (engine crash, contract mismatch, unwritable output folder) while
//!   every other document is fine. Recorded in the
//!   [`crate::output::RunSummary`] so callers can inspect partial success
//!   rather than losing the whole batch to one bad file.
//!
//! Enrichment unavailability is deliberately *neither* of these — it is an
//! expected operating condition modelled by
//! [`crate::output::Enrichment::Unavailable`], not an error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paperflow library.
///
/// Document-level failures use [`StageError`] and are stored in the
/// [`crate::output::RunSummary`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input specification resolved to zero PDF files.
    #[error("No PDF documents found for input '{input}'\nCheck the path, or pass --recursive for nested folders.")]
    NoDocuments { input: String },

    /// Builder or CLI validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The output root could not be created or is not writable.
    #[error("Cannot prepare output root '{path}': {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run-level report could not be persisted.
    #[error("Failed to write run report '{path}': {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage a document was in when it failed.
///
/// `Enriching` appears in progress events and state transitions but never in
/// a failure record: enrichment problems degrade to
/// [`crate::output::Enrichment::Unavailable`] instead of failing the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Flattening,
    Enriching,
    Merging,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extracting => "extracting",
            Stage::Flattening => "flattening",
            Stage::Enriching => "enriching",
            Stage::Merging => "merging",
            Stage::Writing => "writing",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single document.
///
/// Stored in the run summary when a document fails. The batch continues
/// regardless of how many documents fail.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StageError {
    /// The layout engine failed on this document (malformed PDF, resource
    /// exhaustion, engine crash).
    #[error("layout extraction failed: {reason}")]
    Extraction { reason: String },

    /// The layout tree violated the extractor/flattener contract.
    ///
    /// Surfaced at WARN by the orchestrator: a schema error usually means the
    /// engine version and this crate disagree about the wire shape.
    #[error("layout tree is structurally invalid: {detail}")]
    Schema { detail: String },

    /// The merged record (or its folder) could not be written.
    #[error("failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },
}

impl StageError {
    /// The stage this error belongs to in the per-document state machine.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Extraction { .. } => Stage::Extracting,
            StageError::Schema { .. } => Stage::Flattening,
            StageError::Write { .. } => Stage::Writing,
        }
    }

    /// Shorthand for an extraction failure.
    pub fn extraction(reason: impl Into<String>) -> Self {
        StageError::Extraction {
            reason: reason.into(),
        }
    }

    /// Shorthand for a schema violation.
    pub fn schema(detail: impl Into<String>) -> Self {
        StageError::Schema {
            detail: detail.into(),
        }
    }

    /// Shorthand for a write failure.
    pub fn write(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        StageError::Write {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
