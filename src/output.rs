//! Output types: the flat content schema, enrichment metadata, the merged
//! per-document record, and the run-level summary.
//!
//! Everything here serialises with `serde` so the `Writing` stage can persist
//! records byte-deterministically: the same inputs always produce the same
//! JSON, which is what makes merge idempotence testable at the byte level.

use crate::error::Stage;
use crate::layout::{BBox, BlockKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Flat content ─────────────────────────────────────────────────────────

/// One block of the flattened document, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Global index: strictly increasing, contiguous from zero across the
    /// whole document.
    pub index: usize,
    /// 0-based source page.
    pub page: usize,
    pub kind: BlockKind,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Cropped-image path for figure/table blocks, relative to the document
    /// output folder. Carried through from the layout tree unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Caption text folded into this figure/table block by adjacency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// The flattened document: an ordered sequence of typed blocks.
///
/// Invariants (checked by the flattener, relied on by everything downstream):
/// block order is reading order (page-major, then top-to-bottom, then
/// left-to-right), and `blocks[i].index == i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub blocks: Vec<ContentBlock>,
}

// ── Enrichment ───────────────────────────────────────────────────────────

/// Tri-state result of the best-effort enrichment stage.
///
/// A nullable field cannot distinguish "the service was never asked" from
/// "the service was unreachable" from "the service answered with nothing".
/// The adjacent `status` tag keeps the three cases byte-distinct in the
/// persisted record:
///
/// ```json
/// { "status": "present", "value": { ... } }
/// { "status": "unavailable" }
/// { "status": "not_attempted" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Enrichment<T> {
    /// The service was reached and answered; an empty answer is still
    /// `Present` of an empty value.
    Present(T),
    /// The service was asked and could not answer (timeout, refusal,
    /// malformed response). Expected, non-fatal.
    Unavailable,
    /// No enrichment endpoint was configured for this run.
    NotAttempted,
}

impl<T> Enrichment<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Enrichment::Present(_))
    }

    pub fn as_present(&self) -> Option<&T> {
        match self {
            Enrichment::Present(v) => Some(v),
            _ => None,
        }
    }
}

/// Bibliographic header of a document, as parsed by the enrichment service.
///
/// All fields optional: the service reports what it found, never invents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Journal or conference the document appeared in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Header {
    /// True when the service produced no usable field at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.authors.is_empty() && self.venue.is_none() && self.date.is_none()
    }
}

/// One entry of the externally parsed reference list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Verbatim citation string as it appears in the bibliography.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Journal, conference, or book the reference points into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

/// What the enrichment service returned for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentMetadata {
    pub header: Header,
    pub references: Vec<Reference>,
}

// ── Merged record ────────────────────────────────────────────────────────

/// Which stages actually contributed to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub extractor_used: bool,
    pub enrichment_used: bool,
}

/// The final per-document output: flattened content plus attached metadata.
///
/// Created once per successfully flattened document, whether or not
/// enrichment succeeded. Merging never rewrites `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// Stable identifier derived from the source filename; also the name of
    /// the document's output folder.
    pub document_id: String,
    pub content: FlatRecord,
    pub header: Enrichment<Header>,
    pub references: Enrichment<Vec<Reference>>,
    pub provenance: Provenance,
}

// ── Run summary ──────────────────────────────────────────────────────────

/// One failed document in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_path: PathBuf,
    pub stage: Stage,
    pub message: String,
}

/// Aggregate outcome of a whole batch run.
///
/// The only externally observable terminal state of a run; also persisted as
/// `run_summary.json` in the output root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Work items produced by discovery.
    pub discovered: usize,
    /// Items that actually ran (succeeded + failed).
    pub processed: usize,
    pub succeeded: usize,
    /// Items never started because the run was cancelled.
    pub skipped: usize,
    pub failed: Vec<FailureRecord>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }
}

// ── Per-document outcome (streaming / collector message) ─────────────────

/// Terminal status of one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Record written; `record_path` points at the persisted JSON.
    Done { record_path: PathBuf },
    Failed { stage: Stage, message: String },
    /// Never started: the run was cancelled first.
    Skipped,
}

/// The message a worker emits when it finishes (or skips) one document.
///
/// Workers send these over a channel to the single collector task that owns
/// the [`RunSummary`]; the streaming API yields them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub source_path: PathBuf,
    pub document_id: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
}
