//! # paperflow
//!
//! Batch-extract scholarly PDFs into structured JSON records.
//!
//! ## Why this crate?
//!
//! Layout-aware extraction engines turn one PDF into a deeply nested tree of
//! pages, blocks, and cropped images — useful, but unwieldy downstream, and
//! running them over a corpus means babysitting GPUs, flaky bibliographic
//! services, and the occasional malformed PDF. This crate is the
//! orchestration layer: it fans a corpus across a bounded worker pool,
//! drives every document through a fixed stage sequence, flattens each tree
//! into one reading-order schema, attaches bibliographic metadata when a
//! GROBID-style service is reachable, and reports per-document failures
//! without ever aborting the batch.
//!
//! ## Pipeline Overview
//!
//! ```text
//! corpus
//!  │
//!  ├─ 1. Discover  resolve a folder or file list to ordered work items
//!  ├─ 2. Extract   external layout engine → tree + cropped images
//!  ├─ 3. Flatten   tree → reading-order blocks with global indices
//!  ├─ 4. Enrich    header + references from the service (best-effort)
//!  ├─ 5. Merge     content + metadata → one record (pure, idempotent)
//!  └─ 6. Write     <output>/<doc-id>/record.json + images/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperflow::{run, InputSpec, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::builder("out")
//!         .workers(4)
//!         .enrichment_url("http://localhost:8070")
//!         .build()?;
//!     let input = InputSpec::Directory {
//!         path: "corpus".into(),
//!         recursive: true,
//!     };
//!     let summary = run(&input, &config).await?;
//!     eprintln!("{}/{} documents succeeded", summary.succeeded, summary.processed);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure philosophy
//!
//! Only an empty batch or an unusable output root is fatal. A document that
//! crashes the engine, violates the tree contract, or cannot be written
//! becomes one entry in the run summary; its siblings are untouched. An
//! unreachable enrichment service is not even that — records then carry
//! explicitly absent (`unavailable`) metadata and still count as successes.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paperflow = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RunConfig, RunConfigBuilder};
pub use error::{PipelineError, Stage, StageError};
pub use layout::{BBox, BlockKind, LayoutBlock, LayoutPage, LayoutTree};
pub use output::{
    ContentBlock, DocumentOutcome, DocumentStatus, Enrichment, EnrichmentMetadata, FailureRecord,
    FlatRecord, Header, MergedRecord, Provenance, Reference, RunSummary,
};
pub use pipeline::discover::InputSpec;
pub use pipeline::enrich::{GrobidEnricher, MetadataEnricher};
pub use pipeline::extract::{LayoutExtractor, MineruCli};
pub use pipeline::flatten::flatten;
pub use pipeline::merge::merge;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use run::{run, CancelHandle, RECORD_FILE, SUMMARY_FILE};
pub use stream::{run_stream, OutcomeStream};
