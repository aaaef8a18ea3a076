//! Eager (whole-batch) run entry point.
//!
//! The orchestrator owns everything stateful about a run: the materialized
//! work queue, the bounded worker pool, the per-document stage sequencing,
//! failure isolation, output-path management, and the final summary/report.
//!
//! ## Per-document state machine
//!
//! ```text
//! Queued → Extracting → Flattening → Enriching → Merging → Writing → Done
//!              │            │            │                     │
//!              ▼            ▼            ▼ (never fails —      ▼
//!          Failed       Failed          degrades to        Failed
//!        (extracting) (flattening)     Unavailable)       (writing)
//! ```
//!
//! One document's failure never blocks or aborts its siblings; it becomes a
//! [`FailureRecord`] in the summary and the pool moves on.
//!
//! ## Why a collector channel instead of a shared mutex?
//!
//! Workers finish in arbitrary order. Instead of locking a shared summary
//! from every worker, each worker sends a [`DocumentOutcome`] message and a
//! single collector task owns the accumulator exclusively — no lost updates
//! by construction, and the aggregation is testable in isolation.

use crate::config::RunConfig;
use crate::error::{PipelineError, StageError};
use crate::output::{
    DocumentOutcome, DocumentStatus, Enrichment, FailureRecord, RunSummary,
};
use crate::pipeline::discover::{discover, InputSpec};
use crate::pipeline::enrich::{GrobidEnricher, MetadataEnricher};
use crate::pipeline::extract::{LayoutExtractor, MineruCli};
use crate::pipeline::{flatten, merge};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the run-level report written into the output root.
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Name of the per-document record inside each document folder.
pub const RECORD_FILE: &str = "record.json";

/// Cooperative early-termination handle.
///
/// Cancelling lets in-flight documents finish; queued documents are skipped
/// and counted in [`RunSummary::skipped`]. Already-finished outcomes are
/// always preserved.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One unit of work: a source PDF and where its outputs go.
///
/// Created once per discovered path; the source path is the at-most-once
/// processing key (discovery already deduplicated).
pub(crate) struct WorkItem {
    pub source_path: PathBuf,
    pub document_id: String,
    pub doc_dir: PathBuf,
}

/// Everything resolved up front, before the first worker starts.
pub(crate) struct PreparedRun {
    pub items: Vec<WorkItem>,
    pub extractor: Arc<dyn LayoutExtractor>,
    pub enricher: Option<Arc<dyn MetadataEnricher>>,
}

/// Process a whole corpus and return the aggregate summary.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(RunSummary)` whenever the run could start, even if every document
/// failed (check `summary.failed`).
///
/// # Errors
/// `Err(PipelineError)` only for fatal conditions: nothing to process,
/// unusable output root, invalid configuration, or an unwritable run report.
pub async fn run(input: &InputSpec, config: &RunConfig) -> Result<RunSummary, PipelineError> {
    let started = Instant::now();
    let prepared = prepare(input, config)?;
    let total = prepared.items.len();
    info!(
        "Dispatching {} document(s) across {} worker(s)",
        total, config.workers
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let (tx, rx) = mpsc::unbounded_channel::<DocumentOutcome>();
    let collector = tokio::spawn(collect_outcomes(rx));

    let extractor = prepared.extractor;
    let enricher = prepared.enricher;
    stream::iter(prepared.items.into_iter())
        .map(|item| {
            let tx = tx.clone();
            let extractor = Arc::clone(&extractor);
            let enricher = enricher.clone();
            let config = config.clone();
            async move {
                let outcome = run_item(item, extractor, enricher, &config).await;
                // The receiver only closes if the collector panicked; the
                // join below surfaces that.
                let _ = tx.send(outcome);
            }
        })
        .buffer_unordered(config.workers)
        .collect::<Vec<()>>()
        .await;
    drop(tx);

    let mut summary = collector
        .await
        .map_err(|e| PipelineError::Internal(format!("collector task panicked: {e}")))?;
    summary.discovered = total;
    summary.duration_ms = started.elapsed().as_millis() as u64;

    write_report(&config.output_root, &summary).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(summary.processed, summary.succeeded);
    }
    info!(
        "Run complete: {}/{} succeeded, {} failed, {} skipped, {}ms",
        summary.succeeded,
        summary.processed,
        summary.failed.len(),
        summary.skipped,
        summary.duration_ms
    );

    Ok(summary)
}

/// Resolve the output root, the work queue, and both adapters before any
/// worker starts. Shared by [`run`] and [`crate::stream::run_stream`].
pub(crate) fn prepare(
    input: &InputSpec,
    config: &RunConfig,
) -> Result<PreparedRun, PipelineError> {
    std::fs::create_dir_all(&config.output_root).map_err(|e| PipelineError::OutputRoot {
        path: config.output_root.clone(),
        source: e,
    })?;

    let paths = discover(input)?;
    let items = assign_items(paths, &config.output_root);

    // Injected adapters win over config-derived ones, mirroring the usual
    // "pre-built beats named" resolution order.
    let extractor: Arc<dyn LayoutExtractor> = match config.extractor {
        Some(ref e) => Arc::clone(e),
        None => Arc::new(MineruCli::new(
            config.extractor_command.clone(),
            config.language.clone(),
        )),
    };

    let enricher: Option<Arc<dyn MetadataEnricher>> = match (&config.enricher, &config.enrichment_url)
    {
        (Some(e), _) => Some(Arc::clone(e)),
        (None, Some(url)) => Some(Arc::new(GrobidEnricher::new(
            url.clone(),
            config.enrichment_timeout_secs,
            config.enrichment_retries,
            config.retry_backoff_ms,
        )?)),
        (None, None) => None,
    };

    Ok(PreparedRun {
        items,
        extractor,
        enricher,
    })
}

/// Run one work item to its terminal status, honouring cancellation.
pub(crate) async fn run_item(
    item: WorkItem,
    extractor: Arc<dyn LayoutExtractor>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
    config: &RunConfig,
) -> DocumentOutcome {
    let cancelled = config
        .cancel
        .as_ref()
        .map(CancelHandle::is_cancelled)
        .unwrap_or(false);
    if cancelled {
        debug!("{}: skipped (run cancelled)", item.document_id);
        if let Some(ref cb) = config.progress_callback {
            cb.on_document_skipped(&item.document_id);
        }
        return DocumentOutcome {
            source_path: item.source_path,
            document_id: item.document_id,
            status: DocumentStatus::Skipped,
        };
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&item.document_id);
    }

    let status = match drive_stages(&item, extractor.as_ref(), enricher.as_deref(), config).await
    {
        Ok((record_path, blocks)) => {
            debug!("{}: {} blocks → {}", item.document_id, blocks, record_path.display());
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_done(&item.document_id, blocks);
            }
            DocumentStatus::Done { record_path }
        }
        Err(err) => {
            let stage = err.stage();
            match err {
                // A schema error means the engine and this crate disagree
                // about the wire shape — likely version skew, so make it
                // loud.
                StageError::Schema { .. } => warn!(
                    "{}: SCHEMA MISMATCH (engine version skew?): {err}",
                    item.document_id
                ),
                _ => warn!("{}: failed while {stage}: {err}", item.document_id),
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_failed(&item.document_id, stage, &err.to_string());
            }
            DocumentStatus::Failed {
                stage,
                message: err.to_string(),
            }
        }
    };

    DocumentOutcome {
        source_path: item.source_path,
        document_id: item.document_id,
        status,
    }
}

/// The fixed stage sequence for one document.
async fn drive_stages(
    item: &WorkItem,
    extractor: &dyn LayoutExtractor,
    enricher: Option<&dyn MetadataEnricher>,
    config: &RunConfig,
) -> Result<(PathBuf, usize), StageError> {
    tokio::fs::create_dir_all(&item.doc_dir)
        .await
        .map_err(|e| StageError::write(&item.doc_dir, e))?;

    // Extracting
    let image_dir = item.doc_dir.join("images");
    let tree = extractor.extract(&item.source_path, &image_dir).await?;

    // Flattening — tree is dropped right after, nothing else may touch it.
    let flat = flatten::flatten(&tree, config.caption_gap)?;
    drop(tree);

    // Enriching — best-effort by construction.
    let enrichment = match enricher {
        Some(e) => e.enrich(&item.source_path).await,
        None => Enrichment::NotAttempted,
    };

    // Merging
    let blocks = flat.blocks.len();
    let record = merge::merge(&item.document_id, flat, enrichment);

    // Writing — temp file + rename so a crash never leaves a torn record.
    let record_path = item.doc_dir.join(RECORD_FILE);
    let json = serde_json::to_vec_pretty(&record)
        .map_err(|e| StageError::write(&record_path, e))?;
    let tmp_path = record_path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| StageError::write(&record_path, e))?;
    tokio::fs::rename(&tmp_path, &record_path)
        .await
        .map_err(|e| StageError::write(&record_path, e))?;

    Ok((record_path, blocks))
}

/// The single owner of the summary accumulator.
async fn collect_outcomes(mut rx: mpsc::UnboundedReceiver<DocumentOutcome>) -> RunSummary {
    let mut summary = RunSummary::default();
    while let Some(outcome) = rx.recv().await {
        match outcome.status {
            DocumentStatus::Done { .. } => {
                summary.processed += 1;
                summary.succeeded += 1;
            }
            DocumentStatus::Failed { stage, message } => {
                summary.processed += 1;
                summary.failed.push(FailureRecord {
                    source_path: outcome.source_path,
                    stage,
                    message,
                });
            }
            DocumentStatus::Skipped => summary.skipped += 1,
        }
    }
    // Completion order depends on scheduling; the report should not.
    summary.failed.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    summary
}

/// Persist the run-level report next to the document folders.
async fn write_report(output_root: &Path, summary: &RunSummary) -> Result<(), PipelineError> {
    let path = output_root.join(SUMMARY_FILE);
    let json = serde_json::to_vec_pretty(summary)
        .map_err(|e| PipelineError::Internal(format!("serialise summary: {e}")))?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| PipelineError::ReportWrite {
            path: path.clone(),
            source: e,
        })?;
    Ok(())
}

/// Map discovered paths to work items with unique, filesystem-safe ids.
fn assign_items(paths: Vec<PathBuf>, output_root: &Path) -> Vec<WorkItem> {
    let mut used: HashSet<String> = HashSet::new();
    paths
        .into_iter()
        .map(|path| {
            let base = document_id_for(&path);
            let mut id = base.clone();
            let mut n = 2;
            while !used.insert(id.clone()) {
                id = format!("{base}-{n}");
                n += 1;
            }
            WorkItem {
                doc_dir: output_root.join(&id),
                document_id: id,
                source_path: path,
            }
        })
        .collect()
}

/// Stable identifier from the source filename: the stem with anything
/// filesystem-hostile replaced.
fn document_id_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut id: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while id.starts_with('.') {
        id.remove(0);
    }
    if id.is_empty() {
        id = "document".into();
    }
    id
}
