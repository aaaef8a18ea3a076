//! Streaming run API: emit document outcomes as they complete.
//!
//! ## Why stream?
//!
//! Large corpora take hours. A stream-based API lets callers surface each
//! document the moment it finishes — feed a dashboard, start downstream
//! indexing, or persist checkpoints — instead of waiting for the whole
//! batch. Outcomes arrive in completion order, not discovery order; key by
//! `document_id` if order matters.
//!
//! Unlike the eager [`crate::run::run`], the stream neither aggregates a
//! [`crate::output::RunSummary`] nor writes the run report — the caller is
//! the collector here.

use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::output::DocumentOutcome;
use crate::pipeline::discover::InputSpec;
use crate::run::{prepare, run_item};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document outcomes.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Process a corpus, yielding each document's outcome as it finishes.
///
/// Respects the same worker bound, failure isolation, and cancellation
/// semantics as the eager API.
///
/// # Errors
/// Fatal setup errors only (nothing to process, bad output root, bad
/// config); per-document failures arrive as
/// [`crate::output::DocumentStatus::Failed`] items in the stream.
pub async fn run_stream(
    input: &InputSpec,
    config: &RunConfig,
) -> Result<OutcomeStream, PipelineError> {
    let prepared = prepare(input, config)?;
    let total = prepared.items.len();
    info!(
        "Streaming {} document(s) across {} worker(s)",
        total, config.workers
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let workers = config.workers;
    let config = config.clone();
    let extractor = prepared.extractor;
    let enricher = prepared.enricher;

    let outcomes = stream::iter(prepared.items.into_iter())
        .map(move |item| {
            let extractor = Arc::clone(&extractor);
            let enricher = enricher.clone();
            let config = config.clone();
            async move { run_item(item, extractor, enricher, &config).await }
        })
        .buffer_unordered(workers);

    Ok(Box::pin(outcomes))
}
