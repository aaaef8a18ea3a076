//! Progress-callback trait for per-document run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive
//! real-time events as the pool works through the batch.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database row, or a
//! terminal progress bar — without the library knowing anything about how the
//! host application communicates. (The orchestrator's *internal* result
//! aggregation does use a channel; callbacks are the external face.) The
//! trait is `Send + Sync` because documents complete concurrently.

use crate::error::Stage;
use std::sync::Arc;

/// Called by the orchestrator as it processes each document.
///
/// Implementations must be `Send + Sync`; with a pool size above 1 the
/// per-document methods are called concurrently from different tasks, so
/// shared mutable state needs its own synchronisation. All methods have
/// default no-op bodies so callers only override what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after discovery, before any document starts.
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a worker picks up a document.
    fn on_document_start(&self, document_id: &str) {
        let _ = document_id;
    }

    /// Called when a document's merged record has been written.
    ///
    /// `blocks` is the number of content blocks in the record (useful for
    /// progress displays that track output volume).
    fn on_document_done(&self, document_id: &str, blocks: usize) {
        let _ = (document_id, blocks);
    }

    /// Called when a document fails in any stage.
    fn on_document_failed(&self, document_id: &str, stage: Stage, message: &str) {
        let _ = (document_id, stage, message);
    }

    /// Called when a document is skipped because the run was cancelled.
    fn on_document_skipped(&self, document_id: &str) {
        let _ = document_id;
    }

    /// Called once after every document has finished or been skipped.
    fn on_run_complete(&self, processed: usize, succeeded: usize) {
        let _ = (processed, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
