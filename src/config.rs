//! Configuration types for a batch extraction run.
//!
//! All run behaviour is controlled through [`RunConfig`], built via its
//! [`RunConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share configs across workers, log them, and diff two runs to understand
//! why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest — except the output root, which has no
//! sensible default and is therefore the one required argument.

use crate::error::PipelineError;
use crate::pipeline::enrich::MetadataEnricher;
use crate::pipeline::extract::LayoutExtractor;
use crate::progress::ProgressCallback;
use crate::run::CancelHandle;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one batch extraction run.
///
/// Built via [`RunConfig::builder`].
///
/// # Example
/// ```rust
/// use paperflow::RunConfig;
///
/// let config = RunConfig::builder("out")
///     .workers(8)
///     .enrichment_url("http://localhost:8070")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Root folder receiving one subfolder per document plus the run report.
    /// Required; an empty path is a startup error.
    pub output_root: PathBuf,

    /// Size of the worker pool. Default: 4.
    ///
    /// Each worker drives one document start-to-finish, and each document
    /// holds one layout-engine call at a time — so this bound is also the
    /// cap on concurrent engine invocations. Keep it small when the engine
    /// competes for shared GPU memory; raise it for CPU-only engines.
    pub workers: usize,

    /// Program invoked by the default layout-extractor adapter. Default: `mineru`.
    pub extractor_command: String,

    /// OCR language hint, forwarded opaquely to the layout engine. Default: `en`.
    pub language: String,

    /// Base URL of the bibliographic enrichment service, e.g.
    /// `http://localhost:8070`. `None` disables enrichment: records carry
    /// `not_attempted` metadata instead of `unavailable`.
    pub enrichment_url: Option<String>,

    /// Per-call timeout for the enrichment service in seconds. Default: 30.
    ///
    /// Enrichment is a network call to a service that may be down, slow, or
    /// absent — a normal operating condition, not an error. The timeout
    /// bounds how long one slow instance can stall a worker.
    pub enrichment_timeout_secs: u64,

    /// Extra attempts per enrichment endpoint after the first failure. Default: 2.
    pub enrichment_retries: u32,

    /// Initial enrichment retry delay in milliseconds (exponential backoff).
    /// Default: 500. Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Maximum caption-to-block distance (layout units) for folding a
    /// caption into the nearest preceding figure/table. Default: 50.0.
    ///
    /// No universally correct constant exists — column layouts vary — so the
    /// threshold is a knob rather than a hard-coded guess.
    pub caption_gap: f64,

    /// Pre-constructed layout extractor. Takes precedence over
    /// `extractor_command`. The seam tests and embedders use to supply
    /// an in-process engine.
    pub extractor: Option<Arc<dyn LayoutExtractor>>,

    /// Pre-constructed enricher. Takes precedence over `enrichment_url`.
    pub enricher: Option<Arc<dyn MetadataEnricher>>,

    /// Per-document progress events (None = no events).
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation handle: once cancelled, in-flight documents
    /// finish but no new ones start.
    pub cancel: Option<CancelHandle>,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("output_root", &self.output_root)
            .field("workers", &self.workers)
            .field("extractor_command", &self.extractor_command)
            .field("language", &self.language)
            .field("enrichment_url", &self.enrichment_url)
            .field("enrichment_timeout_secs", &self.enrichment_timeout_secs)
            .field("enrichment_retries", &self.enrichment_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("caption_gap", &self.caption_gap)
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn LayoutExtractor>"))
            .field("enricher", &self.enricher.as_ref().map(|_| "<dyn MetadataEnricher>"))
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder rooted at `output_root`.
    pub fn builder(output_root: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder {
            config: RunConfig {
                output_root: output_root.into(),
                workers: 4,
                extractor_command: "mineru".into(),
                language: "en".into(),
                enrichment_url: None,
                enrichment_timeout_secs: 30,
                enrichment_retries: 2,
                retry_backoff_ms: 500,
                caption_gap: 50.0,
                extractor: None,
                enricher: None,
                progress_callback: None,
                cancel: None,
            },
        }
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn extractor_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.extractor_command = cmd.into();
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn enrichment_url(mut self, url: impl Into<String>) -> Self {
        self.config.enrichment_url = Some(url.into());
        self
    }

    pub fn enrichment_timeout_secs(mut self, secs: u64) -> Self {
        self.config.enrichment_timeout_secs = secs.max(1);
        self
    }

    pub fn enrichment_retries(mut self, n: u32) -> Self {
        self.config.enrichment_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn caption_gap(mut self, units: f64) -> Self {
        self.config.caption_gap = units.max(0.0);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn LayoutExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.config.enricher = Some(enricher);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel(mut self, handle: CancelHandle) -> Self {
        self.config.cancel = Some(handle);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, PipelineError> {
        let c = &self.config;
        if c.output_root.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Output root must not be empty".into(),
            ));
        }
        if c.workers == 0 {
            return Err(PipelineError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if !c.caption_gap.is_finite() || c.caption_gap < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "Caption gap must be a finite non-negative number, got {}",
                c.caption_gap
            )));
        }
        Ok(self.config)
    }
}
