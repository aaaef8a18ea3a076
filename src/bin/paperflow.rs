//! CLI binary for paperflow.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`,
//! renders progress, and turns the run summary into an exit status.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperflow::{
    run, CancelHandle, InputSpec, ProgressCallback, RunConfig, RunProgressCallback, Stage,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per finished
/// document. Documents complete out of order, so all state is keyed by
/// document id and guarded for concurrent access.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar length is set by `on_run_start` once discovery has counted
    /// the corpus.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning corpus…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, id: &str) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(id)
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, document_id: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(document_id.to_string(), Instant::now());
        self.bar.set_message(document_id.to_string());
    }

    fn on_document_done(&self, document_id: &str, blocks: usize) {
        let secs = self.elapsed_secs(document_id);
        self.bar.println(format!(
            "  {} {:<40}  {:<12}  {}",
            green("✓"),
            document_id,
            dim(&format!("{blocks:>4} blocks")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, document_id: &str, stage: Stage, message: &str) {
        let secs = self.elapsed_secs(document_id);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if message.len() > 80 {
            format!("{}\u{2026}", &message[..79])
        } else {
            message.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}  {}",
            red("✗"),
            document_id,
            red(&format!("[{stage}]")),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_skipped(&self, document_id: &str) {
        self.bar
            .println(format!("  {} {:<40}  cancelled", dim("−"), document_id));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, processed: usize, succeeded: usize) {
        let failed = processed.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                processed,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every PDF in a folder
  paperflow corpus/ -o out

  # Recurse into subfolders, 8 workers
  paperflow corpus/ -R -w 8 -o out

  # Explicit file list with bibliographic enrichment
  paperflow a.pdf b.pdf -o out --grobid-url http://localhost:8070

  # Machine-readable summary on stdout
  paperflow corpus/ -o out --json > summary.json

OUTPUT LAYOUT:
  <out>/<doc-id>/record.json   merged structured record
  <out>/<doc-id>/images/       cropped figure/table images
  <out>/run_summary.json       run-level report incl. all failures

EXIT STATUS:
  0  every document succeeded
  1  the run finished but some documents failed
  2  the run could not start (no documents, bad output root, bad config)

ENVIRONMENT VARIABLES:
  PAPERFLOW_OUTPUT        Default output root
  PAPERFLOW_GROBID_URL    Enrichment service base URL
  PAPERFLOW_EXTRACTOR     Layout engine command (default: mineru)
  PAPERFLOW_WORKERS       Worker pool size

The enrichment service being down is not an error: records are then written
with explicitly absent metadata and the documents still count as succeeded.
"#;

/// Batch-extract scholarly PDFs into structured JSON records.
#[derive(Parser, Debug)]
#[command(
    name = "paperflow",
    version,
    about = "Batch-extract scholarly PDFs into structured JSON records",
    long_about = "Run a corpus of PDFs through layout extraction, reading-order flattening, \
and optional GROBID-style bibliographic enrichment. One folder per document, one JSON \
record per document, one summary per run. A single bad PDF never aborts the batch.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, or a single directory containing PDFs.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output root; receives one folder per document plus the run report.
    #[arg(short, long, env = "PAPERFLOW_OUTPUT")]
    output: PathBuf,

    /// Recurse into subdirectories when the input is a directory.
    #[arg(short = 'R', long, env = "PAPERFLOW_RECURSIVE")]
    recursive: bool,

    /// Worker pool size — also the cap on concurrent layout-engine calls.
    #[arg(short, long, env = "PAPERFLOW_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Layout engine command.
    #[arg(long, env = "PAPERFLOW_EXTRACTOR", default_value = "mineru")]
    extractor: String,

    /// OCR language hint, forwarded opaquely to the layout engine.
    #[arg(long, env = "PAPERFLOW_LANG", default_value = "en")]
    lang: String,

    /// Bibliographic enrichment service base URL (e.g. http://localhost:8070).
    /// Omit to skip enrichment entirely.
    #[arg(long, env = "PAPERFLOW_GROBID_URL")]
    grobid_url: Option<String>,

    /// Per-call enrichment timeout in seconds.
    #[arg(long, env = "PAPERFLOW_ENRICH_TIMEOUT", default_value_t = 30)]
    enrich_timeout: u64,

    /// Extra enrichment attempts per endpoint after the first failure.
    #[arg(long, env = "PAPERFLOW_ENRICH_RETRIES", default_value_t = 2)]
    enrich_retries: u32,

    /// Initial enrichment retry delay in milliseconds (doubles per attempt).
    #[arg(long, env = "PAPERFLOW_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Caption-to-figure/table association threshold in layout units.
    #[arg(long, env = "PAPERFLOW_CAPTION_GAP", default_value_t = 50.0)]
    caption_gap: f64,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "PAPERFLOW_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PAPERFLOW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAPERFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAPERFLOW_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match real_main().await {
        Ok(code) => code,
        // Fatal: the run never started.
        Err(e) => {
            eprintln!("{} {e:#}", red("✘"));
            ExitCode::from(2)
        }
    }
}

async fn real_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library logs would tear the progress bar apart, so they are muted
    // while the bar is active unless --verbose explicitly asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Input specification ──────────────────────────────────────────────
    let input = if cli.inputs.len() == 1 && cli.inputs[0].is_dir() {
        InputSpec::Directory {
            path: cli.inputs[0].clone(),
            recursive: cli.recursive,
        }
    } else {
        InputSpec::Files(cli.inputs.clone())
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let cancel = CancelHandle::new();
    let mut builder = RunConfig::builder(&cli.output)
        .workers(cli.workers)
        .extractor_command(&cli.extractor)
        .language(&cli.lang)
        .enrichment_timeout_secs(cli.enrich_timeout)
        .enrichment_retries(cli.enrich_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .caption_gap(cli.caption_gap)
        .cancel(cancel.clone());

    if let Some(ref url) = cli.grobid_url {
        builder = builder.enrichment_url(url);
    }
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;

    // ── Ctrl-C → cooperative cancellation ────────────────────────────────
    // First press: finish in-flight documents, skip the rest. The second
    // press falls through to the runtime's default abort.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                cyan("interrupt — finishing in-flight documents, skipping the rest")
            );
            cancel.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = run(&input, &config).await.context("Run failed to start")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        if !summary.failed.is_empty() {
            eprintln!("{}", bold("Failed documents:"));
            for f in &summary.failed {
                eprintln!(
                    "  {} {}  {}  {}",
                    red("✗"),
                    f.source_path.display(),
                    red(&format!("[{}]", f.stage)),
                    f.message
                );
            }
        }
        eprintln!(
            "   {} succeeded / {} failed / {} skipped  —  {}ms  →  {}",
            summary.succeeded,
            summary.failed.len(),
            summary.skipped,
            summary.duration_ms,
            bold(&cli.output.display().to_string()),
        );
    }

    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
