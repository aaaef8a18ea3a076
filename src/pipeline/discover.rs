//! Work discovery: resolve an input specification to an ordered PDF list.
//!
//! ## Why sort and dedup here?
//!
//! Discovery completes before any worker starts, so this is the one place
//! that can guarantee batch-level invariants cheaply: every resolved path is
//! unique (a path is the at-most-once processing key) and the order is
//! reproducible across runs and filesystems (directory iteration order is
//! not portable; lexicographic order is).

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to process: a folder of PDFs or an explicit file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// Scan a directory for `*.pdf`, optionally recursing into subfolders.
    Directory { path: PathBuf, recursive: bool },
    /// Process exactly these files (non-PDFs and missing files are dropped
    /// with a warning).
    Files(Vec<PathBuf>),
}

impl InputSpec {
    /// Human-readable description for error messages.
    fn describe(&self) -> String {
        match self {
            InputSpec::Directory { path, .. } => path.display().to_string(),
            InputSpec::Files(files) => format!("{} explicit path(s)", files.len()),
        }
    }
}

/// Resolve the specification to a deduplicated, lexicographically sorted
/// list of PDF paths.
///
/// # Errors
/// [`PipelineError::NoDocuments`] when the specification resolves to zero
/// files — an empty batch is a caller mistake, not a successful no-op run.
pub fn discover(spec: &InputSpec) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths = match spec {
        InputSpec::Directory { path, recursive } => scan_directory(path, *recursive)?,
        InputSpec::Files(files) => files
            .iter()
            .filter(|p| {
                let keep = p.is_file() && is_pdf(p);
                if !keep {
                    warn!("Skipping non-PDF or missing input: {}", p.display());
                }
                keep
            })
            .cloned()
            .collect(),
    };

    paths.sort();
    paths.dedup();

    if paths.is_empty() {
        return Err(PipelineError::NoDocuments {
            input: spec.describe(),
        });
    }

    debug!("Discovered {} PDF(s)", paths.len());
    Ok(paths)
}

/// Case-insensitive `.pdf` extension check.
fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Collect PDFs under `root`, iteratively (explicit stack, no recursion
/// depth limit to trip over on deep corpora).
fn scan_directory(root: &Path, recursive: bool) -> Result<Vec<PathBuf>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::NoDocuments {
            input: root.display().to_string(),
        });
    }

    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                // Unreadable subfolder: skip it, keep scanning. Only the
                // root being unreadable means there is nothing to do.
                if dir == root {
                    return Err(PipelineError::NoDocuments {
                        input: format!("{} ({e})", root.display()),
                    });
                }
                warn!("Skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
            } else if is_pdf(&path) {
                found.push(path);
            }
        }
    }

    Ok(found)
}
