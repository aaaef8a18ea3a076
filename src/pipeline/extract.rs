//! Layout extraction: drive the external layout engine over one PDF.
//!
//! The engine (MinerU-style layout inference) is a black box reached through
//! a narrow contract: given a PDF it writes a `layout.json` tree plus a
//! directory of cropped block images. [`MineruCli`] runs it as a subprocess;
//! anything that understands the same contract (an in-process engine, a test
//! double) can implement [`LayoutExtractor`] instead and be injected via
//! [`crate::config::RunConfigBuilder::extractor`].
//!
//! ## Why a staging directory?
//!
//! The engine may crash halfway through a document. Letting it write
//! straight into the document's output folder would leave partial image sets
//! that a rerun then mixes with fresh ones. The adapter points the engine at
//! a throwaway staging dir inside the document folder (same filesystem, so
//! the final move is a rename) and only promotes `images/` after the engine
//! exits cleanly and the tree parses.

use crate::error::StageError;
use crate::layout::LayoutTree;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Name of the tree file the engine writes into its output directory.
const LAYOUT_FILE: &str = "layout.json";

/// Name of the image subdirectory, both in staging and in the document folder.
const IMAGES_DIR: &str = "images";

/// The layout-inference capability.
///
/// One call per document; calls are bounded by the orchestrator's worker
/// pool, which is what keeps concurrent engine invocations from
/// oversubscribing shared GPU memory. A failure is always per-document.
#[async_trait]
pub trait LayoutExtractor: Send + Sync {
    /// Analyse `pdf_path`, write cropped images under `image_dir`, and
    /// return the hierarchical content tree. Every image the returned tree
    /// references must exist under `image_dir` when this returns.
    async fn extract(&self, pdf_path: &Path, image_dir: &Path)
        -> Result<LayoutTree, StageError>;
}

/// Production extractor: invokes the engine command as a subprocess.
///
/// Invocation shape: `<command> <pdf> --out <staging-dir> --lang <hint>`.
/// The language hint is forwarded opaquely; the adapter attaches no meaning
/// to it.
pub struct MineruCli {
    command: String,
    language: String,
}

impl MineruCli {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        MineruCli {
            command: command.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl LayoutExtractor for MineruCli {
    async fn extract(
        &self,
        pdf_path: &Path,
        image_dir: &Path,
    ) -> Result<LayoutTree, StageError> {
        let doc_dir = image_dir
            .parent()
            .ok_or_else(|| StageError::extraction("image directory has no parent folder"))?;

        // Same-filesystem staging so the promotion below is a rename.
        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(doc_dir)
            .map_err(|e| StageError::extraction(format!("cannot create staging dir: {e}")))?;

        debug!(
            "Running layout engine: {} {} --out {}",
            self.command,
            pdf_path.display(),
            staging.path().display()
        );

        let output = Command::new(&self.command)
            .arg(pdf_path)
            .arg("--out")
            .arg(staging.path())
            .arg("--lang")
            .arg(&self.language)
            .output()
            .await
            .map_err(|e| {
                StageError::extraction(format!("cannot run '{}': {e}", self.command))
            })?;

        if !output.status.success() {
            return Err(StageError::extraction(format!(
                "engine exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let layout_path = staging.path().join(LAYOUT_FILE);
        let bytes = tokio::fs::read(&layout_path).await.map_err(|_| {
            StageError::extraction(format!("engine wrote no {LAYOUT_FILE}"))
        })?;
        let tree = parse_layout(&bytes)?;

        promote_images(staging.path(), image_dir, &tree).await?;
        Ok(tree)
    }
}

/// Parse the engine's tree file and normalise every image reference to
/// `images/<file>`, relative to the document folder.
///
/// Engines disagree about whether they record image paths as bare names,
/// staging-relative, or absolute; downstream only ever sees the normalised
/// form.
pub(crate) fn parse_layout(bytes: &[u8]) -> Result<LayoutTree, StageError> {
    let mut tree: LayoutTree = serde_json::from_slice(bytes)
        .map_err(|e| StageError::extraction(format!("unparsable {LAYOUT_FILE}: {e}")))?;

    for page in &mut tree.pages {
        for block in &mut page.blocks {
            if let Some(ref img) = block.image {
                let name = Path::new(img)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        StageError::extraction(format!("image reference '{img}' has no file name"))
                    })?;
                block.image = Some(format!("{IMAGES_DIR}/{name}"));
            }
        }
    }
    Ok(tree)
}

/// Move the engine's image directory from staging into the document folder.
async fn promote_images(
    staging: &Path,
    image_dir: &Path,
    tree: &LayoutTree,
) -> Result<(), StageError> {
    let staged = staging.join(IMAGES_DIR);
    let has_refs = tree
        .pages
        .iter()
        .flat_map(|p| &p.blocks)
        .any(|b| b.image.is_some());

    if staged.is_dir() {
        // A stale image set from an earlier run must not leak into this one.
        match tokio::fs::remove_dir_all(image_dir).await {
            Ok(()) => warn!("Replaced stale image set at {}", image_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StageError::extraction(format!(
                    "cannot clear old images at {}: {e}",
                    image_dir.display()
                )))
            }
        }
        tokio::fs::rename(&staged, image_dir).await.map_err(|e| {
            StageError::extraction(format!(
                "cannot move images into {}: {e}",
                image_dir.display()
            ))
        })?;
    } else if has_refs {
        return Err(StageError::extraction(
            "tree references cropped images but the engine wrote none",
        ));
    }

    Ok(())
}

/// Last few stderr lines, enough to identify the failure without dumping a
/// whole engine log into the run summary.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(3)..];
    if tail.is_empty() {
        "(no stderr)".to_string()
    } else {
        tail.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BlockKind;

    #[test]
    fn parse_layout_normalises_image_paths() {
        let json = br#"{
            "pages": [
                { "index": 0, "blocks": [
                    { "kind": "figure", "bbox": [0.0, 0.0, 10.0, 10.0], "image": "/staging/images/fig0.png" },
                    { "kind": "table",  "bbox": [0.0, 20.0, 10.0, 30.0], "image": "tab0.png" }
                ]}
            ]
        }"#;
        let tree = parse_layout(json).unwrap();
        assert_eq!(tree.pages[0].blocks[0].image.as_deref(), Some("images/fig0.png"));
        assert_eq!(tree.pages[0].blocks[1].image.as_deref(), Some("images/tab0.png"));
    }

    #[test]
    fn parse_layout_rejects_garbage() {
        let err = parse_layout(b"this is not json").unwrap_err();
        assert!(matches!(err, StageError::Extraction { .. }));
    }

    #[test]
    fn parse_layout_keeps_block_kinds() {
        let json = br#"{
            "pages": [
                { "index": 2, "blocks": [
                    { "kind": "formula", "bbox": [1.0, 2.0, 3.0, 4.0], "text": "$E = mc^2$" }
                ]}
            ]
        }"#;
        let tree = parse_layout(json).unwrap();
        assert_eq!(tree.pages[0].index, 2);
        assert_eq!(tree.pages[0].blocks[0].kind, BlockKind::Formula);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let tail = stderr_tail(b"one\ntwo\nthree\nfour\nfive\n");
        assert_eq!(tail, "three | four | five");
        assert_eq!(stderr_tail(b""), "(no stderr)");
    }
}
