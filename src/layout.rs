//! Layout tree: the hierarchical wire model produced by the layout engine.
//!
//! The engine analyses a PDF and emits pages of typed blocks, each with a
//! bounding region in layout units (PDF points, origin top-left, y growing
//! downwards). This module only *models* that shape — producing it is the
//! engine's job, consuming it is [`crate::pipeline::flatten`]'s.
//!
//! A tree is owned by exactly one worker for the duration of flattening and
//! dropped afterwards; nothing in the pipeline shares or mutates it across
//! documents.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding region `[x0, y0, x1, y1]` in layout units.
///
/// Serialises as a bare 4-element array, matching the engine's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox(pub [f64; 4]);

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        BBox([x0, y0, x1, y1])
    }

    pub fn x0(&self) -> f64 {
        self.0[0]
    }

    pub fn y0(&self) -> f64 {
        self.0[1]
    }

    pub fn x1(&self) -> f64 {
        self.0[2]
    }

    pub fn y1(&self) -> f64 {
        self.0[3]
    }

    /// Geometric centre, used for caption-to-block distance.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x0() + self.x1()) / 2.0,
            (self.y0() + self.y1()) / 2.0,
        )
    }

    /// A region is well-formed when all coordinates are finite and the
    /// corners are not inverted.
    pub fn is_well_formed(&self) -> bool {
        self.0.iter().all(|c| c.is_finite()) && self.x0() <= self.x1() && self.y0() <= self.y1()
    }
}

/// The kind of a content block, as classified by the layout engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading,
    Table,
    Figure,
    Formula,
    Caption,
}

impl BlockKind {
    /// Blocks that carry a cropped-image artifact instead of (or besides) text.
    pub fn is_visual(&self) -> bool {
        matches!(self, BlockKind::Table | BlockKind::Figure)
    }
}

/// One block on one page of the layout tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBlock {
    pub kind: BlockKind,
    pub bbox: BBox,
    /// Textual payload (paragraphs, headings, captions, formulas, table text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Cropped-image path for figure/table blocks, relative to the document
    /// output folder (e.g. `images/p2_fig0.png`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LayoutBlock {
    /// Convenience constructor for text-bearing blocks.
    pub fn text(kind: BlockKind, bbox: BBox, text: impl Into<String>) -> Self {
        LayoutBlock {
            kind,
            bbox,
            text: Some(text.into()),
            image: None,
        }
    }

    /// Convenience constructor for figure/table blocks.
    pub fn image(kind: BlockKind, bbox: BBox, path: impl Into<String>) -> Self {
        LayoutBlock {
            kind,
            bbox,
            text: None,
            image: Some(path.into()),
        }
    }
}

/// One page of the layout tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPage {
    /// 0-based page index in the source document.
    pub index: usize,
    pub blocks: Vec<LayoutBlock>,
}

/// The full hierarchical tree for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutTree {
    pub pages: Vec<LayoutPage>,
}

impl LayoutTree {
    /// Total block count across all pages.
    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|p| p.blocks.len()).sum()
    }
}
