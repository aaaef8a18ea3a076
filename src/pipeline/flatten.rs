//! Flattening: collapse the hierarchical layout tree into one reading-order
//! sequence of typed blocks.
//!
//! Pure and deterministic: no I/O, no clock, no randomness. The same tree
//! always yields the same `FlatRecord` down to the byte, which is what lets
//! the merge stage promise byte-identical idempotence later.
//!
//! ## Reading order
//!
//! Page-major first. Within a page, blocks sort by the top edge (`y0`) and
//! fall back to the left edge (`x0`) — layout engines emit blocks in
//! detection order, which is not reading order. `f64::total_cmp` keeps the
//! sort a total order, so two runs can never disagree on ties.
//!
//! ## Caption folding
//!
//! A caption block is folded into the nearest *preceding* figure or table on
//! the same page when the two boxes overlap horizontally (same column) and
//! the vertical gap is within the configured threshold. "Table …" captions
//! only bind to tables and "Fig …" captions only to figures; anything that
//! finds no target stays a standalone block. The threshold is a tunable
//! because no single constant survives contact with two-column layouts.

use crate::error::StageError;
use crate::layout::{BBox, BlockKind, LayoutBlock, LayoutPage, LayoutTree};
use crate::output::{ContentBlock, FlatRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;

static FIG_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*fig(ure)?\b").unwrap());
static TABLE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*table\b").unwrap());

/// Flatten `tree` into an ordered, contiguously indexed `FlatRecord`.
///
/// # Errors
/// [`StageError::Schema`] when the tree violates the extractor contract
/// (duplicate page indices, malformed boxes, payload/kind mismatches).
/// Validation runs up front, so a returned error means nothing was
/// flattened — there is no partial output to clean up.
pub fn flatten(tree: &LayoutTree, caption_gap: f64) -> Result<FlatRecord, StageError> {
    validate(tree)?;

    let mut pages: Vec<&LayoutPage> = tree.pages.iter().collect();
    pages.sort_by_key(|p| p.index);

    let mut blocks: Vec<ContentBlock> = Vec::with_capacity(tree.block_count());
    for page in pages {
        let mut ordered: Vec<&LayoutBlock> = page.blocks.iter().collect();
        ordered.sort_by(|a, b| reading_order(&a.bbox, &b.bbox));

        let mut page_out: Vec<ContentBlock> = Vec::with_capacity(ordered.len());
        for block in ordered {
            if block.kind == BlockKind::Caption {
                if let Some(target) = caption_target(&page_out, block, caption_gap) {
                    let text = block.text.clone().unwrap_or_default();
                    let slot = &mut page_out[target].caption;
                    match slot {
                        Some(existing) => {
                            existing.push(' ');
                            existing.push_str(&text);
                        }
                        None => *slot = Some(text),
                    }
                    continue;
                }
            }
            page_out.push(ContentBlock {
                index: 0, // reassigned below, once global order is final
                page: page.index,
                kind: block.kind,
                bbox: block.bbox,
                text: block.text.clone(),
                image: block.image.clone(),
                caption: None,
            });
        }
        blocks.extend(page_out);
    }

    for (i, block) in blocks.iter_mut().enumerate() {
        block.index = i;
    }

    Ok(FlatRecord { blocks })
}

/// Top edge first, left edge as tie-break.
fn reading_order(a: &BBox, b: &BBox) -> Ordering {
    a.y0()
        .total_cmp(&b.y0())
        .then_with(|| a.x0().total_cmp(&b.x0()))
}

/// Find the block this caption belongs to, among the blocks already emitted
/// for the current page.
///
/// Candidates are preceding figure/table blocks that overlap the caption
/// horizontally; the one with the smallest vertical gap wins, provided the
/// gap stays within `caption_gap`. Blocks that already swallowed a caption
/// remain candidates: split captions ("Fig. 3." / "(continued)") are a real
/// engine behaviour and both halves belong to the same figure.
fn caption_target(
    page_out: &[ContentBlock],
    caption: &LayoutBlock,
    caption_gap: f64,
) -> Option<usize> {
    let text = caption.text.as_deref().unwrap_or("");
    let wants_table = TABLE_LABEL.is_match(text);
    let wants_figure = FIG_LABEL.is_match(text);

    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in page_out.iter().enumerate() {
        if !candidate.kind.is_visual() {
            continue;
        }
        if wants_table && candidate.kind != BlockKind::Table {
            continue;
        }
        if wants_figure && candidate.kind != BlockKind::Figure {
            continue;
        }
        if !horizontal_overlap(&candidate.bbox, &caption.bbox) {
            continue;
        }

        // Caption sits below a preceding block; touching or overlapping
        // boxes count as gap zero.
        let gap = (caption.bbox.y0() - candidate.bbox.y1()).max(0.0);
        if gap > caption_gap {
            continue;
        }
        if best.map(|(_, g)| gap < g).unwrap_or(true) {
            best = Some((i, gap));
        }
    }
    best.map(|(i, _)| i)
}

fn horizontal_overlap(a: &BBox, b: &BBox) -> bool {
    a.x0() <= b.x1() && b.x0() <= a.x1()
}

/// Reject trees that violate the extractor contract before touching them.
fn validate(tree: &LayoutTree) -> Result<(), StageError> {
    let mut seen_pages = HashSet::new();
    for page in &tree.pages {
        if !seen_pages.insert(page.index) {
            return Err(StageError::schema(format!(
                "duplicate page index {}",
                page.index
            )));
        }
        for block in &page.blocks {
            if !block.bbox.is_well_formed() {
                return Err(StageError::schema(format!(
                    "malformed bbox {:?} on page {}",
                    block.bbox, page.index
                )));
            }
            if block.kind.is_visual() && block.image.is_none() {
                return Err(StageError::schema(format!(
                    "{:?} block on page {} has no cropped-image reference",
                    block.kind, page.index
                )));
            }
            if !block.kind.is_visual() && block.text.is_none() {
                return Err(StageError::schema(format!(
                    "{:?} block on page {} has no text payload",
                    block.kind, page.index
                )));
            }
        }
    }
    Ok(())
}
