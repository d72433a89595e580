use crate::backend::RasterInfo;
use crate::error::Result;
use crate::grid::TileGridSpec;
use crate::layout::{count_tiles, OutputLayout, TileCategory, IMAGE_SUFFIX, LABEL_SUFFIX};
use crate::records::SourceRecord;
use log::{debug, error, info, warn};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCount {
    pub actual: usize,
    pub expected: usize,
}

/// Compare the tiles already in `dir` with what the grid yields for `info`.
pub fn check(info: &RasterInfo, dir: &Path, grid: &TileGridSpec, suffix: &str) -> Result<TileCount> {
    let expected = grid.expected_tiles(info.width, info.height);
    let actual = count_tiles(dir, suffix)?;
    debug!(
        "{}: {} tiles with suffix \"{}\", {} expected",
        dir.display(),
        actual,
        suffix,
        expected
    );
    Ok(TileCount { actual, expected })
}

/// What to do with a source image given the tiles already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingDecision {
    /// Every expected tile exists.
    Complete,
    /// More tiles than the grid yields; left untouched.
    Excess,
    /// Some tiles exist; tile again from scratch.
    Partial,
    /// Nothing on disk yet.
    Fresh,
}

impl TilingDecision {
    /// `labels` is `None` when the record has no label source.
    pub fn decide(images: usize, labels: Option<usize>, expected: usize) -> Self {
        match labels {
            None => {
                if images == expected {
                    TilingDecision::Complete
                } else if images > expected {
                    TilingDecision::Excess
                } else if images > 0 {
                    TilingDecision::Partial
                } else {
                    TilingDecision::Fresh
                }
            }
            Some(labels) => {
                if images == expected && labels == expected {
                    TilingDecision::Complete
                } else if images > expected && labels > expected {
                    TilingDecision::Excess
                } else if images > 0 || labels > 0 {
                    TilingDecision::Partial
                } else {
                    TilingDecision::Fresh
                }
            }
        }
    }

    pub fn needs_tiling(self) -> bool {
        matches!(self, TilingDecision::Partial | TilingDecision::Fresh)
    }

    /// Stale tiles must be removed before tiling again.
    pub fn clears_existing(self) -> bool {
        self == TilingDecision::Partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub decision: TilingDecision,
    pub images: TileCount,
    pub labels: Option<usize>,
}

/// Run the checker for one record's image (and label) directories and log the outcome.
pub fn reconcile_record(
    record: &SourceRecord,
    info: &RasterInfo,
    layout: &OutputLayout,
    grid: &TileGridSpec,
) -> Result<Reconciliation> {
    let images = check(info, &layout.tile_dir(record, TileCategory::Imagery), grid, IMAGE_SUFFIX)?;
    if images.expected == 0 {
        warn!(
            "{} ({}x{}) is too small for tile size {} with stride {}. No tiles will be written",
            record.image.display(),
            info.width,
            info.height,
            grid.src_tile_size(),
            grid.src_stride()
        );
    }
    let labels = match record.label {
        Some(_) => {
            let label_dir = layout.tile_dir(record, TileCategory::Label);
            Some(check(info, &label_dir, grid, LABEL_SUFFIX)?.actual)
        }
        None => None,
    };

    let decision = TilingDecision::decide(images.actual, labels, images.expected);
    let label_text = labels.map_or_else(|| "-".to_string(), |n| n.to_string());
    match decision {
        TilingDecision::Complete => info!(
            "All {} tiles exist for {}. Skipping tiling",
            images.expected,
            record.image.display()
        ),
        TilingDecision::Excess => error!(
            "Too many tiles for {}. Expected: {}, actual image tiles: {}, actual label tiles: {}. Skipping tiling",
            record.image.display(),
            images.expected,
            images.actual,
            label_text
        ),
        TilingDecision::Partial => error!(
            "Missing tiles for {}. Expected: {}, actual image tiles: {}, actual label tiles: {}. Starting tiling from scratch",
            record.image.display(),
            images.expected,
            images.actual,
            label_text
        ),
        TilingDecision::Fresh => debug!(
            "No tiles yet for {} ({} expected). Starting tiling",
            record.image.display(),
            images.expected
        ),
    }

    Ok(Reconciliation {
        decision,
        images,
        labels,
    })
}
