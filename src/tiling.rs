use crate::backend::{CutSpec, Tiler};
use crate::error::Result;
use crate::grid::{self, TileGridSpec};
use crate::layout::{clear_tiles, OutputLayout, TileCategory, IMAGE_SUFFIX, LABEL_SUFFIX};
use crate::records::SourceRecord;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything needed to tile one source image (and its label source).
///
/// Jobs are plain values so they can cross a process boundary as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingJob {
    pub image: PathBuf,
    pub image_dir: PathBuf,
    pub grid: TileGridSpec,
    pub bands: Option<Vec<usize>>,
    pub label: Option<PathBuf>,
    pub label_dir: Option<PathBuf>,
    /// Remove previously written tiles before cutting.
    pub clear_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        image_tiles: usize,
        label_tiles: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl TilingJob {
    pub fn for_record(
        record: &SourceRecord,
        layout: &OutputLayout,
        grid: TileGridSpec,
        bands: Option<Vec<usize>>,
        clear_existing: bool,
    ) -> Self {
        let label_dir = record
            .label
            .as_ref()
            .map(|_| layout.tile_dir(record, TileCategory::Label));
        Self {
            image: record.image.clone(),
            image_dir: layout.tile_dir(record, TileCategory::Imagery),
            grid,
            bands,
            label: record.label.clone(),
            label_dir,
            clear_existing,
        }
    }

    fn stem(&self) -> String {
        self.image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tile".to_string())
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("image {}, label {}", self.image.display(), label.display()),
            None => format!("image {}", self.image.display()),
        }
    }

    fn clear_outputs(&self) -> Result<()> {
        let mut removed = clear_tiles(&self.image_dir, IMAGE_SUFFIX)?;
        if let Some(label_dir) = &self.label_dir {
            removed += clear_tiles(label_dir, LABEL_SUFFIX)?;
            // masks burned by an earlier assembly
            removed += clear_tiles(label_dir, IMAGE_SUFFIX)?;
        }
        if removed > 0 {
            warn!("Removed {} stale tiles for {}", removed, self.image.display());
        }
        Ok(())
    }

    pub fn execute(&self, tiler: &dyn Tiler) -> Result<JobOutcome> {
        grid::src_tile_size(self.grid.tile_size, self.grid.resize)?;

        if !self.image.exists() {
            return Ok(JobOutcome::Skipped {
                reason: format!("source image {} not found", self.image.display()),
            });
        }
        if self.clear_existing {
            self.clear_outputs()?;
        }

        let cut = CutSpec {
            grid: self.grid,
            bands: self.bands.clone(),
            stem: self.stem(),
        };
        let tiles = tiler.cut_raster(&self.image, &self.image_dir, &cut)?;

        // label tiles are clipped to the bounds the raster cut produced
        let label_tiles = match (&self.label, &self.label_dir) {
            (Some(label), Some(label_dir)) => tiler.cut_vector(label, label_dir, &tiles)?,
            _ => 0,
        };

        info!(
            "Tiled {}: {} image tiles, {} label tiles",
            self.image.display(),
            tiles.tiles.len(),
            label_tiles
        );
        Ok(JobOutcome::Completed {
            image_tiles: tiles.tiles.len(),
            label_tiles,
        })
    }

    /// Execute and turn any error into a `Failed` outcome.
    pub fn run(&self, tiler: &dyn Tiler) -> JobOutcome {
        match self.execute(tiler) {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{} ({})", e, self.describe());
                error!("An error occurred while tiling: {}", reason);
                JobOutcome::Failed { reason }
            }
        }
    }
}
