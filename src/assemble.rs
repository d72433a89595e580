//! Turns tiled outputs into per-split dataset manifests.
//!
//! Image and label tiles of a record are paired by sorted file name. Train
//! tiles are kept when their annotation coverage reaches the configured
//! minimum, then a seeded draw sends a share of them to validation.

use crate::backend::{GeoInspector, MaskRasterizer};
use crate::config::PrepConfig;
use crate::error::{PrepError, Result};
use crate::filter::{filter_features, total_area, AttributeValue};
use crate::layout::{list_tiles, split_dir_of_tile, OutputLayout, TileCategory, IMAGE_SUFFIX, LABEL_SUFFIX};
use crate::manifest::{Counters, ManifestEntry, ManifestSet};
use crate::records::{SourceRecord, Split};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

/// Source of the draws deciding train to validation reassignment.
pub trait SplitDraw {
    /// Uniform integer in `1..=99`.
    fn draw(&mut self) -> u32;
}

pub struct SeededDraws {
    rng: StdRng,
}

impl SeededDraws {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SplitDraw for SeededDraws {
    fn draw(&mut self) -> u32 {
        self.rng.gen_range(1..100)
    }
}

#[derive(Debug, Clone)]
pub struct AssemblySettings {
    pub min_annotated_percent: u32,
    /// Image tiles smaller than this many bytes are ignored.
    pub min_raster_tile_size: u64,
    pub val_percent: u32,
    pub target_ids: Option<Vec<AttributeValue>>,
    pub debug: bool,
}

impl AssemblySettings {
    pub fn from_config(config: &PrepConfig) -> Self {
        Self {
            min_annotated_percent: config.min_annotated_percent,
            min_raster_tile_size: config.min_raster_tile_size,
            val_percent: config.val_percent,
            target_ids: config.target_ids.clone(),
            debug: config.debug,
        }
    }
}

/// Share of `tile_area` covered by `annotated_area`, in percent.
pub fn annotation_percent(annotated_area: f64, tile_area: f64) -> f64 {
    if tile_area <= 0.0 {
        return 0.0;
    }
    annotated_area / tile_area * 100.0
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

pub struct DatasetAssembler<'a, D: SplitDraw> {
    inspector: &'a dyn GeoInspector,
    rasterizer: &'a dyn MaskRasterizer,
    layout: &'a OutputLayout,
    settings: AssemblySettings,
    manifests: ManifestSet,
    draws: D,
    counters: Counters,
}

impl<'a, D: SplitDraw> DatasetAssembler<'a, D> {
    /// Truncates the run's manifests.
    pub fn new(
        inspector: &'a dyn GeoInspector,
        rasterizer: &'a dyn MaskRasterizer,
        layout: &'a OutputLayout,
        experiment: &str,
        settings: AssemblySettings,
        draws: D,
    ) -> Result<Self> {
        let manifests = ManifestSet::create(layout, experiment)?;
        Ok(Self {
            inspector,
            rasterizer,
            layout,
            settings,
            manifests,
            draws,
            counters: Counters::default(),
        })
    }

    /// Assemble every record. Record-level I/O errors are logged and the
    /// record is left out; fatal errors abort.
    pub fn assemble_all(&mut self, records: &[SourceRecord]) -> Result<()> {
        let progress = ProgressBar::new(records.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] Assembling: {wide_bar} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        for record in records {
            match self.assemble_record(record) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    error!("Failed to assemble {}: {}", record.image.display(), e);
                }
                Err(e) => {
                    progress.abandon();
                    return Err(e);
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();
        Ok(())
    }

    pub fn assemble_record(&mut self, record: &SourceRecord) -> Result<()> {
        let images = list_tiles(&self.layout.tile_dir(record, TileCategory::Imagery), IMAGE_SUFFIX)?;
        let labels = if record.has_label() {
            list_tiles(&self.layout.tile_dir(record, TileCategory::Label), LABEL_SUFFIX)?
        } else {
            Vec::new()
        };
        debug!(
            "{}: {} image tiles, {} label tiles",
            record.image.display(),
            images.len(),
            labels.len()
        );

        if images.is_empty() && labels.is_empty() {
            warn!("No tiles found for {}", record.image.display());
            return Ok(());
        }
        if self.settings.debug {
            self.check_tiles(&images, &labels);
        }

        if labels.is_empty() {
            info!(
                "No label tiles for {}. Only imagery will be used",
                record.image.display()
            );
            for image in &images {
                self.add_imagery_only(record, image)?;
            }
            return Ok(());
        }

        if images.len() != labels.len() {
            return Err(PrepError::TileCountMismatch {
                record: record.image.clone(),
                images: images.len(),
                labels: labels.len(),
            });
        }

        for (image, label) in images.iter().zip(&labels) {
            if image.file_stem() != label.file_stem() {
                warn!(
                    "Paired tiles have different names: {} and {}",
                    image.display(),
                    label.display()
                );
            }
            self.add_pair(record, image, label)?;
        }
        Ok(())
    }

    fn large_enough(&self, image: &Path) -> Result<bool> {
        if self.settings.min_raster_tile_size == 0 {
            return Ok(true);
        }
        let size = fs::metadata(image)?.len();
        if size < self.settings.min_raster_tile_size {
            debug!("Ignoring {} ({} bytes)", image.display(), size);
            return Ok(false);
        }
        Ok(true)
    }

    fn add_imagery_only(&mut self, record: &SourceRecord, image: &Path) -> Result<()> {
        if !self.large_enough(image)? {
            return Ok(());
        }
        let entry = ManifestEntry {
            image: absolute(image)?,
            mask: None,
        };
        self.manifests.append(record.split, &entry)?;
        self.counters.add_total(record.split);
        self.counters.add_kept(record.split);
        Ok(())
    }

    fn add_pair(&mut self, record: &SourceRecord, image: &Path, label: &Path) -> Result<()> {
        if !self.large_enough(image)? {
            return Ok(());
        }
        let dir_name = split_dir_of_tile(image).unwrap_or_default();
        let Some(split) = Split::from_dir_name(&dir_name) else {
            error!(
                "Dataset value must be \"trn\", \"val\" or \"tst\". Got {:?} for {}",
                dir_name,
                image.display()
            );
            return Ok(());
        };

        let tile = self.inspector.raster_info(image)?;
        let features = self.inspector.read_features(label)?;
        let filtered = filter_features(
            &features,
            record.attribute_field.as_deref(),
            self.settings.target_ids.as_deref(),
        );
        let percent = annotation_percent(total_area(&filtered), tile.bounds.area());
        let min_percent = self.settings.min_annotated_percent as f64;

        let dest = match split {
            Split::Train => {
                self.counters.add_total(Split::Train);
                if percent < min_percent {
                    debug!("{}: {:.1}% annotated, below minimum", image.display(), percent);
                    return Ok(());
                }
                if self.draws.draw() < self.settings.val_percent {
                    Split::Validation
                } else {
                    Split::Train
                }
            }
            // already reassigned on disk
            Split::Validation => {
                self.counters.add_total(Split::Validation);
                if percent < min_percent {
                    return Ok(());
                }
                Split::Validation
            }
            Split::Test => {
                self.counters.add_total(Split::Test);
                Split::Test
            }
        };

        let mask = label.with_extension(IMAGE_SUFFIX);
        self.rasterizer.burn(&filtered, image, &mask)?;

        let entry = ManifestEntry {
            image: absolute(image)?,
            mask: Some((absolute(&mask)?, percent as u32)),
        };
        self.manifests.append(dest, &entry)?;
        self.counters.add_kept(dest);
        Ok(())
    }

    fn check_tiles(&self, images: &[PathBuf], labels: &[PathBuf]) {
        for image in images {
            if let Err(e) = self.inspector.raster_info(image) {
                error!("Unreadable image tile {}: {}", image.display(), e);
            }
        }
        for label in labels {
            if let Err(e) = self.inspector.read_features(label) {
                error!("Unreadable label tile {}: {}", label.display(), e);
            }
        }
    }

    /// Flush the manifests and log the per-split summary.
    pub fn finish(self) -> Result<Counters> {
        self.manifests.finish()?;
        self.counters.log_summary(self.settings.min_annotated_percent);
        Ok(self.counters)
    }
}
