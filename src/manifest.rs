use crate::error::Result;
use crate::layout::OutputLayout;
use crate::records::Split;
use log::{error, info};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// One manifest line: image tile, then mask tile and coverage for labeled tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub image: PathBuf,
    pub mask: Option<(PathBuf, u32)>,
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image.display())?;
        if let Some((mask, percent)) = &self.mask {
            write!(f, " {} {}", mask.display(), percent)?;
        }
        Ok(())
    }
}

/// The three per-split manifest files of a run.
pub struct ManifestSet {
    writers: BTreeMap<Split, BufWriter<File>>,
}

impl ManifestSet {
    /// Truncate (or create) the train, validation and test manifests.
    pub fn create(layout: &OutputLayout, experiment: &str) -> Result<Self> {
        fs::create_dir_all(layout.samples_dir())?;
        let mut writers = BTreeMap::new();

        for split in Split::ALL {
            let path = layout.manifest_path(experiment, split);
            if path.is_file() {
                error!("Dataset list exists and will be overwritten: {}", path.display());
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            writers.insert(split, BufWriter::new(file));
        }
        Ok(Self { writers })
    }

    pub fn append(&mut self, split: Split, entry: &ManifestEntry) -> Result<()> {
        if let Some(writer) = self.writers.get_mut(&split) {
            writeln!(writer, "{}", entry)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Kept and total tile counts per split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    kept: BTreeMap<Split, usize>,
    total: BTreeMap<Split, usize>,
}

impl Counters {
    pub fn add_kept(&mut self, split: Split) {
        *self.kept.entry(split).or_default() += 1;
    }

    pub fn add_total(&mut self, split: Split) {
        *self.total.entry(split).or_default() += 1;
    }

    pub fn kept(&self, split: Split) -> usize {
        self.kept.get(&split).copied().unwrap_or(0)
    }

    pub fn total(&self, split: Split) -> usize {
        self.total.get(&split).copied().unwrap_or(0)
    }

    pub fn log_summary(&self, min_annotated_percent: u32) {
        info!(
            "Dataset: trn. Tiles with annotations above {}%: train set {}, validation set {}. Total tiles: {}",
            min_annotated_percent,
            self.kept(Split::Train),
            self.kept(Split::Validation),
            self.total(Split::Train)
        );
        info!(
            "Dataset: tst. Kept tiles: {}. Total tiles: {}",
            self.kept(Split::Test),
            self.total(Split::Test)
        );
    }
}
