use crate::records::{SourceRecord, Split};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const IMAGE_SUFFIX: &str = "tif";
pub const LABEL_SUFFIX: &str = "geojson";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCategory {
    Imagery,
    Label,
}

impl TileCategory {
    pub fn dir_name(&self) -> &'static str {
        match self {
            TileCategory::Imagery => "sat_img",
            TileCategory::Label => "map_img",
        }
    }
}

/// `<root>/<experiment>/tiles<size>_min-annot<pct>_<bands>bands`
#[derive(Debug, Clone)]
pub struct OutputLayout {
    samples_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(samples_dir: impl Into<PathBuf>) -> Self {
        Self {
            samples_dir: samples_dir.into(),
        }
    }

    pub fn samples_folder_name(tile_size: usize, min_annot_percent: u32, bands: usize) -> String {
        format!("tiles{}_min-annot{}_{}bands", tile_size, min_annot_percent, bands)
    }

    pub fn samples_dir(&self) -> &Path {
        &self.samples_dir
    }

    pub fn tile_dir(&self, record: &SourceRecord, category: TileCategory) -> PathBuf {
        self.samples_dir
            .join(record.split.as_str())
            .join(record.aoi_name())
            .join(category.dir_name())
    }

    pub fn manifest_path(&self, experiment: &str, split: Split) -> PathBuf {
        self.samples_dir
            .join(format!("{}_{}.txt", experiment, split.as_str()))
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.extension().is_some_and(|ext| ext == suffix)
}

/// Sorted tile files with the given extension; a missing directory is empty.
pub fn list_tiles(dir: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut tiles = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_suffix(&path, suffix) {
            tiles.push(path);
        }
    }
    tiles.sort();
    Ok(tiles)
}

pub fn count_tiles(dir: &Path, suffix: &str) -> io::Result<usize> {
    Ok(list_tiles(dir, suffix)?.len())
}

/// Remove tile files with the given extension, returning how many were deleted.
pub fn clear_tiles(dir: &Path, suffix: &str) -> io::Result<usize> {
    let tiles = list_tiles(dir, suffix)?;
    for tile in &tiles {
        fs::remove_file(tile)?;
    }
    Ok(tiles.len())
}

/// Split folder of a tile laid out as `<split>/<aoi>/<category>/<file>`.
pub fn split_dir_of_tile(tile: &Path) -> Option<String> {
    tile.parent()?
        .parent()?
        .parent()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
