use crate::error::{PrepError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Dataset split. Sources are declared `trn` or `tst`; `val` only appears
/// after train tiles are reassigned during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Split {
    #[serde(rename = "trn")]
    Train,
    #[serde(rename = "val")]
    Validation,
    #[serde(rename = "tst")]
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "trn",
            Split::Validation => "val",
            Split::Test => "tst",
        }
    }

    /// Strict parse used for source manifests: only `trn` and `tst`.
    pub fn parse_declared(value: &str) -> Result<Self> {
        match value.trim() {
            "trn" => Ok(Split::Train),
            "tst" => Ok(Split::Test),
            other => Err(PrepError::InvalidSplit(other.to_string())),
        }
    }

    /// Lenient parse used for split folder names found on disk.
    pub fn from_dir_name(value: &str) -> Option<Self> {
        match value {
            "trn" | "train" => Some(Split::Train),
            "val" => Some(Split::Validation),
            "tst" | "test" => Some(Split::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the source manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub image: PathBuf,
    pub label: Option<PathBuf>,
    pub attribute_field: Option<String>,
    pub split: Split,
    pub aoi: Option<String>,
}

impl SourceRecord {
    /// Area-of-interest name, falling back to the image file stem.
    pub fn aoi_name(&self) -> String {
        match &self.aoi {
            Some(aoi) => aoi.trim().to_string(),
            None => self
                .image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    pub fn has_label(&self) -> bool {
        self.label.is_some()
    }
}

fn optional_cell(record: &csv::StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
}

/// Read a header-less source manifest with columns
/// `image, label, attribute_field, split, aoi`.
pub fn read_csv(path: &Path) -> Result<Vec<SourceRecord>> {
    info!("Reading source manifest: {}", path.display());
    if !path.is_file() {
        return Err(PrepError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(image) = optional_cell(&row, 0) else {
            debug!("Skipping empty manifest row {:?}", row.position());
            continue;
        };
        let split = optional_cell(&row, 3).unwrap_or_default();
        records.push(SourceRecord {
            image: PathBuf::from(image),
            label: optional_cell(&row, 1).map(PathBuf::from),
            attribute_field: optional_cell(&row, 2),
            split: Split::parse_declared(&split)?,
            aoi: optional_cell(&row, 4),
        });
    }

    if records.is_empty() {
        return Err(PrepError::EmptyManifest(path.to_path_buf()));
    }
    info!("Read {} source records", records.len());
    Ok(records)
}
