use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Parameter file error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("List of band indexes ({got}) should be of same length as number_of_bands ({expected})")]
    BandIndexMismatch { got: usize, expected: usize },

    #[error("Band index {index} out of range for {path:?} ({count} bands)")]
    BandIndexOutOfRange {
        path: PathBuf,
        index: usize,
        count: usize,
    },

    #[error("Destination tile size {tile_size} must be divisible by resize factor {resize}")]
    InvalidResize { tile_size: usize, resize: u32 },

    #[error("Invalid tile grid: size={0}, stride={1} (both must be positive)")]
    InvalidGrid(usize, usize),

    #[error("Dataset value must be \"trn\" or \"tst\". Got: {0:?}")]
    InvalidSplit(String),

    #[error("Target id {0:?} in target_ids is not an integer")]
    InvalidTargetId(String),

    #[error("Got task {0:?}. Expected \"segmentation\"")]
    InvalidTask(String),

    #[error("Imagery {path:?} contains {count} bands. Expected {expected} or more bands in source imagery")]
    BandCount {
        path: PathBuf,
        count: usize,
        expected: usize,
    },

    #[error("Missing band indexes to keep. Imagery {path:?} contains {count} bands, {expected} should be kept")]
    MissingBandIndexes {
        path: PathBuf,
        count: usize,
        expected: usize,
    },

    #[error("Not all imagery has identical number of bands: {0:?}")]
    InconsistentBandCounts(Vec<usize>),

    #[error("Records {first:?} and {second:?} would write tiles to the same directory {dir:?}")]
    SharedOutput {
        first: PathBuf,
        second: PathBuf,
        dir: PathBuf,
    },

    #[error("Number of imagery tiles ({images}) and label tiles ({labels}) don't match for {record:?}")]
    TileCountMismatch {
        record: PathBuf,
        images: usize,
        labels: usize,
    },

    #[error("Field {0:?} not found in label features")]
    MissingField(String),

    #[error("Input file not found: {0:?}")]
    MissingInput(PathBuf),

    #[error("Source manifest {0:?} contains no records")]
    EmptyManifest(PathBuf),

    #[error("Tiling worker error: {0}")]
    Worker(String),
}

impl PrepError {
    /// Fatal errors abort the run; the rest only skip the record that raised them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PrepError::Gdal(_)
                | PrepError::Io(_)
                | PrepError::ShapeError(_)
                | PrepError::InvalidDimensions(..)
                | PrepError::MissingField(_)
                | PrepError::MissingInput(_)
                | PrepError::Worker(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
