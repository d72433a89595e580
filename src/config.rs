use crate::error::{PrepError, Result};
use crate::filter::AttributeValue;
use crate::grid::TileGridSpec;
use crate::layout::OutputLayout;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TILE_SIZE: usize = 1024;
pub const DEFAULT_VAL_PERCENT: u32 = 10;
pub const DEFAULT_SEED: u64 = 1234;

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

fn default_task() -> String {
    "segmentation".to_string()
}

/// Parameter file as written by users (`global` and `sample` sections).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamFile {
    pub global: GlobalParams,
    #[serde(default)]
    pub sample: SampleParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalParams {
    pub number_of_bands: usize,
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_tile_size", alias = "samples_size")]
    pub tile_size: usize,
    #[serde(default)]
    pub bands_idxs: Option<Vec<usize>>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_task")]
    pub task: String,
    #[serde(default)]
    pub experiment_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleParams {
    pub prep_csv_file: Option<PathBuf>,
    pub val_percent: u32,
    pub resize: u32,
    pub tile_stride: Option<usize>,
    pub parallelize_tiling: bool,
    pub workers: Option<usize>,
    pub min_annotated_percent: u32,
    pub min_raster_tile_size: u64,
    /// Raw YAML values; each one must be an integer.
    pub target_ids: Option<Vec<serde_yml::Value>>,
    pub seed: u64,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            prep_csv_file: None,
            val_percent: DEFAULT_VAL_PERCENT,
            resize: 1,
            tile_stride: None,
            parallelize_tiling: false,
            workers: None,
            min_annotated_percent: 0,
            min_raster_tile_size: 0,
            target_ids: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl ParamFile {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading parameters: {}", path.display());
        if !path.is_file() {
            return Err(PrepError::MissingInput(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&text)?)
    }

    /// Parameters for a run driven directly by a source manifest.
    pub fn for_csv(csv_file: &Path, number_of_bands: usize) -> Self {
        Self {
            global: GlobalParams {
                number_of_bands,
                data_path: default_data_path(),
                tile_size: DEFAULT_TILE_SIZE,
                bands_idxs: None,
                debug_mode: false,
                task: default_task(),
                experiment_name: None,
            },
            sample: SampleParams {
                prep_csv_file: Some(csv_file.to_path_buf()),
                ..SampleParams::default()
            },
        }
    }
}

/// Validated settings for one dataset preparation run.
#[derive(Debug, Clone)]
pub struct PrepConfig {
    pub csv_file: PathBuf,
    pub experiment_name: String,
    pub data_path: PathBuf,
    pub number_of_bands: usize,
    pub bands_idxs: Option<Vec<usize>>,
    pub grid: TileGridSpec,
    pub val_percent: u32,
    pub min_annotated_percent: u32,
    pub min_raster_tile_size: u64,
    pub parallel: bool,
    pub workers: Option<usize>,
    pub target_ids: Option<Vec<AttributeValue>>,
    pub seed: u64,
    pub debug: bool,
}

fn parse_target_ids(raw: &[serde_yml::Value]) -> Result<Vec<AttributeValue>> {
    raw.iter()
        .map(|value| {
            value
                .as_i64()
                .map(AttributeValue::Integer)
                .ok_or_else(|| PrepError::InvalidTargetId(format!("{:?}", value)))
        })
        .collect()
}

impl PrepConfig {
    pub fn from_params(params: ParamFile) -> Result<Self> {
        let ParamFile { global, sample } = params;

        if global.task != "segmentation" {
            return Err(PrepError::InvalidTask(global.task));
        }
        if let Some(bands) = &global.bands_idxs {
            if bands.len() != global.number_of_bands {
                return Err(PrepError::BandIndexMismatch {
                    got: bands.len(),
                    expected: global.number_of_bands,
                });
            }
        }
        if sample.val_percent > 100 {
            return Err(PrepError::Config(format!(
                "val_percent must be within 0..=100, got {}",
                sample.val_percent
            )));
        }

        let csv_file = sample
            .prep_csv_file
            .ok_or_else(|| PrepError::Config("missing sample.prep_csv_file".to_string()))?;
        let grid = TileGridSpec::new(global.tile_size, sample.tile_stride, sample.resize)?;
        let target_ids = sample.target_ids.as_deref().map(parse_target_ids).transpose()?;

        let experiment_name = global.experiment_name.unwrap_or_else(|| {
            csv_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string())
        });

        let config = Self {
            csv_file,
            experiment_name,
            data_path: global.data_path,
            number_of_bands: global.number_of_bands,
            bands_idxs: global.bands_idxs,
            grid,
            val_percent: sample.val_percent,
            min_annotated_percent: sample.min_annotated_percent,
            min_raster_tile_size: sample.min_raster_tile_size,
            parallel: sample.parallelize_tiling,
            workers: sample.workers,
            target_ids,
            seed: sample.seed,
            debug: global.debug_mode,
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    pub fn samples_folder_name(&self) -> String {
        OutputLayout::samples_folder_name(
            self.grid.tile_size,
            self.min_annotated_percent,
            self.number_of_bands,
        )
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.data_path
            .join(&self.experiment_name)
            .join(self.samples_folder_name())
    }
}
