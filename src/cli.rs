use crate::config::ParamFile;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "geotiles-prep")]
#[command(about = "Tile imagery and vector labels into segmentation datasets")]
#[command(version)]
pub struct Args {
    /// Source manifest (image, label, attribute field, split, aoi)
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with = "param",
        required_unless_present_any = ["param", "tile_worker"]
    )]
    pub csv: Option<PathBuf>,

    /// YAML parameter file with `global` and `sample` sections
    #[arg(long, value_name = "FILE")]
    pub param: Option<PathBuf>,

    /// Resize factor applied to tiles
    #[arg(long, value_name = "N")]
    pub resize: Option<u32>,

    /// Band indexes to keep, 1-based (e.g. 1,2,3)
    #[arg(long, value_name = "IDX", value_delimiter = ',')]
    pub bands: Option<Vec<usize>>,

    /// Debug mode: extra checks on label geometries and written tiles
    #[arg(long)]
    pub debug: bool,

    /// Tile source images in parallel worker processes
    #[arg(long)]
    pub parallel: bool,

    /// Number of worker processes (default: all available)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Seed for the train/validation draws
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Run a single tiling job read from stdin
    #[arg(long, hide = true, exclusive = true)]
    pub tile_worker: bool,
}

impl Args {
    /// Apply command-line overrides on top of parameter file values.
    pub fn apply_overrides(&self, params: &mut ParamFile) {
        if let Some(resize) = self.resize {
            params.sample.resize = resize;
        }
        if let Some(bands) = &self.bands {
            params.global.bands_idxs = Some(bands.clone());
        }
        if self.debug {
            params.global.debug_mode = true;
        }
        if self.parallel {
            params.sample.parallelize_tiling = true;
        }
        if let Some(workers) = self.workers {
            params.sample.workers = Some(workers);
        }
        if let Some(seed) = self.seed {
            params.sample.seed = seed;
        }
    }
}
