//! Contracts for the raster/vector capabilities the pipeline drives.
//!
//! `crate::io::GdalBackend` implements all of them on top of GDAL.

use crate::error::Result;
use crate::filter::LabelFeature;
use crate::grid::TileGridSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Planar area in CRS units.
    pub fn area(&self) -> f64 {
        self.width().abs() * self.height().abs()
    }
}

/// Raster metadata probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    /// Authority identifier such as `EPSG:32618`, when one can be derived.
    pub crs: Option<String>,
    pub bounds: Bounds,
}

/// Exact georeferenced extent of one written image tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    /// File stem shared by the image tile, its label tile and its mask.
    pub stem: String,
    pub bounds: Bounds,
}

/// Tile extents produced by a raster cut, in the raster's CRS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileBoundsSet {
    pub crs_wkt: String,
    pub tiles: Vec<TileBounds>,
}

/// Parameters of one raster cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    pub grid: TileGridSpec,
    /// 1-based band indexes to keep; all bands when absent.
    pub bands: Option<Vec<usize>>,
    /// Stem prefix for tile file names.
    pub stem: String,
}

/// Read-only raster and vector inspection.
pub trait GeoInspector {
    fn raster_info(&self, path: &Path) -> Result<RasterInfo>;

    /// Whether a raster and a vector source share the same CRS.
    fn crs_match(&self, raster: &Path, vector: &Path) -> Result<bool>;

    fn read_features(&self, path: &Path) -> Result<Vec<LabelFeature>>;

    /// Ids of features with missing or invalid geometry.
    fn invalid_features(&self, path: &Path) -> Result<Vec<u64>>;
}

/// Cuts aligned image and label tiles.
pub trait Tiler {
    /// Writes image tiles into `dest_dir` and returns the bounds that were used.
    fn cut_raster(&self, src: &Path, dest_dir: &Path, cut: &CutSpec) -> Result<TileBoundsSet>;

    /// Writes one label tile per entry of `tiles`, clipped to its bounds.
    fn cut_vector(&self, src: &Path, dest_dir: &Path, tiles: &TileBoundsSet) -> Result<usize>;
}

/// Burns label features into a pixel mask aligned to a reference tile.
pub trait MaskRasterizer {
    fn burn(&self, features: &[LabelFeature], reference: &Path, output: &Path) -> Result<()>;
}
