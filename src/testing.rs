//! In-memory stand-ins for the GDAL backend, used by unit tests.

use crate::backend::{
    Bounds, CutSpec, GeoInspector, MaskRasterizer, RasterInfo, TileBounds, TileBoundsSet, Tiler,
};
use crate::error::{PrepError, Result};
use crate::filter::{AttributeValue, LabelFeature};
use crate::grid::TileGrid;
use crate::layout::{IMAGE_SUFFIX, LABEL_SUFFIX};
use crate::records::{SourceRecord, Split};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeBackend {
    rasters: Mutex<HashMap<PathBuf, RasterInfo>>,
    vector_crs: Mutex<HashMap<PathBuf, String>>,
    features: Mutex<HashMap<PathBuf, Vec<LabelFeature>>>,
    invalid: Mutex<HashMap<PathBuf, Vec<u64>>>,
    failing: Mutex<HashSet<PathBuf>>,
    pub burned: Mutex<Vec<PathBuf>>,
    pub raster_cuts: Mutex<Vec<PathBuf>>,
    pub geometry_scans: Mutex<Vec<PathBuf>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(image: PathBuf, label: Option<PathBuf>, split: Split) -> SourceRecord {
        SourceRecord {
            image,
            label,
            attribute_field: None,
            split,
            aoi: None,
        }
    }

    /// Register a raster with one CRS unit per pixel.
    pub fn add_raster(&self, path: PathBuf, width: usize, height: usize, bands: usize, crs: &str) {
        let info = RasterInfo {
            width,
            height,
            band_count: bands,
            crs: Some(crs.to_string()),
            bounds: Bounds::new(0.0, 0.0, width as f64, height as f64),
        };
        self.rasters.lock().unwrap().insert(path, info);
    }

    pub fn set_vector_crs(&self, path: &Path, crs: &str) {
        self.vector_crs
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), crs.to_string());
    }

    pub fn set_features(&self, path: &Path, features: Vec<LabelFeature>) {
        self.features
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), features);
    }

    pub fn set_invalid(&self, path: &Path, fids: Vec<u64>) {
        self.invalid.lock().unwrap().insert(path.to_path_buf(), fids);
    }

    pub fn fail_tiling(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    /// Write an image tile of `bytes` bytes covering `side` x `side` CRS units.
    pub fn write_image_tile(&self, path: &Path, bytes: usize, side: f64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![1u8; bytes]).unwrap();
        let info = RasterInfo {
            width: 256,
            height: 256,
            band_count: 3,
            crs: Some("EPSG:32618".to_string()),
            bounds: Bounds::new(0.0, 0.0, side, side),
        };
        self.rasters.lock().unwrap().insert(path.to_path_buf(), info);
    }

    pub fn write_label_tile(&self, path: &Path, features: Vec<LabelFeature>) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"{}").unwrap();
        self.set_features(path, features);
    }

    pub fn feature(fid: u64, class: i64, area: f64) -> LabelFeature {
        let mut attributes = BTreeMap::new();
        attributes.insert("class".to_string(), AttributeValue::Integer(class));
        LabelFeature {
            fid: Some(fid),
            attributes,
            wkt: "POLYGON ((0 0,1 0,1 1,0 1,0 0))".to_string(),
            area,
        }
    }
}

impl GeoInspector for FakeBackend {
    fn raster_info(&self, path: &Path) -> Result<RasterInfo> {
        self.rasters
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PrepError::MissingInput(path.to_path_buf()))
    }

    fn crs_match(&self, raster: &Path, vector: &Path) -> Result<bool> {
        let raster_crs = self.raster_info(raster)?.crs;
        let vector_crs = self
            .vector_crs
            .lock()
            .unwrap()
            .get(vector)
            .cloned()
            .ok_or_else(|| PrepError::MissingInput(vector.to_path_buf()))?;
        Ok(raster_crs.as_deref() == Some(vector_crs.as_str()))
    }

    fn read_features(&self, path: &Path) -> Result<Vec<LabelFeature>> {
        if !path.exists() {
            return Err(PrepError::MissingInput(path.to_path_buf()));
        }
        Ok(self
            .features
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    fn invalid_features(&self, path: &Path) -> Result<Vec<u64>> {
        self.geometry_scans.lock().unwrap().push(path.to_path_buf());
        Ok(self
            .invalid
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

impl Tiler for FakeBackend {
    fn cut_raster(&self, src: &Path, dest_dir: &Path, cut: &CutSpec) -> Result<TileBoundsSet> {
        let info = self.raster_info(src)?;
        if self.failing.lock().unwrap().contains(src) {
            return Err(PrepError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "corrupted raster",
            )));
        }
        self.raster_cuts.lock().unwrap().push(src.to_path_buf());

        let grid = TileGrid::new(info.width, info.height, &cut.grid);
        let mut tiles = Vec::new();
        for window in grid.iter() {
            let stem = format!("{}_{:05}_{:05}", cut.stem, window.row, window.col);
            let size = window.size as f64;
            let bounds = Bounds::new(
                window.x_off as f64,
                window.y_off as f64,
                window.x_off as f64 + size,
                window.y_off as f64 + size,
            );
            let path = dest_dir.join(format!("{}.{}", stem, IMAGE_SUFFIX));
            self.write_image_tile(&path, 64, size);
            self.rasters.lock().unwrap().get_mut(&path).unwrap().bounds = bounds;
            tiles.push(TileBounds { stem, bounds });
        }

        Ok(TileBoundsSet {
            crs_wkt: info.crs.unwrap_or_default(),
            tiles,
        })
    }

    fn cut_vector(&self, src: &Path, dest_dir: &Path, tiles: &TileBoundsSet) -> Result<usize> {
        let features = self
            .features
            .lock()
            .unwrap()
            .get(src)
            .cloned()
            .unwrap_or_default();
        for tile in &tiles.tiles {
            let path = dest_dir.join(format!("{}.{}", tile.stem, LABEL_SUFFIX));
            self.write_label_tile(&path, features.clone());
        }
        Ok(tiles.tiles.len())
    }
}

impl MaskRasterizer for FakeBackend {
    fn burn(&self, _features: &[LabelFeature], reference: &Path, output: &Path) -> Result<()> {
        if !reference.exists() {
            return Err(PrepError::MissingInput(reference.to_path_buf()));
        }
        fs::write(output, b"mask")?;
        self.burned.lock().unwrap().push(output.to_path_buf());
        Ok(())
    }
}
