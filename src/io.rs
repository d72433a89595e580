use crate::backend::{
    Bounds, CutSpec, GeoInspector, MaskRasterizer, RasterInfo, TileBounds, TileBoundsSet, Tiler,
};
use crate::crs;
use crate::error::{PrepError, Result};
use crate::filter::{AttributeValue, LabelFeature};
use crate::grid::{TileGrid, TileWindow};
use crate::layout::{IMAGE_SUFFIX, LABEL_SUFFIX};
use gdal::raster::{Buffer, GdalDataType, GdalType, ResampleAlg};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Feature, FieldValue, Geometry, LayerAccess, LayerOptions, OGRwkbGeometryType};
use gdal::{Dataset, DriverManager};
use log::{debug, info, warn};
use ndarray::{s, Array2};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Pixel value burned for every label footprint.
pub const FOOTPRINT_BURN_VALUE: f64 = 255.0;

/// GDAL/OGR implementation of the raster and vector capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalBackend;

fn open_dataset(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        return Err(PrepError::MissingInput(path.to_path_buf()));
    }
    Ok(Dataset::open(path)?)
}

fn bounds_from_geotransform(gt: &[f64; 6], x_off: f64, y_off: f64, width: f64, height: f64) -> Bounds {
    let x0 = gt[0] + x_off * gt[1];
    let y0 = gt[3] + y_off * gt[5];
    Bounds::new(x0, y0, x0 + width * gt[1], y0 + height * gt[5])
}

fn attribute_value(value: FieldValue) -> Option<AttributeValue> {
    match value {
        FieldValue::IntegerValue(v) => Some(AttributeValue::Integer(v as i64)),
        FieldValue::Integer64Value(v) => Some(AttributeValue::Integer(v)),
        FieldValue::StringValue(v) => Some(AttributeValue::Text(v)),
        FieldValue::RealValue(v) => Some(AttributeValue::Text(v.to_string())),
        _ => None,
    }
}

fn label_feature(feature: &Feature) -> Result<Option<LabelFeature>> {
    let Some(geometry) = feature.geometry() else {
        return Ok(None);
    };

    let attributes: BTreeMap<String, AttributeValue> = feature
        .fields()
        .filter_map(|(name, value)| value.and_then(attribute_value).map(|v| (name, v)))
        .collect();

    Ok(Some(LabelFeature {
        fid: feature.fid(),
        attributes,
        wkt: geometry.wkt()?,
        area: geometry.area(),
    }))
}

/// Shared state for writing the image tiles of one source raster.
struct TileWriter<'a> {
    source: &'a Dataset,
    geo_transform: [f64; 6],
    projection: String,
    bands: &'a [usize],
    dest_size: usize,
}

impl TileWriter<'_> {
    fn write<T: GdalType + Copy + Default>(&self, window: &TileWindow, path: &Path) -> Result<()> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let dest = self.dest_size;
        let mut tile = driver.create_with_band_type::<T, _>(path, dest, dest, self.bands.len())?;

        let gt = &self.geo_transform;
        let scale = window.size as f64 / dest as f64;
        tile.set_geo_transform(&[
            gt[0] + window.x_off as f64 * gt[1],
            gt[1] * scale,
            0.0,
            gt[3] + window.y_off as f64 * gt[5],
            0.0,
            gt[5] * scale,
        ])?;
        tile.set_projection(&self.projection)?;

        // Destination pixels covered by the part of the window inside the raster
        let out_width = window.read_width * dest / window.size;
        let out_height = window.read_height * dest / window.size;
        let resample = (dest != window.size).then_some(ResampleAlg::Bilinear);

        for (i, &band_index) in self.bands.iter().enumerate() {
            let source_band = self.source.rasterband(band_index)?;
            let mut padded = Array2::<T>::from_elem((dest, dest), T::default());

            if out_width > 0 && out_height > 0 {
                let buffer = source_band.read_as::<T>(
                    (window.x_off as isize, window.y_off as isize),
                    (window.read_width, window.read_height),
                    (out_width, out_height),
                    resample,
                )?;
                let data: Vec<T> = buffer.into_iter().collect();
                let read = Array2::from_shape_vec((out_height, out_width), data)?;
                padded.slice_mut(s![..out_height, ..out_width]).assign(&read);
            }

            let mut tile_band = tile.rasterband(i + 1)?;
            if let Some(nodata) = source_band.no_data_value() {
                tile_band.set_no_data_value(Some(nodata))?;
            }
            let mut buffer = Buffer::new((dest, dest), padded.iter().copied().collect());
            tile_band.write((0, 0), (dest, dest), &mut buffer)?;
        }

        debug!(
            "Wrote tile {} (window {}x{} at {},{})",
            path.display(),
            window.read_width,
            window.read_height,
            window.x_off,
            window.y_off
        );
        Ok(())
    }
}

impl GeoInspector for GdalBackend {
    fn raster_info(&self, path: &Path) -> Result<RasterInfo> {
        let dataset = open_dataset(path)?;
        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 {
            return Err(PrepError::InvalidDimensions(width, height));
        }

        let gt = dataset.geo_transform()?;
        let crs = dataset
            .spatial_ref()
            .ok()
            .and_then(|srs| crs::crs_identifier(&srs));

        Ok(RasterInfo {
            width,
            height,
            band_count: dataset.raster_count() as usize,
            crs,
            bounds: bounds_from_geotransform(&gt, 0.0, 0.0, width as f64, height as f64),
        })
    }

    fn crs_match(&self, raster: &Path, vector: &Path) -> Result<bool> {
        let raster_ds = open_dataset(raster)?;
        let raster_srs = raster_ds.spatial_ref()?;

        let vector_ds = open_dataset(vector)?;
        let layer = vector_ds.layer(0)?;
        let Some(vector_srs) = layer.spatial_ref() else {
            warn!("No CRS found in {}", vector.display());
            return Ok(false);
        };

        Ok(crs::same_crs(&raster_srs, &vector_srs))
    }

    fn read_features(&self, path: &Path) -> Result<Vec<LabelFeature>> {
        let dataset = open_dataset(path)?;
        let mut features = Vec::new();

        for layer_idx in 0..dataset.layer_count() {
            let mut layer = dataset.layer(layer_idx)?;
            for feature in layer.features() {
                match label_feature(&feature)? {
                    Some(label) => features.push(label),
                    None => debug!("Feature {:?} in {} has no geometry", feature.fid(), path.display()),
                }
            }
        }
        Ok(features)
    }

    fn invalid_features(&self, path: &Path) -> Result<Vec<u64>> {
        let dataset = open_dataset(path)?;
        let mut invalid = Vec::new();

        for layer_idx in 0..dataset.layer_count() {
            let mut layer = dataset.layer(layer_idx)?;
            for (idx, feature) in layer.features().enumerate() {
                let valid = feature
                    .geometry()
                    .is_some_and(|geometry| !geometry.is_empty() && geometry.is_valid());
                if !valid {
                    invalid.push(feature.fid().unwrap_or(idx as u64));
                }
            }
        }
        Ok(invalid)
    }
}

impl Tiler for GdalBackend {
    fn cut_raster(&self, src: &Path, dest_dir: &Path, cut: &CutSpec) -> Result<TileBoundsSet> {
        info!("Tiling imagery: {}", src.display());
        let dataset = open_dataset(src)?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        let geo_transform = dataset.geo_transform()?;

        if geo_transform[2] != 0.0 || geo_transform[4] != 0.0 {
            warn!("Rotated geotransform in {} is ignored for tile bounds", src.display());
        }

        let bands: Vec<usize> = match &cut.bands {
            Some(bands) => bands.clone(),
            None => (1..=band_count).collect(),
        };
        if let Some(&index) = bands.iter().find(|&&b| b == 0 || b > band_count) {
            return Err(PrepError::BandIndexOutOfRange {
                path: src.to_path_buf(),
                index,
                count: band_count,
            });
        }
        let Some(&first_band) = bands.first() else {
            return Err(PrepError::Config("no bands selected for tiling".to_string()));
        };
        let band_type = dataset.rasterband(first_band)?.band_type();

        fs::create_dir_all(dest_dir)?;
        let writer = TileWriter {
            source: &dataset,
            geo_transform,
            projection: dataset.projection(),
            bands: &bands,
            dest_size: cut.grid.tile_size,
        };

        let grid = TileGrid::new(width, height, &cut.grid);
        let mut tiles = Vec::with_capacity(grid.total_tiles);
        for window in grid.iter() {
            let stem = format!("{}_{:05}_{:05}", cut.stem, window.row, window.col);
            let path = dest_dir.join(format!("{}.{}", stem, IMAGE_SUFFIX));

            match band_type {
                GdalDataType::UInt8 => writer.write::<u8>(&window, &path)?,
                GdalDataType::UInt16 => writer.write::<u16>(&window, &path)?,
                GdalDataType::Int16 => writer.write::<i16>(&window, &path)?,
                GdalDataType::UInt32 => writer.write::<u32>(&window, &path)?,
                GdalDataType::Int32 => writer.write::<i32>(&window, &path)?,
                GdalDataType::Float32 => writer.write::<f32>(&window, &path)?,
                _ => writer.write::<f64>(&window, &path)?,
            }

            let size = window.size as f64;
            tiles.push(TileBounds {
                stem,
                bounds: bounds_from_geotransform(
                    &geo_transform,
                    window.x_off as f64,
                    window.y_off as f64,
                    size,
                    size,
                ),
            });
        }

        info!("Wrote {} image tiles to {}", tiles.len(), dest_dir.display());
        Ok(TileBoundsSet {
            crs_wkt: dataset.projection(),
            tiles,
        })
    }

    fn cut_vector(&self, src: &Path, dest_dir: &Path, tiles: &TileBoundsSet) -> Result<usize> {
        info!("Tiling labels: {}", src.display());
        let source = open_dataset(src)?;
        let mut layer = source.layer(0)?;

        let field_defs: Vec<(String, u32)> = layer
            .defn()
            .fields()
            .map(|field| (field.name(), field.field_type()))
            .collect();
        let field_defs: Vec<(&str, u32)> = field_defs.iter().map(|(n, t)| (n.as_str(), *t)).collect();

        // label tiles take the CRS of the image tiles they align with
        let srs = if tiles.crs_wkt.is_empty() {
            layer.spatial_ref()
        } else {
            Some(SpatialRef::from_wkt(&tiles.crs_wkt)?)
        };

        fs::create_dir_all(dest_dir)?;
        let driver = DriverManager::get_driver_by_name("GeoJSON")?;
        let mut written = 0;

        for tile in &tiles.tiles {
            let path = dest_dir.join(format!("{}.{}", tile.stem, LABEL_SUFFIX));
            // the GeoJSON driver refuses to overwrite
            if path.exists() {
                fs::remove_file(&path)?;
            }

            let mut output = driver.create_vector_only(&path)?;
            let mut out_layer = output.create_layer(LayerOptions {
                name: &tile.stem,
                srs: srs.as_ref(),
                ty: OGRwkbGeometryType::wkbUnknown,
                options: None,
            })?;
            out_layer.create_defn_fields(&field_defs)?;

            let b = &tile.bounds;
            let clip = Geometry::bbox(b.min_x, b.min_y, b.max_x, b.max_y)?;
            layer.set_spatial_filter_rect(b.min_x, b.min_y, b.max_x, b.max_y);

            let mut kept = 0;
            for feature in layer.features() {
                let Some(clipped) = feature.geometry().and_then(|g| g.intersection(&clip)) else {
                    continue;
                };
                if clipped.is_empty() {
                    continue;
                }
                let (names, values): (Vec<String>, Vec<FieldValue>) = feature
                    .fields()
                    .filter_map(|(name, value)| value.map(|v| (name, v)))
                    .unzip();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                out_layer.create_feature_fields(clipped, &names, &values)?;
                kept += 1;
            }

            debug!("Label tile {} holds {} features", path.display(), kept);
            written += 1;
        }
        layer.clear_spatial_filter();

        info!("Wrote {} label tiles to {}", written, dest_dir.display());
        Ok(written)
    }
}

impl MaskRasterizer for GdalBackend {
    fn burn(&self, features: &[LabelFeature], reference: &Path, output: &Path) -> Result<()> {
        let reference_ds = open_dataset(reference)?;
        let (width, height) = reference_ds.raster_size();

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut mask = driver.create_with_band_type::<u8, _>(output, width, height, 1)?;
        mask.set_geo_transform(&reference_ds.geo_transform()?)?;
        mask.set_projection(&reference_ds.projection())?;

        let geometries = features
            .iter()
            .map(|feature| Geometry::from_wkt(&feature.wkt))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if geometries.is_empty() {
            debug!("Empty mask: {}", output.display());
            return Ok(());
        }

        let burn_values = vec![FOOTPRINT_BURN_VALUE; geometries.len()];
        gdal::raster::rasterize(&mut mask, &[1], &geometries, &burn_values, None)?;
        debug!("Burned {} features into {}", geometries.len(), output.display());
        Ok(())
    }
}
