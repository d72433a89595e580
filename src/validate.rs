use crate::backend::GeoInspector;
use crate::error::{PrepError, Result};
use crate::records::SourceRecord;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Band settings the imagery is checked against.
#[derive(Debug, Clone)]
pub struct BandRequirement<'a> {
    pub number_of_bands: usize,
    pub bands_idxs: Option<&'a [usize]>,
}

/// Imagery must hold exactly the wanted bands, or more when indexes say which to keep.
pub fn check_band_count(path: &Path, count: usize, req: &BandRequirement) -> Result<()> {
    if count < req.number_of_bands {
        return Err(PrepError::BandCount {
            path: path.to_path_buf(),
            count,
            expected: req.number_of_bands,
        });
    }
    match req.bands_idxs {
        None if count > req.number_of_bands => Err(PrepError::MissingBandIndexes {
            path: path.to_path_buf(),
            count,
            expected: req.number_of_bands,
        }),
        Some(idxs) => match idxs.iter().find(|&&i| i == 0 || i > count) {
            Some(&index) => Err(PrepError::BandIndexOutOfRange {
                path: path.to_path_buf(),
                index,
                count,
            }),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

/// Two records with the same split and AOI would share tile directories.
pub fn check_disjoint_outputs(records: &[SourceRecord]) -> Result<()> {
    let mut owners: HashMap<(String, String), &Path> = HashMap::new();
    for record in records {
        let key = (record.split.as_str().to_string(), record.aoi_name());
        if let Some(first) = owners.insert(key.clone(), &record.image) {
            return Err(PrepError::SharedOutput {
                first: first.to_path_buf(),
                second: record.image.clone(),
                dir: Path::new(&key.0).join(&key.1),
            });
        }
    }
    Ok(())
}

/// Number of bands shared by all source rasters.
pub fn infer_band_count(records: &[SourceRecord], inspector: &dyn GeoInspector) -> Result<usize> {
    let mut counts = Vec::with_capacity(records.len());
    for record in records {
        counts.push(inspector.raster_info(&record.image)?.band_count);
    }
    let mut distinct = counts.clone();
    distinct.sort_unstable();
    distinct.dedup();

    match distinct.as_slice() {
        [count] => {
            info!("Inputted imagery contains {} bands", count);
            Ok(*count)
        }
        _ => Err(PrepError::InconsistentBandCounts(counts)),
    }
}

/// Run the validation gate over every record before tiling.
///
/// Returns the records that can be tiled. Unreadable imagery or a missing
/// label file drops the record; a CRS mismatch only drops its label pairing.
/// Band-count violations abort the run.
pub fn validate_records(
    records: &[SourceRecord],
    bands: &BandRequirement,
    inspector: &dyn GeoInspector,
    debug_mode: bool,
) -> Result<Vec<SourceRecord>> {
    check_disjoint_outputs(records)?;

    let mut crs_checked: HashMap<(PathBuf, PathBuf), bool> = HashMap::new();
    let mut valid = Vec::with_capacity(records.len());

    for record in records {
        let info = match inspector.raster_info(&record.image) {
            Ok(info) => info,
            Err(e) if !e.is_fatal() => {
                error!("Skipping {}: {}", record.image.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!("Raster {}: {:?}", record.image.display(), info);
        check_band_count(&record.image, info.band_count, bands)?;

        let label_usable = match &record.label {
            Some(label) if !label.exists() => {
                error!(
                    "Label file {} not found, skipping {}",
                    label.display(),
                    record.image.display()
                );
                continue;
            }
            Some(label) => {
                let key = (record.image.clone(), label.clone());
                let matched = *crs_checked.entry(key).or_insert_with(|| {
                    inspector.crs_match(&record.image, label).unwrap_or_else(|e| {
                        error!("Problem reading CRS from image or label: {}", e);
                        false
                    })
                });
                if !matched {
                    error!(
                        "CRS mismatch: {} and {}. Only imagery will be tiled for this record",
                        record.image.display(),
                        label.display()
                    );
                }
                matched
            }
            None => {
                warn!(
                    "No ground truth data found for {}. Only imagery will be processed",
                    record.image.display()
                );
                false
            }
        };

        let mut record = record.clone();
        if !label_usable {
            record.label = None;
        }
        valid.push(record);
    }

    if debug_mode {
        check_label_geometries(&valid, inspector);
    }

    info!("{} of {} records passed validation", valid.len(), records.len());
    Ok(valid)
}

/// Debug-only scan for invalid geometries in every label file.
pub fn check_label_geometries(records: &[SourceRecord], inspector: &dyn GeoInspector) {
    let mut scanned: Vec<&Path> = Vec::new();
    for label in records.iter().filter_map(|r| r.label.as_deref()) {
        if scanned.contains(&label) {
            continue;
        }
        scanned.push(label);
        match inspector.invalid_features(label) {
            Ok(invalid) if !invalid.is_empty() => {
                error!("{}: Invalid geometry object(s) {:?}", label.display(), invalid)
            }
            Ok(_) => debug!("All geometries valid in {}", label.display()),
            Err(e) => error!("Could not scan {}: {}", label.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Split;
    use crate::testing::FakeBackend;
    use std::fs;

    fn req(number_of_bands: usize, idxs: Option<&[usize]>) -> BandRequirement<'_> {
        BandRequirement {
            number_of_bands,
            bands_idxs: idxs,
        }
    }

    #[test]
    fn test_band_count_rules() {
        let path = Path::new("scene.tif");
        assert!(check_band_count(path, 3, &req(3, None)).is_ok());
        assert!(matches!(
            check_band_count(path, 4, &req(3, None)),
            Err(PrepError::MissingBandIndexes { .. })
        ));
        assert!(check_band_count(path, 4, &req(3, Some(&[1, 2, 3]))).is_ok());
        assert!(matches!(
            check_band_count(path, 2, &req(3, None)),
            Err(PrepError::BandCount { .. })
        ));
        assert!(matches!(
            check_band_count(path, 4, &req(3, Some(&[1, 2, 5]))),
            Err(PrepError::BandIndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn test_gate_drops_mismatched_label_and_unreadable_image() {
        let dir = tempfile::tempdir().unwrap();
        let label = dir.path().join("labels.gpkg");
        fs::write(&label, b"gpkg").unwrap();

        let backend = FakeBackend::new();
        backend.add_raster(dir.path().join("a.tif"), 2048, 2048, 3, "EPSG:32618");
        backend.add_raster(dir.path().join("b.tif"), 2048, 2048, 3, "EPSG:32618");
        backend.set_vector_crs(&label, "EPSG:4326");

        let records = vec![
            FakeBackend::record(dir.path().join("a.tif"), Some(label.clone()), Split::Train),
            FakeBackend::record(dir.path().join("missing.tif"), None, Split::Train),
            FakeBackend::record(dir.path().join("b.tif"), None, Split::Test),
        ];

        let valid = validate_records(&records, &req(3, None), &backend, true).unwrap();
        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].label, None);
        assert_eq!(valid[1].split, Split::Test);
    }

    #[test]
    fn test_debug_mode_scans_each_label_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("labels.gpkg");
        let other = dir.path().join("roads.gpkg");
        fs::write(&shared, b"gpkg").unwrap();
        fs::write(&other, b"gpkg").unwrap();

        let backend = FakeBackend::new();
        for name in ["a.tif", "b.tif", "c.tif"] {
            backend.add_raster(dir.path().join(name), 1024, 1024, 3, "EPSG:32618");
        }
        backend.set_vector_crs(&shared, "EPSG:32618");
        backend.set_vector_crs(&other, "EPSG:32618");
        backend.set_invalid(&shared, vec![3, 7]);

        let records = vec![
            FakeBackend::record(dir.path().join("a.tif"), Some(shared.clone()), Split::Train),
            FakeBackend::record(dir.path().join("b.tif"), Some(shared.clone()), Split::Test),
            FakeBackend::record(dir.path().join("c.tif"), Some(other.clone()), Split::Train),
        ];

        // invalid geometries are reported, not fatal
        let valid = validate_records(&records, &req(3, None), &backend, true).unwrap();
        assert_eq!(valid.len(), 3);
        assert!(valid.iter().all(|r| r.label.is_some()));
        assert_eq!(*backend.geometry_scans.lock().unwrap(), vec![shared, other]);
    }

    #[test]
    fn test_geometry_scan_skipped_outside_debug_mode() {
        let dir = tempfile::tempdir().unwrap();
        let label = dir.path().join("labels.gpkg");
        fs::write(&label, b"gpkg").unwrap();
        let backend = FakeBackend::new();
        backend.add_raster(dir.path().join("a.tif"), 1024, 1024, 3, "EPSG:32618");
        backend.set_vector_crs(&label, "EPSG:32618");
        backend.set_invalid(&label, vec![1]);
        let records = vec![FakeBackend::record(dir.path().join("a.tif"), Some(label), Split::Train)];

        validate_records(&records, &req(3, None), &backend, false).unwrap();
        assert!(backend.geometry_scans.lock().unwrap().is_empty());
    }

    #[test]
    fn test_gate_fails_on_band_count() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        backend.add_raster(dir.path().join("a.tif"), 512, 512, 1, "EPSG:32618");
        let records = vec![FakeBackend::record(dir.path().join("a.tif"), None, Split::Train)];

        let err = validate_records(&records, &req(3, None), &backend, false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_shared_output_dirs_rejected() {
        let a = FakeBackend::record(PathBuf::from("x/scene.tif"), None, Split::Train);
        let b = FakeBackend::record(PathBuf::from("y/scene.tif"), None, Split::Train);
        let c = FakeBackend::record(PathBuf::from("z/scene.tif"), None, Split::Test);

        assert!(check_disjoint_outputs(&[a.clone(), c]).is_ok());
        assert!(matches!(
            check_disjoint_outputs(&[a, b]),
            Err(PrepError::SharedOutput { .. })
        ));
    }

    #[test]
    fn test_infer_band_count() {
        let backend = FakeBackend::new();
        backend.add_raster(PathBuf::from("a.tif"), 10, 10, 4, "EPSG:4326");
        backend.add_raster(PathBuf::from("b.tif"), 10, 10, 4, "EPSG:4326");
        backend.add_raster(PathBuf::from("c.tif"), 10, 10, 3, "EPSG:4326");

        let a = FakeBackend::record(PathBuf::from("a.tif"), None, Split::Train);
        let b = FakeBackend::record(PathBuf::from("b.tif"), None, Split::Train);
        let c = FakeBackend::record(PathBuf::from("c.tif"), None, Split::Test);

        assert_eq!(infer_band_count(&[a.clone(), b], &backend).unwrap(), 4);
        assert!(matches!(
            infer_band_count(&[a, c], &backend),
            Err(PrepError::InconsistentBandCounts(_))
        ));
    }
}
