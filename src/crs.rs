use gdal::spatial_ref::SpatialRef;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrsComparison {
    Match,
    Mismatch,
    Unknown, // at least one side has no authority code
}

/// `AUTHORITY:CODE` identifier of a spatial reference (e.g. `EPSG:32618`)
pub fn crs_identifier(srs: &SpatialRef) -> Option<String> {
    if let (Ok(name), Ok(code)) = (srs.auth_name(), srs.auth_code()) {
        return Some(format!("{}:{}", name, code));
    }

    // WKT without an authority node: ask GDAL to recognise it
    let mut identified = srs.clone();
    match identified.auto_identify_epsg() {
        Ok(()) => identified.auth_code().ok().map(|code| format!("EPSG:{}", code)),
        Err(e) => {
            debug!("Could not identify an EPSG code: {}", e);
            None
        }
    }
}

pub fn normalize_identifier(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

/// Compare two authority identifiers.
pub fn compare_identifiers(raster: Option<&str>, vector: Option<&str>) -> CrsComparison {
    match (raster, vector) {
        (Some(a), Some(b)) if normalize_identifier(a) == normalize_identifier(b) => {
            CrsComparison::Match
        }
        (Some(_), Some(_)) => CrsComparison::Mismatch,
        _ => CrsComparison::Unknown,
    }
}

/// Identifier comparison first, then GDAL's own equivalence test.
pub fn same_crs(raster: &SpatialRef, vector: &SpatialRef) -> bool {
    let raster_id = crs_identifier(raster);
    let vector_id = crs_identifier(vector);

    match compare_identifiers(raster_id.as_deref(), vector_id.as_deref()) {
        CrsComparison::Match => true,
        CrsComparison::Mismatch => false,
        CrsComparison::Unknown => {
            warn!(
                "Cannot parse an authority code (raster: {:?}, vector: {:?}), comparing definitions",
                raster_id, vector_id
            );
            raster == vector
        }
    }
}
