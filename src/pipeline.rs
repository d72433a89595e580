use crate::assemble::{AssemblySettings, DatasetAssembler, SeededDraws};
use crate::backend::{GeoInspector, MaskRasterizer, Tiler};
use crate::config::PrepConfig;
use crate::error::Result;
use crate::layout::OutputLayout;
use crate::manifest::Counters;
use crate::parallel::{self, ExecutionMode, JobSummary};
use crate::reconcile::reconcile_record;
use crate::records::SourceRecord;
use crate::tiling::TilingJob;
use crate::validate::{validate_records, BandRequirement};
use log::{error, info, warn};
use std::fs;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records that passed the validation gate.
    pub records: usize,
    pub jobs: JobSummary,
    pub counters: Counters,
}

/// Reconcile every record against the tiles on disk and build the jobs for
/// the ones that need tiling. Must finish before any job is dispatched.
pub fn plan_jobs(
    records: &[SourceRecord],
    layout: &OutputLayout,
    config: &PrepConfig,
    inspector: &dyn GeoInspector,
) -> Result<Vec<TilingJob>> {
    let mut jobs = Vec::new();
    for record in records {
        let planned = inspector
            .raster_info(&record.image)
            .and_then(|info| reconcile_record(record, &info, layout, &config.grid));
        let reconciliation = match planned {
            Ok(reconciliation) => reconciliation,
            Err(e) if !e.is_fatal() => {
                error!("Cannot check tiles of {}: {}", record.image.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        if reconciliation.decision.needs_tiling() {
            jobs.push(TilingJob::for_record(
                record,
                layout,
                config.grid,
                config.bands_idxs.clone(),
                reconciliation.decision.clears_existing(),
            ));
        }
    }
    Ok(jobs)
}

/// Validate, tile and assemble one dataset.
pub fn run<B>(
    config: &PrepConfig,
    records: &[SourceRecord],
    backend: &B,
    mode: &ExecutionMode,
) -> Result<RunSummary>
where
    B: GeoInspector + Tiler + MaskRasterizer,
{
    let start = Instant::now();
    let layout = OutputLayout::new(config.samples_dir());
    if layout.samples_dir().is_dir() {
        warn!(
            "Data path exists: {}. Existing tiles will be checked and reused",
            layout.samples_dir().display()
        );
    }
    fs::create_dir_all(layout.samples_dir())?;
    info!("Samples will be written to {}", layout.samples_dir().display());

    let bands = BandRequirement {
        number_of_bands: config.number_of_bands,
        bands_idxs: config.bands_idxs.as_deref(),
    };
    let valid = validate_records(records, &bands, backend, config.debug)?;

    let jobs = plan_jobs(&valid, &layout, config, backend)?;
    info!("{} of {} records need tiling", jobs.len(), valid.len());
    let reports = parallel::execute(&jobs, mode, backend)?;

    let mut assembler = DatasetAssembler::new(
        backend,
        backend,
        &layout,
        &config.experiment_name,
        AssemblySettings::from_config(config),
        SeededDraws::new(config.seed),
    )?;
    assembler.assemble_all(&valid)?;
    let counters = assembler.finish()?;

    info!(
        "End of process. Elapsed time: {:.2}s",
        start.elapsed().as_secs_f64()
    );
    Ok(RunSummary {
        records: valid.len(),
        jobs: JobSummary::from_reports(&reports),
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamFile;
    use crate::layout::{count_tiles, TileCategory, IMAGE_SUFFIX, LABEL_SUFFIX};
    use crate::records::Split;
    use crate::testing::FakeBackend;
    use std::path::Path;

    const CRS: &str = "EPSG:32618";

    fn config(dir: &Path) -> PrepConfig {
        let mut params = ParamFile::for_csv(&dir.join("sources.csv"), 3);
        params.global.data_path = dir.join("data");
        params.global.experiment_name = Some("exp".to_string());
        params.sample.val_percent = 0;
        PrepConfig::from_params(params).unwrap()
    }

    /// A 2048x2048 labeled train record whose single feature covers half of every tile.
    fn labeled_record(dir: &Path, backend: &FakeBackend) -> SourceRecord {
        let image = dir.join("scene.tif");
        let label = dir.join("labels.gpkg");
        fs::write(&image, b"raster").unwrap();
        fs::write(&label, b"vector").unwrap();
        backend.add_raster(image.clone(), 2048, 2048, 3, CRS);
        backend.set_vector_crs(&label, CRS);
        backend.set_features(&label, vec![FakeBackend::feature(1, 1, 1024.0 * 512.0)]);

        let mut record = FakeBackend::record(image, Some(label), Split::Train);
        record.aoi = Some("aoi".to_string());
        record
    }

    fn manifest_len(config: &PrepConfig, split: Split) -> usize {
        let layout = OutputLayout::new(config.samples_dir());
        fs::read_to_string(layout.manifest_path("exp", split))
            .unwrap()
            .lines()
            .count()
    }

    #[test]
    fn test_fresh_run_tiles_and_assembles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let record = labeled_record(dir.path(), &backend);
        let config = config(dir.path());

        let summary = run(&config, &[record.clone()], &backend, &ExecutionMode::Sequential).unwrap();

        assert_eq!(summary.records, 1);
        assert_eq!(summary.jobs.completed, 1);
        assert_eq!(summary.counters.total(Split::Train), 4);
        assert_eq!(summary.counters.kept(Split::Train), 4);
        assert_eq!(manifest_len(&config, Split::Train), 4);

        let layout = OutputLayout::new(config.samples_dir());
        let label_dir = layout.tile_dir(&record, TileCategory::Label);
        assert_eq!(count_tiles(&label_dir, LABEL_SUFFIX).unwrap(), 4);
        // one mask per label tile
        assert_eq!(count_tiles(&label_dir, IMAGE_SUFFIX).unwrap(), 4);
    }

    #[test]
    fn test_complete_tiles_dispatch_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let record = labeled_record(dir.path(), &backend);
        let config = config(dir.path());

        let layout = OutputLayout::new(config.samples_dir());
        let image_dir = layout.tile_dir(&record, TileCategory::Imagery);
        let label_dir = layout.tile_dir(&record, TileCategory::Label);
        for i in 0..4 {
            let stem = format!("scene_{:05}_{:05}", i / 2, i % 2);
            backend.write_image_tile(&image_dir.join(format!("{}.tif", stem)), 64, 1024.0);
            backend.write_label_tile(&label_dir.join(format!("{}.geojson", stem)), vec![]);
        }

        let summary = run(&config, &[record], &backend, &ExecutionMode::Sequential).unwrap();

        assert!(backend.raster_cuts.lock().unwrap().is_empty());
        assert_eq!(summary.jobs, JobSummary::default());
        assert_eq!(summary.counters.total(Split::Train), 4);
    }

    #[test]
    fn test_rerun_reuses_tiles_and_rewrites_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let record = labeled_record(dir.path(), &backend);
        let config = config(dir.path());
        let records = [record];

        run(&config, &records, &backend, &ExecutionMode::Sequential).unwrap();
        let first = manifest_len(&config, Split::Train);
        let second_run = run(&config, &records, &backend, &ExecutionMode::Sequential).unwrap();

        assert_eq!(backend.raster_cuts.lock().unwrap().len(), 1);
        assert_eq!(second_run.jobs.completed, 0);
        assert_eq!(manifest_len(&config, Split::Train), first);
    }

    #[test]
    fn test_crs_mismatch_tiles_imagery_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let mut record = labeled_record(dir.path(), &backend);
        record.split = Split::Test;
        backend.set_vector_crs(record.label.as_ref().unwrap(), "EPSG:4326");
        let config = config(dir.path());

        let summary = run(&config, &[record.clone()], &backend, &ExecutionMode::Sequential).unwrap();

        let layout = OutputLayout::new(config.samples_dir());
        let label_dir = layout.tile_dir(&record, TileCategory::Label);
        assert_eq!(count_tiles(&label_dir, LABEL_SUFFIX).unwrap(), 0);
        assert_eq!(summary.counters.kept(Split::Test), 4);
        assert!(backend.burned.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_job_does_not_stop_other_records() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let good = labeled_record(dir.path(), &backend);

        let broken_image = dir.path().join("broken.tif");
        fs::write(&broken_image, b"raster").unwrap();
        backend.add_raster(broken_image.clone(), 1024, 1024, 3, CRS);
        backend.fail_tiling(&broken_image);
        let broken = FakeBackend::record(broken_image, None, Split::Test);

        let config = config(dir.path());
        let summary = run(&config, &[broken, good], &backend, &ExecutionMode::Sequential).unwrap();

        assert_eq!(summary.jobs.failed, 1);
        assert_eq!(summary.jobs.completed, 1);
        assert_eq!(summary.counters.kept(Split::Train), 4);
        assert_eq!(summary.counters.kept(Split::Test), 0);
    }
}
