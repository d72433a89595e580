use clap::Parser;
use env_logger::Env;
use log::info;
use std::env;
use std::io;

use geotiles_prep::cli::Args;
use geotiles_prep::config::{ParamFile, PrepConfig};
use geotiles_prep::error::{PrepError, Result};
use geotiles_prep::io::GdalBackend;
use geotiles_prep::parallel::{serve_worker, ExecutionMode, ProcessPool};
use geotiles_prep::{pipeline, records, validate};

fn main() -> Result<()> {
    let args = Args::parse();

    // Parameter file first, so its debug_mode can raise the log level
    let params = args.param.as_deref().map(ParamFile::load).transpose()?;
    let debug_mode = params.as_ref().is_some_and(|p| p.global.debug_mode);

    let log_level = if args.verbose || args.debug || debug_mode {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if args.tile_worker {
        return serve_worker(io::stdin().lock(), io::stdout().lock(), &GdalBackend);
    }

    info!("=== Segmentation dataset preparation ===");
    if let Some(param) = &args.param {
        info!("Parameters: {}", param.display());
    }
    let backend = GdalBackend;

    let mut params = match (params, &args.csv) {
        (Some(params), _) => params,
        (None, Some(csv)) => {
            let records = records::read_csv(csv)?;
            let bands = validate::infer_band_count(&records, &backend)?;
            ParamFile::for_csv(csv, bands)
        }
        (None, None) => {
            return Err(PrepError::Config(
                "either --csv or --param is required".to_string(),
            ))
        }
    };
    args.apply_overrides(&mut params);

    let config = PrepConfig::from_params(params)?;
    let records = records::read_csv(&config.csv_file)?;
    info!(
        "{} source records, tile size {}, stride {}, resize {}",
        records.len(),
        config.grid.tile_size,
        config.grid.stride,
        config.grid.resize
    );

    let mode = if config.parallel {
        let filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
        ExecutionMode::Processes(ProcessPool::current_exe(config.workers)?.with_log_filter(filter))
    } else {
        ExecutionMode::Sequential
    };

    let summary = pipeline::run(&config, &records, &backend, &mode)?;
    info!(
        "{} records processed. Tiling jobs: {} completed, {} skipped, {} failed",
        summary.records, summary.jobs.completed, summary.jobs.skipped, summary.jobs.failed
    );
    info!("=== Done! ===");
    Ok(())
}
