// Library exports for the binary and for tests

pub mod assemble;
pub mod backend;
pub mod cli;
pub mod config;
pub mod crs;
pub mod error;
pub mod filter;
pub mod grid;
pub mod io;
pub mod layout;
pub mod manifest;
pub mod parallel;
pub mod pipeline;
pub mod reconcile;
pub mod records;
pub mod tiling;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use backend::{GeoInspector, MaskRasterizer, Tiler};
pub use config::{ParamFile, PrepConfig};
pub use error::{PrepError, Result};
pub use io::GdalBackend;
pub use pipeline::{run, RunSummary};
pub use records::{SourceRecord, Split};
