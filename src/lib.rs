//! Per-class land-cover area for every polygon in a folder of vector files,
//! exported as one long-format CSV table per file.

use std::path::PathBuf;

pub mod aggregator;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod legend;
pub mod loader;
pub mod reducer;

pub use aggregator::{AreaAggregator, AreaRow, ReductionParams};
pub use batch::{discover_inputs, run_batch, sanitize_name, BatchOptions, BatchSummary};
pub use config::{load_config, Config, Overrides};
pub use error::{AggregateError, BatchError, ConfigError, ExportError, LoadError, ServiceError};
pub use export::{CsvFolderSink, ExportSink, ExportTask};
pub use legend::{label_for, ClassCode, ClassLabel};
pub use loader::{load_features, FeatureId, FeatureRecord};
pub use reducer::{ClassificationImage, GridReducer, GroupedAreaReducer};

/// Runs a whole batch as configured: discovers inputs, connects to the grid
/// catalog and exports CSV tables under `export.output_dir`.
///
/// Configuration and service errors abort the run; per-file problems are
/// reported in the returned summary.
pub fn process_directory(config: &Config) -> anyhow::Result<BatchSummary> {
    let files: Vec<PathBuf> = discover_inputs(&config.input.dir, &config.input.extension)?;
    tracing::info!("Found {} input files:", files.len());
    for file in &files {
        tracing::info!("  {}", file.display());
    }

    let reducer = GridReducer::from_catalog_file(&config.classification.catalog)?;
    let image = config.image();
    let aggregator = AreaAggregator::new(&reducer, &image, config.reduction());
    let mut sink = CsvFolderSink::new(&config.export.output_dir);

    Ok(run_batch(
        &files,
        &BatchOptions::from_config(config),
        &aggregator,
        &mut sink,
    ))
}
