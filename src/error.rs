use std::path::PathBuf;

use crate::legend::ClassCode;

/// Failures while turning an input file into feature records. Each of these
/// skips the file but never stops the batch.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {reason}")]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("feature #{index} has no '{column}' property")]
    MissingIdentifier { column: String, index: usize },

    #[error("identifier '{id}' appears more than once")]
    DuplicateIdentifier { id: String },

    #[error("cannot reproject from {from} to EPSG:4326: {reason}")]
    Reprojection { from: String, reason: String },
}

/// Failures reported by a [`GroupedAreaReducer`](crate::reducer::GroupedAreaReducer).
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("band '{band}' is not available in asset '{asset}'")]
    BandUnavailable { asset: String, band: String },

    #[error("reduction would touch {cells} cells, above the limit of {max_pixels}")]
    TooManyPixels { cells: u64, max_pixels: u64 },

    #[error("invalid reduction request: {0}")]
    InvalidRequest(String),
}

/// Per-feature aggregation failures.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("geometry of feature '{id}' is empty or has zero area")]
    Geometry { id: String },

    #[error("classification band '{band}' is missing from '{asset}'")]
    RasterUnavailable { asset: String, band: String },

    #[error("reduction failed: {0}")]
    Reduction(ReduceError),

    #[error("class code {code} carries a non-finite area")]
    InvalidArea { code: ClassCode },
}

impl From<ReduceError> for AggregateError {
    fn from(err: ReduceError) -> Self {
        match err {
            ReduceError::BandUnavailable { asset, band } => {
                AggregateError::RasterUnavailable { asset, band }
            }
            other => AggregateError::Reduction(other),
        }
    }
}

/// The compute service could not be reached or initialised.
#[derive(Debug, thiserror::Error)]
#[error("compute service unavailable ({source_name}): {reason}")]
pub struct ServiceError {
    pub source_name: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to create export folder {path}: {source}")]
    Folder {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },

    #[error("I/O error while exporting {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Anything that makes the batch skip one input file.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Failures that abort the whole run before any file is processed.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}
