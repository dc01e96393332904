use std::fs;
use std::path::{Path, PathBuf};

use deunicode::deunicode;
use tracing::{error, info, warn};

use crate::aggregator::{AreaAggregator, AreaRow};
use crate::config::Config;
use crate::error::{AggregateError, BatchError, FileError};
use crate::export::{ExportNaming, ExportSink, ExportTask, TaskId};
use crate::loader::{load_features, FeatureId};

/// Per-run settings the batch loop needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub id_column: String,
    pub source_crs: Option<String>,
    pub year: u16,
    pub naming: ExportNaming,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            id_column: config.input.id_column.clone(),
            source_crs: config.input.source_crs.clone(),
            year: config.classification.year,
            naming: config.naming(),
        }
    }
}

#[derive(Debug)]
pub struct FeatureFailure {
    pub id: FeatureId,
    pub error: AggregateError,
}

#[derive(Debug)]
pub struct ExportedFile {
    pub export_name: String,
    pub task: TaskId,
    pub features: usize,
    pub rows: usize,
    pub failures: Vec<FeatureFailure>,
}

#[derive(Debug)]
pub struct FileReport {
    pub file: PathBuf,
    pub outcome: Result<ExportedFile, FileError>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub files: Vec<FileReport>,
}

impl BatchSummary {
    pub fn exported(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_ok()).count()
    }

    pub fn skipped(&self) -> usize {
        self.files.len() - self.exported()
    }

    pub fn feature_failures(&self) -> usize {
        self.files
            .iter()
            .filter_map(|f| f.outcome.as_ref().ok())
            .map(|e| e.failures.len())
            .sum()
    }
}

/// Lists files in `dir` whose extension matches `extension` (case-insensitive),
/// sorted by path. Finding none is a configuration error.
pub fn discover_inputs(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, BatchError> {
    let extension = extension.trim_start_matches('.');
    let entries = fs::read_dir(dir).map_err(|e| {
        BatchError::Configuration(format!("cannot list input directory {}: {}", dir.display(), e))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();

    if files.is_empty() {
        return Err(BatchError::Configuration(format!(
            "no .{} files found in {}",
            extension,
            dir.display()
        )));
    }

    files.sort();
    Ok(files)
}

/// Makes a file stem safe for export names: ASCII only, every run of
/// characters outside `[A-Za-z0-9_.-]` (and every run of underscores)
/// collapsed to one `_`, no leading or trailing `_`.
pub fn sanitize_name(name: &str) -> String {
    let ascii = deunicode(name);
    let mut cleaned = String::with_capacity(ascii.len());
    for ch in ascii.chars() {
        let keep = ch.is_ascii_alphanumeric() || ch == '.' || ch == '-';
        if keep {
            cleaned.push(ch);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Loads, aggregates and exports one input file. Features that fail to
/// aggregate are collected rather than failing the file.
pub fn process_file(
    path: &Path,
    options: &BatchOptions,
    aggregator: &AreaAggregator<'_>,
    sink: &mut dyn ExportSink,
) -> Result<ExportedFile, FileError> {
    let records = load_features(path, &options.id_column, options.source_crs.as_deref())?;
    info!("{} features ready for aggregation", records.len());

    let mut rows: Vec<AreaRow> = Vec::new();
    let mut failures = Vec::new();
    for record in &records {
        match aggregator.aggregate(record) {
            Ok(feature_rows) => rows.extend(feature_rows),
            Err(err) => {
                warn!("{}: feature '{}' skipped: {}", path.display(), record.id, err);
                failures.push(FeatureFailure {
                    id: record.id.clone(),
                    error: err,
                });
            }
        }
    }

    let export_name = sanitize_name(&file_stem(path));
    let row_count = rows.len();
    let task = ExportTask::new(&export_name, options.year, &options.naming, &options.id_column, rows);
    let description = task.description.clone();
    let folder = task.folder.clone();
    let task_id = sink.submit(task)?;
    info!("Task started: '{}' ({} rows) -> {}", description, row_count, folder);

    Ok(ExportedFile {
        export_name,
        task: task_id,
        features: records.len(),
        rows: row_count,
        failures,
    })
}

/// Processes every file in order. A failing file is logged and skipped; the
/// remaining files still run.
pub fn run_batch(
    files: &[PathBuf],
    options: &BatchOptions,
    aggregator: &AreaAggregator<'_>,
    sink: &mut dyn ExportSink,
) -> BatchSummary {
    info!("=== Processing {} input files ===", files.len());
    info!(
        "Classification band {} of {}",
        aggregator.image().band,
        aggregator.image().asset
    );

    let mut summary = BatchSummary::default();
    for (index, file) in files.iter().enumerate() {
        info!("Processing file {}/{}: {}", index + 1, files.len(), file.display());
        let outcome = process_file(file, options, aggregator, sink);
        if let Err(err) = &outcome {
            error!("Error processing {}: {}", file.display(), err);
        }
        summary.files.push(FileReport {
            file: file.clone(),
            outcome,
        });
    }

    info!(
        "=== Done: {} exported, {} skipped, {} feature failures ===",
        summary.exported(),
        summary.skipped(),
        summary.feature_failures()
    );
    summary
}
