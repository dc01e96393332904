use std::collections::HashSet;
use std::fmt;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::aggregator::AreaRow;
use crate::error::ExportError;

/// One table export: every row produced for a single input file.
#[derive(Debug, Clone)]
pub struct ExportTask {
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    /// Header used for the identifier column.
    pub id_column: String,
    pub rows: Vec<AreaRow>,
}

impl ExportTask {
    pub fn new(
        sanitized_name: &str,
        year: u16,
        naming: &ExportNaming,
        id_column: &str,
        rows: Vec<AreaRow>,
    ) -> Self {
        Self {
            description: naming.task_description(sanitized_name, year),
            folder: naming.folder(year),
            file_name_prefix: file_name_prefix(sanitized_name, year),
            id_column: id_column.to_string(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for finished tables. Submitting hands the task over; the
/// caller does not track it afterwards.
pub trait ExportSink {
    fn submit(&mut self, task: ExportTask) -> Result<TaskId, ExportError>;
}

/// Prefixes used to name export folders and task descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNaming {
    pub service: String,
    pub task_prefix: String,
}

impl Default for ExportNaming {
    fn default() -> Self {
        Self {
            service: "GEE".to_string(),
            task_prefix: "LandCover_Area".to_string(),
        }
    }
}

impl ExportNaming {
    /// `<service>_Batch_Export_<year>`
    pub fn folder(&self, year: u16) -> String {
        format!("{}_Batch_Export_{}", self.service, year)
    }

    /// `<task_prefix>_<name>_<year>`
    pub fn task_description(&self, sanitized_name: &str, year: u16) -> String {
        format!("{}_{}_{}", self.task_prefix, sanitized_name, year)
    }
}

/// `areas_<name, lowercased>_c<year>`
pub fn file_name_prefix(sanitized_name: &str, year: u16) -> String {
    format!("areas_{}_c{}", sanitized_name.to_lowercase(), year)
}

const VALUE_COLUMNS: [&str; 3] = ["class_id", "class_name", "area_ha"];

/// Writes each task as `<root>/<folder>/<file_name_prefix>.csv`. When two
/// tasks of one run map to the same file, later ones get a `_2`, `_3`, ...
/// suffix instead of overwriting it.
#[derive(Debug)]
pub struct CsvFolderSink {
    root: PathBuf,
    submitted: usize,
    written: HashSet<PathBuf>,
}

impl CsvFolderSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            submitted: 0,
            written: HashSet::new(),
        }
    }

    pub fn output_path(&self, task: &ExportTask) -> PathBuf {
        self.root
            .join(&task.folder)
            .join(format!("{}.csv", task.file_name_prefix))
    }

    fn unclaimed_path(&self, task: &ExportTask) -> PathBuf {
        let path = self.output_path(task);
        if !self.written.contains(&path) {
            return path;
        }
        let folder = self.root.join(&task.folder);
        (2..)
            .map(|n| folder.join(format!("{}_{}.csv", task.file_name_prefix, n)))
            .find(|candidate| !self.written.contains(candidate))
            .unwrap_or(path)
    }

    fn write_table(path: &Path, task: &ExportTask) -> Result<(), ExportError> {
        let write_err = |source: csv::Error| ExportError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(write_err)?;

        let mut header = vec![task.id_column.as_str()];
        header.extend(VALUE_COLUMNS);
        writer.write_record(&header).map_err(write_err)?;

        for row in &task.rows {
            writer.serialize(row).map_err(write_err)?;
        }

        writer.flush().map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ExportSink for CsvFolderSink {
    fn submit(&mut self, task: ExportTask) -> Result<TaskId, ExportError> {
        let folder = self.root.join(&task.folder);
        create_dir_all(&folder).map_err(|source| ExportError::Folder {
            path: folder.clone(),
            source,
        })?;

        let path = self.unclaimed_path(&task);
        if path != self.output_path(&task) {
            warn!(
                "{} was already written in this run, exporting '{}' as {}",
                self.output_path(&task).display(),
                task.description,
                path.display()
            );
        }
        Self::write_table(&path, &task)?;
        self.written.insert(path.clone());

        self.submitted += 1;
        let id = TaskId(format!("{:04}_{}", self.submitted, task.description));
        info!(
            "Task '{}' wrote {} rows to {}",
            task.description,
            task.rows.len(),
            path.display()
        );
        Ok(id)
    }
}
