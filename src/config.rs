//! Run configuration.
//!
//! Values come from three layers, later ones winning:
//! 1. built-in defaults
//! 2. a TOML file (`--config`, or `landcover.toml` in the working directory)
//! 3. command line flags

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregator::ReductionParams;
use crate::error::ConfigError;
use crate::export::ExportNaming;
use crate::reducer::ClassificationImage;

pub const DEFAULT_CONFIG_FILE: &str = "landcover.toml";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub classification: ClassificationConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub dir: PathBuf,
    /// File extension of candidate inputs, without the dot. `shp` files are
    /// read as Shapefiles, everything else as GeoJSON.
    pub extension: String,
    /// Property holding the unique feature identifier.
    pub id_column: String,
    /// Forces the source CRS instead of reading it from each file.
    pub source_crs: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("shapes"),
            extension: "shp".to_string(),
            id_column: "fid".to_string(),
            source_crs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub asset: String,
    pub year: u16,
    /// Grid catalog backing the compute service.
    pub catalog: PathBuf,
    pub scale: f64,
    pub max_pixels: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        let params = ReductionParams::default();
        Self {
            asset: "projects/mapbiomas-public/assets/brazil/lulc/collection10/mapbiomas_brazil_collection10_coverage_v2".to_string(),
            year: 2024,
            catalog: PathBuf::from("classification_catalog.json"),
            scale: params.scale,
            max_pixels: params.max_pixels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub service: String,
    pub task_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let naming = ExportNaming::default();
        Self {
            output_dir: PathBuf::from("exports"),
            service: naming.service,
            task_prefix: naming.task_prefix,
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input_dir: Option<PathBuf>,
    pub extension: Option<String>,
    pub id_column: Option<String>,
    pub source_crs: Option<String>,
    pub asset: Option<String>,
    pub year: Option<u16>,
    pub catalog: Option<PathBuf>,
    pub max_pixels: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_toml_str(text: &str, origin: &Path) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.input_dir {
            self.input.dir = dir;
        }
        if let Some(extension) = overrides.extension {
            self.input.extension = extension;
        }
        if let Some(id_column) = overrides.id_column {
            self.input.id_column = id_column;
        }
        if overrides.source_crs.is_some() {
            self.input.source_crs = overrides.source_crs;
        }
        if let Some(asset) = overrides.asset {
            self.classification.asset = asset;
        }
        if let Some(year) = overrides.year {
            self.classification.year = year;
        }
        if let Some(catalog) = overrides.catalog {
            self.classification.catalog = catalog;
        }
        if let Some(max_pixels) = overrides.max_pixels {
            self.classification.max_pixels = max_pixels;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.export.output_dir = output_dir;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: String| Err(ConfigError::InvalidValue(msg));

        if self.input.id_column.trim().is_empty() {
            return invalid("input.id_column must not be empty".into());
        }
        if self.input.extension.trim_start_matches('.').is_empty() {
            return invalid("input.extension must not be empty".into());
        }
        if self.classification.asset.trim().is_empty() {
            return invalid("classification.asset must not be empty".into());
        }
        if !(1985..=2100).contains(&self.classification.year) {
            return invalid(format!(
                "classification.year {} is outside 1985..=2100",
                self.classification.year
            ));
        }
        if !(self.classification.scale > 0.0) {
            return invalid(format!(
                "classification.scale must be positive, got {}",
                self.classification.scale
            ));
        }
        if self.classification.max_pixels == 0 {
            return invalid("classification.max_pixels must be at least 1".into());
        }
        if self.export.service.trim().is_empty() {
            return invalid("export.service must not be empty".into());
        }
        Ok(())
    }

    pub fn image(&self) -> ClassificationImage {
        ClassificationImage::for_year(self.classification.asset.clone(), self.classification.year)
    }

    pub fn reduction(&self) -> ReductionParams {
        ReductionParams {
            scale: self.classification.scale,
            max_pixels: self.classification.max_pixels,
        }
    }

    pub fn naming(&self) -> ExportNaming {
        ExportNaming {
            service: self.export.service.clone(),
            task_prefix: self.export.task_prefix.clone(),
        }
    }
}

/// Reads the config file (explicit path, else `landcover.toml` if present,
/// else defaults), applies `overrides` and validates the result.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> ConfigResult<Config> {
    let candidate = match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    };

    let mut config = match candidate {
        Some(path) => {
            let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            info!("Using configuration file {}", path.display());
            Config::from_toml_str(&text, &path)?
        }
        None => Config::default(),
    };

    config.apply(overrides);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.input.id_column, "fid");
        assert_eq!(config.image().band, "classification_2024");
        assert_eq!(config.reduction(), ReductionParams::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let text = r#"
            [input]
            dir = "plots"
            id_column = "plot_id"

            [classification]
            year = 2019
        "#;
        let config = Config::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.input.dir, PathBuf::from("plots"));
        assert_eq!(config.input.id_column, "plot_id");
        assert_eq!(config.input.extension, "shp");
        assert_eq!(config.classification.year, 2019);
        assert_eq!(config.classification.scale, 30.0);
        assert_eq!(config.export.service, "GEE");
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let err = Config::from_toml_str("[input\ndir = ", Path::new("broken.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = Config::default();
        config.apply(Overrides {
            year: Some(2020),
            id_column: Some("gid".into()),
            source_crs: Some("EPSG:31983".into()),
            ..Overrides::default()
        });
        assert_eq!(config.classification.year, 2020);
        assert_eq!(config.input.id_column, "gid");
        assert_eq!(config.input.source_crs.as_deref(), Some("EPSG:31983"));
        assert_eq!(config.input.dir, PathBuf::from("shapes"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.classification.max_pixels = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.input.id_column = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.classification.year = 1900;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "[export]\nservice = \"LOCAL\"\n").unwrap();

        let config = load_config(Some(&path), Overrides::default()).unwrap();
        assert_eq!(config.naming().folder(2024), "LOCAL_Batch_Export_2024");

        let missing = load_config(Some(&dir.path().join("absent.toml")), Overrides::default());
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
