use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use landcover_areas::{load_config, process_directory, Overrides};

#[derive(Parser)]
#[command(name = "landcover-areas")]
#[command(author, version, about = "Computes land-cover area per class for every polygon in a folder of Shapefile or GeoJSON files and exports one CSV table per file")]
struct Cli {
    /// TOML configuration file (defaults to ./landcover.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the input files
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Extension of candidate input files (shp or geojson)
    #[arg(long)]
    extension: Option<String>,

    /// Property that uniquely identifies each feature
    #[arg(long)]
    id_column: Option<String>,

    /// Source CRS of the inputs, e.g. EPSG:31983 (overrides the file's own)
    #[arg(long)]
    source_crs: Option<String>,

    /// Classification asset name
    #[arg(long)]
    asset: Option<String>,

    /// Classification year, selects the classification_<year> band
    #[arg(short, long)]
    year: Option<u16>,

    /// JSON grid catalog backing the compute service
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Upper bound on pixels touched per feature
    #[arg(long)]
    max_pixels: Option<u64>,

    /// Root folder for exported tables
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        input_dir: cli.input_dir,
        extension: cli.extension,
        id_column: cli.id_column,
        source_crs: cli.source_crs,
        asset: cli.asset,
        year: cli.year,
        catalog: cli.catalog,
        max_pixels: cli.max_pixels,
        output_dir: cli.output_dir,
    };
    let config = load_config(cli.config.as_deref(), overrides).context("loading configuration")?;

    let summary = process_directory(&config).context("batch aborted")?;

    println!(
        "Processed {} files: {} exported, {} skipped",
        summary.files.len(),
        summary.exported(),
        summary.skipped()
    );
    if summary.feature_failures() > 0 {
        println!(
            "{} features could not be aggregated, see the log above",
            summary.feature_failures()
        );
    }
    println!("Output files can be found in: {}", config.export.output_dir.display());
    Ok(())
}
