use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use landcover_areas::error::FileError;
use landcover_areas::{process_directory, BatchError, Config};

// Roughly 30 m cells at the equator.
const DX: f64 = 30.0 / 111_319.490_793;
const DY: f64 = 30.0 / 110_574.275_822;

fn write_catalog(path: &Path) {
    let catalog = serde_json::json!({
        "assets": {
            "test/lulc": {
                "classification_2024": {
                    "origin": [0.0, 10.0 * DY],
                    "cell_size": [DX, DY],
                    "width": 10,
                    "height": 10,
                    "values": vec![3; 100]
                }
            }
        }
    });
    fs::write(path, catalog.to_string()).unwrap();
}

fn write_plots(path: &Path) {
    write_plots_with_ids(path, 1, 2);
}

fn write_plots_with_ids(path: &Path, polygon_id: i64, point_id: i64) {
    let (w, h) = (10.0 * DX, 10.0 * DY);
    let doc = serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "fid": polygon_id },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [w, 0.0], [w, h], [0.0, h], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "fid": point_id },
                "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
            }
        ]
    });
    fs::write(path, doc.to_string()).unwrap();
}

fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.input.dir = root.join("shapes");
    config.input.extension = "geojson".to_string();
    config.classification.asset = "test/lulc".to_string();
    config.classification.catalog = root.join("catalog.json");
    config.export.output_dir = root.join("out");
    config
}

#[test]
fn batch_exports_good_files_and_skips_broken_ones() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("shapes")).unwrap();
    write_catalog(&root.path().join("catalog.json"));
    write_plots(&root.path().join("shapes").join("Área Norte.geojson"));
    fs::write(root.path().join("shapes").join("broken.geojson"), "not geojson").unwrap();

    let config = config_for(root.path());
    let summary = process_directory(&config).unwrap();

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.exported(), 1);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.feature_failures(), 1);

    let broken = summary
        .files
        .iter()
        .find(|f| f.file.ends_with("broken.geojson"))
        .unwrap();
    assert!(matches!(broken.outcome, Err(FileError::Load(_))));

    let exported = summary
        .files
        .iter()
        .find_map(|f| f.outcome.as_ref().ok())
        .unwrap();
    assert_eq!(exported.export_name, "Area_Norte");
    assert_eq!(exported.features, 2);
    assert_eq!(exported.rows, 1);
    assert_eq!(exported.failures[0].id.as_str(), "2");

    let csv_path = root
        .path()
        .join("out")
        .join("GEE_Batch_Export_2024")
        .join("areas_area_norte_c2024.csv");
    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["fid", "class_id", "class_name", "area_ha"]
    );
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][0], "1");
    assert_eq!(&records[0][1], "3");
    assert_eq!(&records[0][2], "1. FOREST / Forest Formation");
    let area: f64 = records[0][3].parse().unwrap();
    assert_relative_eq!(area, 9.0, max_relative = 5e-3);
}

#[test]
fn empty_input_directory_aborts_before_processing() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("shapes")).unwrap();
    write_catalog(&root.path().join("catalog.json"));

    let config = config_for(root.path());
    let err = process_directory(&config).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BatchError>(),
        Some(BatchError::Configuration(_))
    ));
    assert!(!root.path().join("out").exists());
}

#[test]
fn unreachable_catalog_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("shapes")).unwrap();
    write_plots(&root.path().join("shapes").join("plots.geojson"));

    let config = config_for(root.path());
    let err = process_directory(&config).unwrap_err();
    assert!(err.to_string().contains("compute service unavailable"));
    assert!(!root.path().join("out").exists());
}

fn read_ids(path: &Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()[0].to_string()).collect()
}

#[test]
fn inputs_with_the_same_export_name_do_not_overwrite_each_other() {
    let root = tempfile::tempdir().unwrap();
    let shapes = root.path().join("shapes");
    fs::create_dir(&shapes).unwrap();
    write_catalog(&root.path().join("catalog.json"));
    write_plots_with_ids(&shapes.join("Área.geojson"), 1, 10);
    write_plots_with_ids(&shapes.join("area.geojson"), 2, 20);

    let summary = process_directory(&config_for(root.path())).unwrap();
    assert_eq!(summary.exported(), 2);

    let folder = root.path().join("out").join("GEE_Batch_Export_2024");
    let mut csv_files: Vec<String> = fs::read_dir(&folder)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    csv_files.sort();
    assert_eq!(csv_files, vec!["areas_area_c2024.csv", "areas_area_c2024_2.csv"]);

    let mut ids: Vec<String> = csv_files
        .iter()
        .flat_map(|name| read_ids(&folder.join(name)))
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2"]);
}
