//! Boundary to the compute service that performs the grouped area reduction.
//!
//! The aggregator only ever talks to [`GroupedAreaReducer`]. [`GridReducer`]
//! is the in-memory implementation: it holds classification grids keyed by
//! asset and band and integrates pixel areas the same way the hosted service
//! does (cell centre inside the polygon, geodesic pixel area, sum per class).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::{coord, BoundingRect, Contains, GeodesicArea, MultiPolygon, Point, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ReduceError, ServiceError};
use crate::legend::ClassCode;

/// Reference to one band of a classification asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationImage {
    pub asset: String,
    pub band: String,
}

impl ClassificationImage {
    pub fn new(asset: impl Into<String>, band: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            band: band.into(),
        }
    }

    /// Selects the `classification_<year>` band of `asset`.
    pub fn for_year(asset: impl Into<String>, year: u16) -> Self {
        Self::new(asset, band_for_year(year))
    }
}

pub fn band_for_year(year: u16) -> String {
    format!("classification_{}", year)
}

/// Sum of pixel areas (square metres) per class code inside a geometry.
pub type GroupedAreas = BTreeMap<ClassCode, f64>;

pub trait GroupedAreaReducer {
    /// Sums the area of every pixel of `image` whose centre lies inside
    /// `geometry`, grouped by class code. `scale` is the pixel edge in metres
    /// and `max_pixels` caps the number of pixels the reduction may touch.
    fn reduce_by_group(
        &self,
        geometry: &MultiPolygon<f64>,
        image: &ClassificationImage,
        scale: f64,
        max_pixels: u64,
    ) -> Result<GroupedAreas, ReduceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PixelArea {
    /// Each cell is a lon/lat rectangle measured on the WGS84 ellipsoid.
    #[default]
    Geodesic,
    /// Cells already have a constant ground area (projected grids).
    Planar { cell_area: f64 },
}

fn default_scale() -> f64 {
    30.0
}

/// A regular grid of class codes. Row 0 is the northern edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassGrid {
    /// x/y of the north-west corner.
    pub origin: [f64; 2],
    /// Cell width and height, both positive.
    pub cell_size: [f64; 2],
    pub width: usize,
    pub height: usize,
    /// Nominal pixel edge in metres.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub nodata: Option<ClassCode>,
    #[serde(default)]
    pub pixel_area: PixelArea,
    pub values: Vec<ClassCode>,
}

impl ClassGrid {
    pub fn new(
        origin: [f64; 2],
        cell_size: [f64; 2],
        width: usize,
        height: usize,
        values: Vec<ClassCode>,
    ) -> Self {
        Self {
            origin,
            cell_size,
            width,
            height,
            scale: default_scale(),
            nodata: None,
            pixel_area: PixelArea::Geodesic,
            values,
        }
    }

    pub fn with_pixel_area(mut self, pixel_area: PixelArea) -> Self {
        self.pixel_area = pixel_area;
        self
    }

    pub fn with_nodata(mut self, nodata: ClassCode) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        let cells = self.width.checked_mul(self.height).ok_or_else(|| {
            format!("grid size {}x{} overflows", self.width, self.height)
        })?;
        if self.values.len() != cells {
            return Err(format!(
                "grid holds {} values but is {}x{}",
                self.values.len(),
                self.width,
                self.height
            ));
        }
        if !(self.cell_size[0] > 0.0 && self.cell_size[1] > 0.0) {
            return Err(format!("cell size must be positive, got {:?}", self.cell_size));
        }
        if let PixelArea::Planar { cell_area } = self.pixel_area {
            if !(cell_area > 0.0) {
                return Err(format!("planar cell area must be positive, got {}", cell_area));
            }
        }
        Ok(())
    }

    fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let min_x = self.origin[0] + col as f64 * self.cell_size[0];
        let max_y = self.origin[1] - row as f64 * self.cell_size[1];
        Rect::new(
            coord! { x: min_x, y: max_y - self.cell_size[1] },
            coord! { x: min_x + self.cell_size[0], y: max_y },
        )
    }

    fn cell_area(&self, row: usize) -> f64 {
        match self.pixel_area {
            PixelArea::Planar { cell_area } => cell_area,
            // Cells in one row share a latitude band, so any column will do.
            PixelArea::Geodesic => self.cell_rect(row, 0).to_polygon().geodesic_area_unsigned(),
        }
    }

    /// Inclusive-exclusive row/column window covering `bounds`, clamped to the grid.
    fn window(&self, bounds: &Rect<f64>) -> Option<(usize, usize, usize, usize)> {
        let col_start = ((bounds.min().x - self.origin[0]) / self.cell_size[0]).floor();
        let col_end = ((bounds.max().x - self.origin[0]) / self.cell_size[0]).ceil();
        let row_start = ((self.origin[1] - bounds.max().y) / self.cell_size[1]).floor();
        let row_end = ((self.origin[1] - bounds.min().y) / self.cell_size[1]).ceil();

        let col_start = col_start.max(0.0) as usize;
        let row_start = row_start.max(0.0) as usize;
        let col_end = (col_end.max(0.0) as usize).min(self.width);
        let row_end = (row_end.max(0.0) as usize).min(self.height);

        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some((row_start, row_end, col_start, col_end))
    }

    /// Grouped pixel areas of every cell whose centre falls in `geometry`.
    pub fn reduce(
        &self,
        geometry: &MultiPolygon<f64>,
        max_pixels: u64,
    ) -> Result<GroupedAreas, ReduceError> {
        self.validate().map_err(ReduceError::InvalidRequest)?;
        let mut groups = GroupedAreas::new();
        let bounds = match geometry.bounding_rect() {
            Some(bounds) => bounds,
            None => return Ok(groups),
        };
        let (row_start, row_end, col_start, col_end) = match self.window(&bounds) {
            Some(window) => window,
            None => return Ok(groups),
        };

        let cells = ((row_end - row_start) * (col_end - col_start)) as u64;
        if cells > max_pixels {
            return Err(ReduceError::TooManyPixels { cells, max_pixels });
        }
        debug!(
            "scanning rows {}..{} cols {}..{} ({} cells)",
            row_start, row_end, col_start, col_end, cells
        );

        for row in row_start..row_end {
            let area = self.cell_area(row);
            for col in col_start..col_end {
                let code = self.values[row * self.width + col];
                if self.nodata == Some(code) {
                    continue;
                }
                let center: Point<f64> = self.cell_rect(row, col).center().into();
                if geometry.contains(&center) {
                    *groups.entry(code).or_insert(0.0) += area;
                }
            }
        }

        Ok(groups)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    assets: BTreeMap<String, BTreeMap<String, ClassGrid>>,
}

/// Compute service backed by classification grids held in memory.
#[derive(Debug, Default)]
pub struct GridReducer {
    catalog: Catalog,
}

impl GridReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `grid` as `band` of `asset`. Malformed grids are refused.
    pub fn with_band(
        mut self,
        asset: impl Into<String>,
        band: impl Into<String>,
        grid: ClassGrid,
    ) -> Result<Self, ReduceError> {
        grid.validate().map_err(ReduceError::InvalidRequest)?;
        self.catalog
            .assets
            .entry(asset.into())
            .or_default()
            .insert(band.into(), grid);
        Ok(self)
    }

    /// Loads a JSON catalog of the form
    /// `{"assets": {"<asset>": {"<band>": <grid>}}}`.
    pub fn from_catalog_file(path: &Path) -> Result<Self, ServiceError> {
        let unavailable = |reason: String| ServiceError {
            source_name: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let catalog: Catalog = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| unavailable(e.to_string()))?;

        for (asset, bands) in &catalog.assets {
            for (band, grid) in bands {
                grid.validate()
                    .map_err(|reason| unavailable(format!("{}/{}: {}", asset, band, reason)))?;
            }
        }

        let band_count: usize = catalog.assets.values().map(|b| b.len()).sum();
        info!(
            "Loaded classification catalog {} ({} assets, {} bands)",
            path.display(),
            catalog.assets.len(),
            band_count
        );
        Ok(Self { catalog })
    }

    pub fn band(&self, image: &ClassificationImage) -> Option<&ClassGrid> {
        self.catalog
            .assets
            .get(&image.asset)
            .and_then(|bands| bands.get(&image.band))
    }
}

impl GroupedAreaReducer for GridReducer {
    fn reduce_by_group(
        &self,
        geometry: &MultiPolygon<f64>,
        image: &ClassificationImage,
        scale: f64,
        max_pixels: u64,
    ) -> Result<GroupedAreas, ReduceError> {
        let grid = self
            .band(image)
            .ok_or_else(|| ReduceError::BandUnavailable {
                asset: image.asset.clone(),
                band: image.band.clone(),
            })?;

        if !(scale > 0.0) {
            return Err(ReduceError::InvalidRequest(format!(
                "scale must be positive, got {}",
                scale
            )));
        }
        if (scale - grid.scale).abs() > f64::EPSILON * grid.scale.max(1.0) {
            return Err(ReduceError::InvalidRequest(format!(
                "requested scale {} m but {} is stored at {} m",
                scale, image.band, grid.scale
            )));
        }

        grid.reduce(geometry, max_pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    // Metres per degree on WGS84 at the equator.
    const M_PER_DEG_LON: f64 = 111_319.490_793;
    const M_PER_DEG_LAT: f64 = 110_574.275_822;

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
            (x: min, y: min),
        ]])
    }

    fn planar_grid(width: usize, height: usize, values: Vec<ClassCode>) -> ClassGrid {
        ClassGrid::new([0.0, 30.0 * height as f64], [30.0, 30.0], width, height, values)
            .with_pixel_area(PixelArea::Planar { cell_area: 900.0 })
    }

    #[test]
    fn only_cells_with_centres_inside_are_counted() {
        let grid = planar_grid(4, 4, vec![3; 16]);
        // Covers the centres of the 2x2 block in the south-west corner.
        let areas = grid.reduce(&square(0.0, 60.0), 1_000).unwrap();
        assert_eq!(areas.len(), 1);
        assert_relative_eq!(areas[&3], 4.0 * 900.0);
    }

    #[test]
    fn nodata_cells_are_skipped() {
        let mut values = vec![15; 4];
        values[0] = 0;
        let grid = planar_grid(2, 2, values).with_nodata(0);
        let areas = grid.reduce(&square(0.0, 60.0), 1_000).unwrap();
        assert_relative_eq!(areas[&15], 3.0 * 900.0);
        assert!(!areas.contains_key(&0));
    }

    #[test]
    fn geometry_outside_grid_yields_nothing() {
        let grid = planar_grid(2, 2, vec![3; 4]);
        let areas = grid.reduce(&square(500.0, 600.0), 1_000).unwrap();
        assert!(areas.is_empty());
    }

    #[test]
    fn max_pixels_caps_the_scan() {
        let grid = planar_grid(10, 10, vec![3; 100]);
        let err = grid.reduce(&square(0.0, 300.0), 50).unwrap_err();
        assert!(matches!(err, ReduceError::TooManyPixels { cells: 100, max_pixels: 50 }));
    }

    #[test]
    fn geodesic_cell_near_equator_is_about_900_square_metres() {
        let dx = 30.0 / M_PER_DEG_LON;
        let dy = 30.0 / M_PER_DEG_LAT;
        let grid = ClassGrid::new([0.0, dy], [dx, dy], 1, 1, vec![3]);
        assert_relative_eq!(grid.cell_area(0), 900.0, max_relative = 1e-3);
    }

    #[test]
    fn geodesic_cells_shrink_towards_the_poles() {
        let grid = ClassGrid::new([0.0, 80.0], [1.0, 10.0], 1, 8, vec![3; 8]);
        let north = grid.cell_area(0);
        let south = grid.cell_area(7);
        assert!(north < south);
    }

    #[test]
    fn missing_band_is_reported() {
        let reducer = GridReducer::new()
            .with_band("lulc", "classification_2024", planar_grid(1, 1, vec![3]))
            .unwrap();
        let image = ClassificationImage::for_year("lulc", 2023);
        let err = reducer
            .reduce_by_group(&square(0.0, 30.0), &image, 30.0, 100)
            .unwrap_err();
        assert!(matches!(err, ReduceError::BandUnavailable { ref band, .. } if band == "classification_2023"));
    }

    #[test]
    fn scale_must_match_the_stored_resolution() {
        let reducer = GridReducer::new()
            .with_band("lulc", "classification_2024", planar_grid(1, 1, vec![3]))
            .unwrap();
        let image = ClassificationImage::for_year("lulc", 2024);
        let err = reducer
            .reduce_by_group(&square(0.0, 30.0), &image, 10.0, 100)
            .unwrap_err();
        assert!(matches!(err, ReduceError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_grids_are_refused() {
        let short = planar_grid(4, 4, vec![3; 15]);
        let err = GridReducer::new()
            .with_band("lulc", "classification_2024", short.clone())
            .unwrap_err();
        assert!(matches!(err, ReduceError::InvalidRequest(ref msg) if msg.contains("4x4")));

        // Direct reductions refuse the grid too instead of indexing past the end.
        let err = short.reduce(&square(0.0, 120.0), 1_000).unwrap_err();
        assert!(matches!(err, ReduceError::InvalidRequest(_)));

        let huge = ClassGrid::new([0.0, 0.0], [1.0, 1.0], usize::MAX, 2, vec![3]);
        let msg = huge.validate().unwrap_err();
        assert!(msg.contains("overflows"));
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let json = serde_json::json!({
            "assets": {
                "lulc": {
                    "classification_2024": {
                        "origin": [0.0, 60.0],
                        "cell_size": [30.0, 30.0],
                        "width": 2,
                        "height": 2,
                        "pixel_area": { "mode": "planar", "cell_area": 900.0 },
                        "values": [3, 3, 15, 15]
                    }
                }
            }
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let reducer = GridReducer::from_catalog_file(&path).unwrap();
        let image = ClassificationImage::for_year("lulc", 2024);
        let grid = reducer.band(&image).unwrap();
        assert_eq!(grid.scale, 30.0);
        assert_eq!(grid.pixel_area, PixelArea::Planar { cell_area: 900.0 });
    }

    #[test]
    fn invalid_catalog_is_a_service_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let json = serde_json::json!({
            "assets": { "lulc": { "classification_2024": {
                "origin": [0.0, 0.0], "cell_size": [1.0, 1.0],
                "width": 2, "height": 2, "values": [3]
            } } }
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let err = GridReducer::from_catalog_file(&path).unwrap_err();
        assert!(err.reason.contains("2x2"));

        let missing = GridReducer::from_catalog_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(missing.source_name.ends_with("nope.json"));
    }
}
