use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use geo::{coord, LineString, MapCoords, MultiPolygon, Polygon};
use geojson::{Feature, GeoJson, JsonObject, JsonValue, Value as GeoJsonValue};
use proj::Proj;
use serde::Serialize;
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape};
use tracing::{debug, info, warn};

use crate::error::LoadError;

/// Coordinate reference system every geometry is delivered in.
pub const TARGET_CRS: &str = "EPSG:4326";

/// Opaque feature identifier, copied verbatim into every output row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_property(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(Self(s.clone())),
            other => Some(Self(other.to_string())),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: FeatureId,
    /// Always in [`TARGET_CRS`].
    pub geometry: MultiPolygon<f64>,
}

/// Features of one file as read from disk, before identifier checks and
/// reprojection. `None` geometries are missing or not polygons.
struct RawFeatures {
    features: Vec<(Option<FeatureId>, Option<MultiPolygon<f64>>)>,
    declared_crs: Option<String>,
}

/// Reads every feature of a GeoJSON or Shapefile input, reprojected to
/// [`TARGET_CRS`]. The reader is picked by extension: `.shp` is read as a
/// Shapefile, anything else as GeoJSON.
///
/// The source CRS is `source_crs` when given, otherwise what the file
/// declares (the legacy GeoJSON `crs` member or the sibling `.prj`),
/// otherwise WGS84. Non-areal or missing geometries come back as an empty
/// multipolygon and are rejected later, per feature.
pub fn load_features(
    path: &Path,
    id_column: &str,
    source_crs: Option<&str>,
) -> Result<Vec<FeatureRecord>, LoadError> {
    info!("Loading file: {}", path.display());
    let is_shapefile = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"));
    let raw = if is_shapefile {
        read_shapefile(path, id_column)?
    } else {
        read_geojson(path, id_column)?
    };

    let crs = source_crs
        .map(normalize_crs)
        .or(raw.declared_crs)
        .unwrap_or_else(|| TARGET_CRS.to_string());

    let total_features = raw.features.len();
    info!("Found {} features in file (CRS {})", total_features, crs);

    let mut seen = HashSet::with_capacity(total_features);
    let mut records = Vec::with_capacity(total_features);
    for (index, (id, geometry)) in raw.features.into_iter().enumerate() {
        if (index + 1) % 1000 == 0 {
            debug!("Processing feature {}/{}", index + 1, total_features);
        }

        let id = id.ok_or_else(|| LoadError::MissingIdentifier {
            column: id_column.to_string(),
            index,
        })?;
        if !seen.insert(id.clone()) {
            return Err(LoadError::DuplicateIdentifier { id: id.0 });
        }

        let geometry = geometry.unwrap_or_else(|| {
            warn!("feature '{}' has no polygon geometry, it will be reported as empty", id);
            MultiPolygon(Vec::new())
        });
        records.push(FeatureRecord { id, geometry });
    }

    if !is_wgs84(&crs) {
        info!("Reprojecting {} features from {} to {}", records.len(), crs, TARGET_CRS);
        reproject(&mut records, &crs)?;
    }

    info!("Loaded {} features from {}", records.len(), path.display());
    Ok(records)
}

fn unreadable(path: &Path, reason: impl fmt::Display) -> LoadError {
    LoadError::UnreadableFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_geojson(path: &Path, id_column: &str) -> Result<RawFeatures, LoadError> {
    let file = File::open(path).map_err(|e| unreadable(path, e))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).map_err(|e| unreadable(path, e))?;

    let (features, foreign_members) = match geojson {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(feature) => {
            let foreign = feature.foreign_members.clone();
            (vec![feature], foreign)
        }
        GeoJson::Geometry(_) => {
            return Err(unreadable(
                path,
                "expected a Feature or FeatureCollection, found a bare geometry",
            ))
        }
    };

    Ok(RawFeatures {
        declared_crs: declared_crs(foreign_members.as_ref()),
        features: features
            .into_iter()
            .map(|feature| {
                let id = feature_id(&feature, id_column);
                let geometry = feature.geometry.and_then(|g| areal_geometry(g.value));
                (id, geometry)
            })
            .collect(),
    })
}

fn read_shapefile(path: &Path, id_column: &str) -> Result<RawFeatures, LoadError> {
    let mut reader = shapefile::Reader::from_path(path).map_err(|e| unreadable(path, e))?;

    let mut features = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item.map_err(|e| unreadable(path, e))?;
        let id = record.get(id_column).and_then(field_id);
        let geometry = match shape {
            Shape::Polygon(polygon) => Some(rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y))),
            Shape::PolygonM(polygon) => Some(rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y))),
            Shape::PolygonZ(polygon) => Some(rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y))),
            _ => None,
        };
        features.push((id, geometry));
    }

    let prj = path.with_extension("prj");
    let declared_crs = if prj.exists() {
        let wkt = fs::read_to_string(&prj).map_err(|e| unreadable(&prj, e))?;
        crs_from_prj(&wkt)
    } else {
        None
    };

    Ok(RawFeatures {
        features,
        declared_crs,
    })
}

fn feature_id(feature: &Feature, id_column: &str) -> Option<FeatureId> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get(id_column))
        .and_then(FeatureId::from_property)
}

fn number_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// dBase attribute as an identifier. Blank and null values count as missing.
fn field_id(value: &FieldValue) -> Option<FeatureId> {
    let text = match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            number_text(*n)
        }
        FieldValue::Float(Some(n)) => number_text(f64::from(*n)),
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Logical(Some(b)) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then(|| FeatureId(text))
}

/// Groups Shapefile rings into polygons: each outer ring starts a polygon and
/// the inner rings that follow it become its holes.
fn rings_to_multipolygon<P>(
    rings: &[PolygonRing<P>],
    xy: impl Fn(&P) -> (f64, f64),
) -> MultiPolygon<f64> {
    let line = |points: &[P]| -> LineString<f64> {
        LineString::new(points.iter().map(|p| xy(p).into()).collect())
    };

    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push((line(points), Vec::new())),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(line(points)),
                None => polygons.push((line(points), Vec::new())),
            },
        }
    }

    MultiPolygon(
        polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

fn ring(coords: &[Vec<f64>]) -> LineString<f64> {
    LineString::new(
        coords
            .iter()
            .filter(|coord| coord.len() >= 2)
            .map(|coord| (coord[0], coord[1]).into())
            .collect(),
    )
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let (exterior, holes) = rings.split_first()?;
    Some(Polygon::new(
        ring(exterior),
        holes.iter().map(|hole| ring(hole)).collect(),
    ))
}

fn areal_geometry(value: GeoJsonValue) -> Option<MultiPolygon<f64>> {
    match value {
        GeoJsonValue::Polygon(rings) => Some(MultiPolygon(polygon(&rings).into_iter().collect())),
        GeoJsonValue::MultiPolygon(polygons) => Some(MultiPolygon(
            polygons.iter().filter_map(|rings| polygon(rings)).collect(),
        )),
        _ => None,
    }
}

/// CRS named by the pre-RFC 7946 `crs` member, if any.
pub fn declared_crs(foreign_members: Option<&JsonObject>) -> Option<String> {
    foreign_members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(normalize_crs)
}

/// Turns `urn:ogc:def:crs:EPSG::31983` style names into `EPSG:31983`.
pub fn normalize_crs(name: &str) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("urn:ogc:def:crs:") {
        let parts: Vec<&str> = rest.split(':').filter(|p| !p.is_empty()).collect();
        if let (Some(authority), Some(code)) = (parts.first(), parts.last()) {
            return format!("{}:{}", authority.to_ascii_uppercase(), code.to_ascii_uppercase());
        }
    }
    trimmed.to_ascii_uppercase()
}

pub fn is_wgs84(crs: &str) -> bool {
    matches!(
        normalize_crs(crs).as_str(),
        "EPSG:4326" | "OGC:CRS84" | "CRS84" | "WGS84"
    )
}

/// CRS described by a `.prj` file: the EPSG authority of the root WKT node
/// when it carries one, EPSG:4326 for plain WGS84 geographic definitions,
/// otherwise the WKT itself for PROJ to interpret.
pub fn crs_from_prj(wkt: &str) -> Option<String> {
    let wkt = wkt.trim();
    if wkt.is_empty() {
        return None;
    }

    let upper = wkt.to_ascii_uppercase();
    if let Some(code) = root_epsg_code(&upper) {
        return Some(format!("EPSG:{}", code));
    }

    let geographic = upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS");
    if geographic && (upper.contains("WGS_1984") || upper.contains("WGS 84")) {
        return Some(TARGET_CRS.to_string());
    }
    Some(wkt.to_string())
}

/// EPSG code of an `AUTHORITY` (WKT1) or `ID` (WKT2) node sitting directly
/// under the root node. Nested datum or unit authorities are skipped.
fn root_epsg_code(upper_wkt: &str) -> Option<String> {
    let mut depth = 0usize;
    for (at, ch) in upper_wkt.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth != 1 {
            continue;
        }
        let rest = &upper_wkt[at + ch.len_utf8()..];
        let Some(args) = ["AUTHORITY[\"EPSG\",", "ID[\"EPSG\","]
            .iter()
            .find_map(|marker| rest.trim_start().strip_prefix(*marker))
        else {
            continue;
        };
        let code: String = args
            .trim_start_matches(|c: char| c == '"' || c.is_whitespace())
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !code.is_empty() {
            return Some(code);
        }
    }
    None
}

fn reproject(records: &mut [FeatureRecord], from: &str) -> Result<(), LoadError> {
    let failed = |reason: String| LoadError::Reprojection {
        from: from.to_string(),
        reason,
    };
    let transform = Proj::new_known_crs(from, TARGET_CRS, None).map_err(|e| failed(e.to_string()))?;

    for record in records.iter_mut() {
        record.geometry = record
            .geometry
            .try_map_coords(|c| {
                transform
                    .convert((c.x, c.y))
                    .map(|(x, y)| coord! { x: x, y: y })
            })
            .map_err(|e| failed(format!("feature '{}': {}", record.id, e)))?;
    }
    Ok(())
}
