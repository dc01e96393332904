//! Reshapes a grouped area reduction into long-format rows, one per class
//! present inside a feature.

use geo::Area;
use serde::Serialize;
use tracing::debug;

use crate::error::AggregateError;
use crate::legend::{label_for, ClassCode, ClassLabel};
use crate::loader::{FeatureId, FeatureRecord};
use crate::reducer::{ClassificationImage, GroupedAreaReducer};

pub const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

/// Reduction parameters forwarded to the compute service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionParams {
    /// Pixel edge in metres.
    pub scale: f64,
    pub max_pixels: u64,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            scale: 30.0,
            max_pixels: 10_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaRow {
    pub id: FeatureId,
    pub class_id: ClassCode,
    #[serde(serialize_with = "serialize_label")]
    pub class_name: ClassLabel,
    pub area_ha: f64,
}

fn serialize_label<S: serde::Serializer>(label: &ClassLabel, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(label.as_str())
}

pub struct AreaAggregator<'a> {
    reducer: &'a dyn GroupedAreaReducer,
    image: &'a ClassificationImage,
    params: ReductionParams,
}

impl<'a> AreaAggregator<'a> {
    pub fn new(
        reducer: &'a dyn GroupedAreaReducer,
        image: &'a ClassificationImage,
        params: ReductionParams,
    ) -> Self {
        Self {
            reducer,
            image,
            params,
        }
    }

    pub fn image(&self) -> &ClassificationImage {
        self.image
    }

    /// Area per class inside one feature, in hectares, ordered by class code.
    /// Classes with no pixel inside the feature produce no row.
    pub fn aggregate(&self, record: &FeatureRecord) -> Result<Vec<AreaRow>, AggregateError> {
        let geometry = &record.geometry;
        // Degenerate rings have zero area in any projection.
        if geometry.0.is_empty() || !(geometry.unsigned_area() > 0.0) {
            return Err(AggregateError::Geometry {
                id: record.id.to_string(),
            });
        }

        let groups = self.reducer.reduce_by_group(
            geometry,
            self.image,
            self.params.scale,
            self.params.max_pixels,
        )?;

        let mut rows = Vec::with_capacity(groups.len());
        for (code, square_metres) in groups {
            if !square_metres.is_finite() {
                return Err(AggregateError::InvalidArea { code });
            }
            rows.push(AreaRow {
                id: record.id.clone(),
                class_id: code,
                class_name: label_for(code),
                area_ha: square_metres / SQUARE_METRES_PER_HECTARE,
            });
        }

        debug!("feature '{}': {} classes", record.id, rows.len());
        Ok(rows)
    }
}
