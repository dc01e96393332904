//! Static legend for the land-cover classification product.
//!
//! Every label has the form `"N. GROUP / Subclass"` so that consumers of the
//! exported table can split on `" / "` and recover both legend levels.

use std::fmt;

/// Integer class code as stored in the classification raster.
pub type ClassCode = u16;

/// Label returned for any code the legend does not know about.
pub const UNKNOWN_CLASS: &str = "Unknown Class Code";

const SEPARATOR: &str = " / ";

// Sorted by code so lookups can binary search.
const LEGEND: &[(ClassCode, &str)] = &[
    (1, "1. FOREST / (Level 1)"),
    (3, "1. FOREST / Forest Formation"),
    (4, "1. FOREST / Savanna Formation"),
    (5, "1. FOREST / Mangrove"),
    (6, "1. FOREST / Floodable Forest"),
    (9, "3. AGRICULTURE AND LIVESTOCK / Forest Plantation (Level 2)"),
    (10, "2. HERBACEOUS AND SHRUB VEGETATION / (Level 1)"),
    (11, "2. HERBACEOUS AND SHRUB VEGETATION / Wetland"),
    (12, "2. HERBACEOUS AND SHRUB VEGETATION / Grassland"),
    (14, "3. AGRICULTURE AND LIVESTOCK / (Level 1)"),
    (15, "3. AGRICULTURE AND LIVESTOCK / Pasture (Level 2)"),
    (18, "3. AGRICULTURE AND LIVESTOCK / Agriculture (Level 2)"),
    (19, "3. AGRICULTURE AND LIVESTOCK / Temporary Crop (Level 3)"),
    (20, "3. AGRICULTURE AND LIVESTOCK / Sugar Cane"),
    (21, "3. AGRICULTURE AND LIVESTOCK / Mosaic of Uses (Level 2)"),
    (22, "4. NON-VEGETATED AREA / (Level 1)"),
    (23, "4. NON-VEGETATED AREA / Beach, Dune and Sand Spot"),
    (24, "4. NON-VEGETATED AREA / Urban Area"),
    (25, "4. NON-VEGETATED AREA / Other Non-Vegetated Areas"),
    (27, "6. OTHER / Not Observed"),
    (29, "2. HERBACEOUS AND SHRUB VEGETATION / Rocky Outcrop"),
    (30, "4. NON-VEGETATED AREA / Mining"),
    (31, "5. WATER BODY / Aquaculture"),
    (32, "2. HERBACEOUS AND SHRUB VEGETATION / Hypersaline Tidal Flat"),
    (33, "5. WATER BODY / River, Lake and Ocean"),
    (35, "3. AGRICULTURE AND LIVESTOCK / Palm Oil"),
    (36, "3. AGRICULTURE AND LIVESTOCK / Perennial Crop (Level 3)"),
    (39, "3. AGRICULTURE AND LIVESTOCK / Soybean"),
    (40, "3. AGRICULTURE AND LIVESTOCK / Rice"),
    (41, "3. AGRICULTURE AND LIVESTOCK / Other Temporary Crops"),
    (46, "3. AGRICULTURE AND LIVESTOCK / Coffee"),
    (47, "3. AGRICULTURE AND LIVESTOCK / Citrus"),
    (48, "3. AGRICULTURE AND LIVESTOCK / Other Perennial Crops"),
    (49, "1. FOREST / Wooded Sandbank Vegetation"),
    (50, "2. HERBACEOUS AND SHRUB VEGETATION / Herbaceous Sandbank Vegetation"),
    (62, "3. AGRICULTURE AND LIVESTOCK / Cotton"),
    (75, "4. NON-VEGETATED AREA / Photovoltaic Power Plant"),
];

/// Human readable, two-level class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassLabel(&'static str);

impl ClassLabel {
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Top-level group, e.g. `"1. FOREST"`. The sentinel label is its own group.
    pub fn group(&self) -> &'static str {
        self.0.split_once(SEPARATOR).map_or(self.0, |(group, _)| group)
    }

    /// Detailed class name, empty for the sentinel label.
    pub fn subclass(&self) -> &'static str {
        self.0.split_once(SEPARATOR).map_or("", |(_, subclass)| subclass)
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_CLASS
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Looks up the label for `code`. Never fails: codes missing from the legend
/// resolve to [`UNKNOWN_CLASS`].
pub fn label_for(code: ClassCode) -> ClassLabel {
    match LEGEND.binary_search_by_key(&code, |(c, _)| *c) {
        Ok(idx) => ClassLabel(LEGEND[idx].1),
        Err(_) => {
            tracing::debug!("class code {} is not in the legend", code);
            ClassLabel(UNKNOWN_CLASS)
        }
    }
}

/// All known codes with their labels, ascending by code.
pub fn entries() -> impl Iterator<Item = (ClassCode, ClassLabel)> {
    LEGEND.iter().map(|(code, label)| (*code, ClassLabel(label)))
}
