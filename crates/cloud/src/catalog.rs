//! Layer catalog: logical layers, time slices and concrete datasets.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use zonestats_algorithms::statistics::ValueSemantics;

use crate::error::{CloudError, Result};

/// How often a layer has a new value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalResolution {
    #[default]
    Annual,
    Seasonal,
    Static,
}

/// Meteorological season
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Season {
    DJF,
    MAM,
    JJA,
    SON,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::DJF => "DJF",
            Season::MAM => "MAM",
            Season::JJA => "JJA",
            Season::SON => "SON",
        }
    }
}

impl FromStr for Season {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DJF" => Ok(Season::DJF),
            "MAM" => Ok(Season::MAM),
            "JJA" => Ok(Season::JJA),
            "SON" => Ok(Season::SON),
            other => Err(CloudError::Catalog(format!("unknown season '{}'", other))),
        }
    }
}

/// Period an observation refers to.
///
/// Labels: `2015`, `2015-JJA`, `2015-01-01/2015-06-30`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeSlice {
    Year(i32),
    Season { year: i32, season: Season },
    Range { start: NaiveDate, end: NaiveDate },
}

impl TimeSlice {
    /// Stable label used in result keys and exports
    pub fn label(&self) -> String {
        match self {
            TimeSlice::Year(y) => y.to_string(),
            TimeSlice::Season { year, season } => format!("{}-{}", year, season.as_str()),
            TimeSlice::Range { start, end } => format!("{}/{}", start, end),
        }
    }

    /// First and last calendar year touched by the slice
    pub fn years(&self) -> (i32, i32) {
        match self {
            TimeSlice::Year(y) => (*y, *y),
            TimeSlice::Season { year, .. } => (*year, *year),
            TimeSlice::Range { start, end } => (start.year(), end.year()),
        }
    }

    /// Year used to pick an annual raster
    pub fn year(&self) -> i32 {
        self.years().0
    }

    pub fn is_seasonal(&self) -> bool {
        matches!(self, TimeSlice::Season { .. })
    }
}

impl fmt::Display for TimeSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for TimeSlice {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = |why: &str| CloudError::Catalog(format!("invalid time slice '{}': {}", s, why));

        if let Some((a, b)) = s.split_once('/') {
            let start = NaiveDate::parse_from_str(a.trim(), "%Y-%m-%d").map_err(|e| bad(&e.to_string()))?;
            let end = NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d").map_err(|e| bad(&e.to_string()))?;
            if end < start {
                return Err(bad("end before start"));
            }
            return Ok(TimeSlice::Range { start, end });
        }
        if let Some((y, season)) = s.split_once('-') {
            let year = y.parse::<i32>().map_err(|_| bad("bad year"))?;
            return Ok(TimeSlice::Season {
                year,
                season: season.parse()?,
            });
        }
        s.parse::<i32>().map(TimeSlice::Year).map_err(|_| bad("bad year"))
    }
}

impl TryFrom<String> for TimeSlice {
    type Error = CloudError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeSlice> for String {
    fn from(slice: TimeSlice) -> Self {
        slice.label()
    }
}

/// A logical layer, independent of where its data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    /// Upstream product identifier
    pub source: String,
    #[serde(default)]
    pub temporal: TemporalResolution,
    #[serde(default)]
    pub semantics: ValueSemantics,
    #[serde(default)]
    pub unit: String,
    /// Values are per-area densities or 0/1 masks
    #[serde(default)]
    pub areal: bool,
    /// Class code to name, for categorical layers
    #[serde(default)]
    pub classes: BTreeMap<i64, String>,
    /// Class codes count years after this base (GFW `lossyear`: 1 is 2001);
    /// code 0 means no event
    #[serde(default)]
    pub year_base: Option<i32>,
}

impl LayerSpec {
    pub fn class_name(&self, code: i64) -> Option<&str> {
        self.classes.get(&code).map(String::as_str)
    }

    /// Calendar year of a year-coded class, `None` for code 0 or layers
    /// that are not year-coded.
    pub fn class_year(&self, code: i64) -> Option<i32> {
        let base = self.year_base?;
        (code > 0).then(|| base + code as i32)
    }
}

/// Set of known layers
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    layers: BTreeMap<String, LayerSpec>,
}

impl LayerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers used by the conservation project reports.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(LayerSpec {
            name: "GFW_tree_loss".into(),
            source: "UMD/hansen/global_forest_change_2023_v1_11".into(),
            temporal: TemporalResolution::Annual,
            semantics: ValueSemantics::Continuous,
            unit: "ha".into(),
            areal: true,
            classes: BTreeMap::new(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "ESA_CCI_AGB".into(),
            source: "ESA CCI Biomass L4 AGB merged 100m".into(),
            temporal: TemporalResolution::Annual,
            semantics: ValueSemantics::Continuous,
            unit: "Mg/ha".into(),
            areal: false,
            classes: BTreeMap::new(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "ETH_canopy_height".into(),
            source: "ETH Global Canopy Height 2020 10m".into(),
            temporal: TemporalResolution::Static,
            semantics: ValueSemantics::Continuous,
            unit: "m".into(),
            areal: false,
            classes: BTreeMap::new(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "GMW_mangrove".into(),
            source: "Global Mangrove Watch extent".into(),
            temporal: TemporalResolution::Annual,
            semantics: ValueSemantics::Continuous,
            unit: "ha".into(),
            areal: true,
            classes: BTreeMap::new(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "NDVI".into(),
            source: "Sentinel-2 NDVI composite".into(),
            temporal: TemporalResolution::Seasonal,
            semantics: ValueSemantics::Continuous,
            unit: "".into(),
            areal: false,
            classes: BTreeMap::new(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "ESA_WorldCover".into(),
            source: "ESA/WorldCover/v100".into(),
            temporal: TemporalResolution::Static,
            semantics: ValueSemantics::Categorical,
            unit: "ha".into(),
            areal: true,
            classes: worldcover_classes(),
            year_base: None,
        });
        catalog.insert(LayerSpec {
            name: "GFW_loss_year".into(),
            source: "UMD/hansen/global_forest_change_2023_v1_11 lossyear".into(),
            temporal: TemporalResolution::Static,
            semantics: ValueSemantics::Categorical,
            unit: "ha".into(),
            areal: true,
            classes: BTreeMap::new(),
            year_base: Some(2000),
        });
        catalog
    }

    /// Load layer definitions from a JSON array of [`LayerSpec`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let specs: Vec<LayerSpec> = serde_json::from_str(&text)
            .map_err(|e| CloudError::Catalog(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut catalog = Self::new();
        for spec in specs {
            catalog.insert(spec);
        }
        Ok(catalog)
    }

    /// Add or replace a layer
    pub fn insert(&mut self, spec: LayerSpec) {
        self.layers.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.get(name)
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.values()
    }

    /// Merge another catalog into this one; `other` wins on name clashes
    pub fn extend(&mut self, other: LayerCatalog) {
        self.layers.extend(other.layers);
    }
}

/// ESA WorldCover v100 class table
pub fn worldcover_classes() -> BTreeMap<i64, String> {
    [
        (10, "Tree Cover"),
        (20, "Shrubland"),
        (30, "Grassland"),
        (40, "Cropland"),
        (50, "Built-up"),
        (60, "Bare/sparse vegetation"),
        (70, "Snow and ice"),
        (80, "Permanent water bodies"),
        (90, "Herbaceous wetland"),
        (95, "Mangroves"),
        (100, "Moss and lichen"),
    ]
    .into_iter()
    .map(|(code, name)| (code, name.to_string()))
    .collect()
}

/// A concrete dataset offered by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    /// Logical layer this dataset provides
    pub layer: String,
    /// Name of the backend serving it
    pub backend: String,
    /// Native resolution in metres
    pub resolution_m: f64,
    /// First and last covered year; `None` means any year
    #[serde(default)]
    pub years: Option<(i32, i32)>,
    #[serde(default)]
    pub temporal: TemporalResolution,
    /// Implicit default when several datasets tie
    #[serde(default)]
    pub default: bool,
}

impl DatasetInfo {
    /// Whether this dataset has data for the whole slice.
    pub fn covers(&self, slice: &TimeSlice) -> bool {
        if slice.is_seasonal() && self.temporal == TemporalResolution::Annual {
            return false;
        }
        match (self.temporal, self.years) {
            (TemporalResolution::Static, _) | (_, None) => true,
            (_, Some((first, last))) => {
                let (a, b) = slice.years();
                a >= first && b <= last
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_labels_roundtrip() {
        for label in ["2015", "2015-JJA", "2018-01-01/2018-06-30"] {
            let slice: TimeSlice = label.parse().unwrap();
            assert_eq!(slice.label(), label);
        }
    }

    #[test]
    fn test_slice_parse_errors() {
        assert!("20x5".parse::<TimeSlice>().is_err());
        assert!("2015-XYZ".parse::<TimeSlice>().is_err());
        assert!("2018-06-30/2018-01-01".parse::<TimeSlice>().is_err());
    }

    #[test]
    fn test_slice_years() {
        let range: TimeSlice = "2017-11-01/2018-02-28".parse().unwrap();
        assert_eq!(range.years(), (2017, 2018));
        assert_eq!(range.year(), 2017);
    }

    fn dataset(years: Option<(i32, i32)>, temporal: TemporalResolution) -> DatasetInfo {
        DatasetInfo {
            id: "d".into(),
            layer: "L".into(),
            backend: "b".into(),
            resolution_m: 100.0,
            years,
            temporal,
            default: false,
        }
    }

    #[test]
    fn test_dataset_coverage() {
        let annual = dataset(Some((2010, 2021)), TemporalResolution::Annual);
        assert!(annual.covers(&TimeSlice::Year(2015)));
        assert!(!annual.covers(&TimeSlice::Year(2022)));
        assert!(!annual.covers(&"2015-JJA".parse().unwrap()));
        assert!(!annual.covers(&"2021-06-01/2022-01-31".parse().unwrap()));

        let seasonal = dataset(Some((2017, 2024)), TemporalResolution::Seasonal);
        assert!(seasonal.covers(&"2019-DJF".parse().unwrap()));

        let fixed = dataset(Some((2020, 2020)), TemporalResolution::Static);
        assert!(fixed.covers(&TimeSlice::Year(1999)));
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = LayerCatalog::builtin();
        let wc = catalog.get("ESA_WorldCover").unwrap();
        assert_eq!(wc.semantics, ValueSemantics::Categorical);
        assert_eq!(wc.class_name(95), Some("Mangroves"));
        assert!(catalog.get("GFW_tree_loss").unwrap().areal);

        let loss_year = catalog.get("GFW_loss_year").unwrap();
        assert_eq!(loss_year.class_year(19), Some(2019));
        assert_eq!(loss_year.class_year(0), None);
        assert_eq!(wc.class_year(10), None);
    }

    #[test]
    fn test_layer_spec_json() {
        let json = r#"[{"name": "SOC", "source": "soilgrids", "unit": "t/ha"}]"#;
        let specs: Vec<LayerSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs[0].temporal, TemporalResolution::Annual);
        assert_eq!(specs[0].semantics, ValueSemantics::Continuous);
        assert!(specs[0].classes.is_empty());
        assert_eq!(specs[0].year_base, None);
    }
}
