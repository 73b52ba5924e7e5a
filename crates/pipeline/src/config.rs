//! Pipeline configuration (TOML).
//!
//! ```toml
//! project_year = 2020
//! years_before = 5
//! layers = ["GFW_tree_loss", "ESA_CCI_AGB"]
//!
//! [zones]
//! PA = "identity"
//! AA = { buffer = { distance = 500.0, direction = "outward" } }
//!
//! [reduction]
//! GFW_tree_loss = "sum"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zonestats_algorithms::statistics::{ReductionKind, ValueSemantics};
use zonestats_algorithms::vector::{CoverageOptions, ZoneRule};
use zonestats_cloud::auth::BearerToken;
use zonestats_cloud::{
    DatasetInfo, LayerCatalog, LayerResolver, LayerSpec, MemoryBackend, RetryPolicy, Session,
    TemporalResolution, TileBackend, TileBackendConfig, TimeSlice,
};
use zonestats_core::vector::{AttributeValue, LoaderOptions};
use zonestats_core::{Boundary, Error, Result};

/// Inclusive range of calendar years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

/// Concurrency settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Evaluate (layer, slice) combinations on the rayon pool
    pub parallel: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// Local GeoTIFFs served as one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    pub name: String,
    pub dataset: String,
    pub layer: String,
    pub resolution_m: f64,
    #[serde(default)]
    pub years: Option<(i32, i32)>,
    #[serde(default)]
    pub temporal: TemporalResolution,
    #[serde(default)]
    pub default: bool,
    /// Slice label (or `static`) to GeoTIFF path
    pub rasters: BTreeMap<String, PathBuf>,
}

/// A configured layer backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Tiles(TileBackendConfig),
    Local(LocalBackendConfig),
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project start year; boundaries may override it with a `project_year`
    /// or `year` property
    pub project_year: Option<i32>,
    /// Years before the project year included when no slices are listed
    pub years_before: u32,
    /// Explicit slices, e.g. `"2015"`, `"2017-JJA"`, `"2018-01-01/2018-06-30"`
    pub time_slices: Vec<TimeSlice>,
    pub years: Option<YearRange>,
    pub layers: Vec<String>,
    /// Layer name to dataset id
    pub pinned_dataset: HashMap<String, String>,
    /// Zone name to rule, in output order
    pub zones: IndexMap<String, ZoneRule>,
    /// Per-layer reduction; unlisted layers use their default
    pub reduction: HashMap<String, ReductionKind>,
    pub coverage: CoverageOptions,
    pub retry: RetryPolicy,
    pub loader: LoaderOptions,
    pub concurrency: ConcurrencyConfig,
    pub backends: Vec<BackendConfig>,
    /// Extra layer definitions (JSON array of layer specs)
    pub catalog: Option<PathBuf>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Environment variable holding a bearer token for remote archives
    pub auth_token_env: Option<String>,
    /// Write the covered window of every observation as GeoTIFF
    pub export_rasters: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut zones = IndexMap::new();
        zones.insert("PA".to_string(), ZoneRule::Identity);
        Self {
            project_year: None,
            years_before: 5,
            time_slices: Vec::new(),
            years: None,
            layers: Vec::new(),
            pinned_dataset: HashMap::new(),
            zones,
            reduction: HashMap::new(),
            coverage: CoverageOptions::default(),
            retry: RetryPolicy::default(),
            loader: LoaderOptions::default(),
            concurrency: ConcurrencyConfig::default(),
            backends: Vec::new(),
            catalog: None,
            timeout_secs: 300,
            auth_token_env: None,
            export_rasters: false,
        }
    }
}

fn config_error(value: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::InvalidParameter {
        name: "config",
        value: value.into(),
        reason: reason.into(),
    }
}

impl PipelineConfig {
    /// Load a TOML file. Relative paths inside it are taken relative to the
    /// file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)
            .map_err(|e| config_error(path.display().to_string(), e.to_string()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| config_error("toml", e.to_string()))
    }

    fn rebase(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(catalog) = self.catalog.as_mut() {
            fix(catalog);
        }
        for backend in &mut self.backends {
            match backend {
                BackendConfig::Tiles(tiles) => {
                    if let Some(dir) = tiles.cache_dir.as_mut() {
                        fix(dir);
                    }
                }
                BackendConfig::Local(local) => local.rasters.values_mut().for_each(fix),
            }
        }
    }

    /// Layer catalog: the built-in layers plus the configured extras.
    pub fn layer_catalog(&self) -> Result<LayerCatalog> {
        let mut catalog = LayerCatalog::builtin();
        if let Some(path) = &self.catalog {
            catalog.extend(LayerCatalog::from_json_file(path).map_err(Error::from)?);
        }
        Ok(catalog)
    }

    /// Check what can be checked before touching any data.
    ///
    /// Unknown layers are not an error here; they surface as
    /// `LayerNotFound` rows.
    pub fn validate(&self, catalog: &LayerCatalog) -> Result<()> {
        if self.zones.is_empty() {
            return Err(config_error("zones", "at least one zone is required"));
        }
        if self.layers.is_empty() {
            return Err(config_error("layers", "at least one layer is required"));
        }
        if let Some(range) = self.years {
            if range.end < range.start {
                return Err(config_error(
                    format!("{}..{}", range.start, range.end),
                    "year range ends before it starts",
                ));
            }
        }
        for layer in &self.layers {
            if let (Some(spec), Some(kind)) = (catalog.get(layer), self.reduction.get(layer)) {
                kind.resolve(spec.semantics)?;
            }
        }
        Ok(())
    }

    /// Reduction for a layer: configured, else histogram for categorical
    /// layers, sum for areal ones and mean otherwise.
    pub fn reduction_for(&self, spec: &LayerSpec) -> ReductionKind {
        if let Some(kind) = self.reduction.get(&spec.name) {
            return *kind;
        }
        match (spec.semantics, spec.areal) {
            (ValueSemantics::Categorical, _) => ReductionKind::Histogram,
            (ValueSemantics::Continuous, true) => ReductionKind::Sum,
            (ValueSemantics::Continuous, false) => ReductionKind::Mean,
        }
    }

    /// Time slices requested for a project.
    ///
    /// Explicit `time_slices` win, then `years`, then the
    /// `years_before` years leading up to the project year.
    pub fn slices(&self, project_year: Option<i32>) -> Result<Vec<TimeSlice>> {
        if !self.time_slices.is_empty() {
            return Ok(self.time_slices.clone());
        }
        if let Some(range) = self.years {
            return Ok((range.start..=range.end).map(TimeSlice::Year).collect());
        }
        match project_year.or(self.project_year) {
            Some(year) => {
                let start = year - self.years_before as i32;
                Ok((start..=year).map(TimeSlice::Year).collect())
            }
            None => Err(config_error(
                "time_slices",
                "no time slices, year range or project year given",
            )),
        }
    }

    pub fn session(&self) -> Result<Session> {
        let mut session = Session::new()
            .with_retry(self.retry)
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)));
        if let Some(var) = &self.auth_token_env {
            session = session.with_auth(BearerToken::from_env(var).map_err(Error::from)?);
        }
        Ok(session)
    }

    /// Instantiate the configured backends and pins.
    pub fn build_resolver(&self) -> Result<LayerResolver> {
        let mut resolver = LayerResolver::new(self.layer_catalog()?);
        for backend in &self.backends {
            match backend {
                BackendConfig::Tiles(cfg) => {
                    let tiles = TileBackend::new(cfg.clone()).map_err(Error::from)?;
                    resolver.add_backend(Arc::new(tiles));
                }
                BackendConfig::Local(cfg) => resolver.add_backend(Arc::new(local_backend(cfg)?)),
            }
            debug!(?backend, "registered backend");
        }
        for (layer, dataset) in &self.pinned_dataset {
            resolver.pin(layer.clone(), dataset.clone());
        }
        Ok(resolver)
    }
}

fn local_backend(cfg: &LocalBackendConfig) -> Result<MemoryBackend> {
    let mut backend = MemoryBackend::new(cfg.name.clone()).with_dataset(DatasetInfo {
        id: cfg.dataset.clone(),
        layer: cfg.layer.clone(),
        backend: cfg.name.clone(),
        resolution_m: cfg.resolution_m,
        years: cfg.years,
        temporal: cfg.temporal,
        default: cfg.default,
    });
    for (label, path) in &cfg.rasters {
        let slice = if label == "static" {
            None
        } else {
            Some(label.parse::<TimeSlice>().map_err(Error::from)?)
        };
        backend
            .load_geotiff(&cfg.dataset, slice, path)
            .map_err(Error::from)?;
    }
    Ok(backend)
}

/// Project year recorded on a boundary (`project_year` or `year` property).
pub fn boundary_year(boundary: &Boundary) -> Option<i32> {
    ["project_year", "year"]
        .iter()
        .find_map(|key| match boundary.get_property(key)? {
            AttributeValue::Int(y) => i32::try_from(*y).ok(),
            AttributeValue::Float(y) if y.fract() == 0.0 => Some(*y as i32),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}
