//! Zonal reduction
//!
//! Reduces the cells of a raster layer that fall inside one zone to a single
//! observation: a scalar (`sum`, `mean`), a class histogram or a cumulative
//! distribution over fixed bins. Cells are weighted by their coverage
//! fraction; no-data cells carry no weight.

use crate::vector::coverage::{pixel_coverage, CoverageOptions, CoveragePolicy};
use crate::vector::validity::validate_multipolygon;
use geo::{BoundingRect, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use zonestats_core::crs::{self, CRS};
use zonestats_core::raster::Raster;
use zonestats_core::{Error, Result};

/// How layer values are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSemantics {
    #[default]
    Continuous,
    Categorical,
}

/// Requested reduction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionKind {
    Sum,
    Mean,
    Histogram,
    CumulativeDistribution { min: f64, max: f64, bins: usize },
}

impl ReductionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReductionKind::Sum => "sum",
            ReductionKind::Mean => "mean",
            ReductionKind::Histogram => "histogram",
            ReductionKind::CumulativeDistribution { .. } => "cumulative_distribution",
        }
    }

    /// Check the kind against the layer semantics.
    ///
    /// Categorical layers always reduce to a histogram; a histogram of a
    /// continuous layer is rejected.
    pub fn resolve(self, semantics: ValueSemantics) -> Result<Self> {
        match (semantics, self) {
            (ValueSemantics::Categorical, ReductionKind::Histogram) => Ok(self),
            (ValueSemantics::Categorical, other) => {
                debug!(requested = other.name(), "categorical layer reduced as histogram");
                Ok(ReductionKind::Histogram)
            }
            (ValueSemantics::Continuous, ReductionKind::Histogram) => {
                Err(Error::InvalidParameter {
                    name: "reduction",
                    value: "histogram".into(),
                    reason: "histogram needs a categorical layer".into(),
                })
            }
            (ValueSemantics::Continuous, ReductionKind::CumulativeDistribution { min, max, bins }) => {
                if bins == 0 || !(max > min) {
                    return Err(Error::InvalidParameter {
                        name: "cumulative_distribution",
                        value: format!("min={min} max={max} bins={bins}"),
                        reason: "need bins > 0 and max > min".into(),
                    });
                }
                Ok(self)
            }
            (ValueSemantics::Continuous, other) => Ok(other),
        }
    }
}

/// One bin of a cumulative distribution, `[lower, upper)` (last bin closed)
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionBin {
    pub lower: f64,
    pub upper: f64,
    /// Area-weighted cell count
    pub count: f64,
    pub percent: f64,
    pub cumulative_percent: f64,
}

/// Value of a reduction
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    /// Sum or mean over the valid cells
    Scalar(f64),
    /// Class code to area-weighted cell count
    Histogram(BTreeMap<i64, f64>),
    Distribution(Vec<DistributionBin>),
    /// The zone is empty
    Null,
}

impl ObservationValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ObservationValue::Null)
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ObservationValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

/// Options for [`reduce_zone`]
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    pub semantics: ValueSemantics,
    pub kind: ReductionKind,
    /// Values are per-area densities or masks; `sum` integrates over hectares
    pub areal: bool,
    pub coverage: CoverageOptions,
    /// Keep the zone window, masked to covered cells, in the result
    pub keep_window: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            semantics: ValueSemantics::Continuous,
            kind: ReductionKind::Sum,
            areal: false,
            coverage: CoverageOptions::default(),
            keep_window: false,
        }
    }
}

/// Outcome of reducing one zone
#[derive(Debug, Clone)]
pub struct Reduction {
    pub value: ObservationValue,
    /// Kind applied after semantics coercion
    pub kind: ReductionKind,
    /// Σ coverage weight of valid cells
    pub valid_weight: f64,
    /// Σ coverage weight of no-data cells
    pub nodata_weight: f64,
    /// Covered area of valid cells in hectares
    pub covered_ha: f64,
    /// Coverage policy applied, `None` for empty zones
    pub policy: Option<CoveragePolicy>,
    /// Layer values where the zone covers a cell, NaN elsewhere
    pub window: Option<Raster<f64>>,
}

impl Reduction {
    fn null(kind: ReductionKind) -> Self {
        Self {
            value: ObservationValue::Null,
            kind,
            valid_weight: 0.0,
            nodata_weight: 0.0,
            covered_ha: 0.0,
            policy: None,
            window: None,
        }
    }
}

enum Accumulator {
    Sum(f64),
    Mean { weighted: f64 },
    Histogram(BTreeMap<i64, f64>),
    Distribution { min: f64, max: f64, counts: Vec<f64> },
}

impl Accumulator {
    fn new(kind: ReductionKind) -> Self {
        match kind {
            ReductionKind::Sum => Accumulator::Sum(0.0),
            ReductionKind::Mean => Accumulator::Mean { weighted: 0.0 },
            ReductionKind::Histogram => Accumulator::Histogram(BTreeMap::new()),
            ReductionKind::CumulativeDistribution { min, max, bins } => Accumulator::Distribution {
                min,
                max,
                counts: vec![0.0; bins],
            },
        }
    }

    fn add(&mut self, value: f64, weight: f64, cell_ha: f64, areal: bool) {
        match self {
            Accumulator::Sum(acc) => {
                *acc += if areal {
                    value * weight * cell_ha
                } else {
                    value * weight
                };
            }
            Accumulator::Mean { weighted } => *weighted += value * weight,
            Accumulator::Histogram(classes) => {
                *classes.entry(value.round() as i64).or_insert(0.0) += weight;
            }
            Accumulator::Distribution { min, max, counts } => {
                if value < *min || value > *max {
                    return;
                }
                let bins = counts.len();
                let width = (*max - *min) / bins as f64;
                let idx = (((value - *min) / width) as usize).min(bins - 1);
                counts[idx] += weight;
            }
        }
    }

    fn finish(self, valid_weight: f64) -> ObservationValue {
        match self {
            Accumulator::Sum(acc) => ObservationValue::Scalar(acc),
            Accumulator::Mean { weighted } => ObservationValue::Scalar(if valid_weight > 0.0 {
                weighted / valid_weight
            } else {
                f64::NAN
            }),
            Accumulator::Histogram(classes) => ObservationValue::Histogram(classes),
            Accumulator::Distribution { min, max, counts } => {
                let total: f64 = counts.iter().sum();
                let width = (max - min) / counts.len() as f64;
                let mut cumulative = 0.0;
                let bins = counts
                    .into_iter()
                    .enumerate()
                    .map(|(i, count)| {
                        let percent = if total > 0.0 { 100.0 * count / total } else { 0.0 };
                        cumulative += percent;
                        DistributionBin {
                            lower: min + i as f64 * width,
                            upper: min + (i + 1) as f64 * width,
                            count,
                            percent,
                            cumulative_percent: cumulative,
                        }
                    })
                    .collect();
                ObservationValue::Distribution(bins)
            }
        }
    }
}

/// Reduce `raster` over `zone`.
///
/// The zone is projected into the raster CRS when they differ. An empty zone
/// yields [`ObservationValue::Null`] without touching the raster. Fails with
/// [`Error::Reduction`] for invalid zone geometry and with [`Error::DataGap`]
/// (without dataset/period, see [`Error::with_gap_context`]) when the raster
/// does not overlap the zone extent or holds no valid pixel inside the zone.
pub fn reduce_zone(
    zone: &MultiPolygon<f64>,
    zone_crs: &CRS,
    raster: &Raster<f64>,
    options: &ReduceOptions,
) -> Result<Reduction> {
    let kind = options.kind.resolve(options.semantics)?;

    if zone.0.is_empty() {
        return Ok(Reduction::null(kind));
    }

    validate_multipolygon(zone)
        .map_err(|reason| Error::Reduction(format!("invalid zone geometry: {}", reason)))?;

    let geom = match raster.crs() {
        Some(raster_crs) if !raster_crs.is_equivalent(zone_crs) => {
            crs::transform_multipolygon(zone, zone_crs, raster_crs)
                .map_err(|e| Error::Reduction(format!("cannot project zone: {}", e)))?
        }
        _ => zone.clone(),
    };

    let Some(rect) = geom.bounding_rect() else {
        return Ok(Reduction::null(kind));
    };

    let window = raster
        .crop(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
        .ok_or_else(|| Error::DataGap {
            dataset: String::new(),
            period: String::new(),
        })?;

    let (rows, cols) = window.shape();
    let coverage = pixel_coverage(&geom, window.transform(), rows, cols, &options.coverage);

    let mut acc = Accumulator::new(kind);
    let mut valid_weight = 0.0;
    let mut nodata_weight = 0.0;
    let mut covered_ha = 0.0;

    for (row, col, weight) in coverage.cells() {
        match window.value_at(row, col) {
            Some(value) => {
                let cell_ha = window.cell_area_m2(row) / 10_000.0;
                acc.add(value, weight, cell_ha, options.areal);
                valid_weight += weight;
                covered_ha += weight * cell_ha;
            }
            None => nodata_weight += weight,
        }
    }

    // A zone that sees only no-data was not measured.
    if valid_weight <= 0.0 {
        debug!(nodata_weight, "zone covers no valid pixel");
        return Err(Error::DataGap {
            dataset: String::new(),
            period: String::new(),
        });
    }

    debug!(
        kind = kind.name(),
        policy = ?coverage.policy,
        zone_pixels = coverage.zone_pixels,
        valid_weight,
        nodata_weight,
        "reduced zone"
    );

    let masked = options.keep_window.then(|| {
        let mut masked = window.clone();
        ndarray::Zip::from(masked.data_mut())
            .and(&coverage.weights)
            .for_each(|v, &w| {
                if w <= 0.0 {
                    *v = f64::NAN;
                }
            });
        masked.set_nodata(Some(f64::NAN));
        masked
    });

    Ok(Reduction {
        value: acc.finish(valid_weight),
        kind,
        valid_weight,
        nodata_weight,
        covered_ha,
        policy: Some(coverage.policy),
        window: masked,
    })
}
