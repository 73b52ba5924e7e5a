//! Zone-level figures derived from a finished run.
//!
//! - `class_percent`: share of each class in a categorical histogram.
//! - `annual_loss`: hectares per event year of a year-coded layer.
//! - `percent_of_zone`: hectares of an areal layer relative to the zone
//!   area. For tree loss this is the yearly deforestation rate.

use crate::run::ProjectRun;
use std::collections::HashMap;
use tracing::debug;
use zonestats_algorithms::statistics::{ObservationValue, ReductionKind};
use zonestats_algorithms::vector::area_ha;
use zonestats_cloud::LayerCatalog;
use zonestats_core::Result;

/// One derived figure
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    pub project: String,
    pub zone: String,
    pub layer: String,
    /// Slice label, or the event year for year-coded layers
    pub period: String,
    pub metric: &'static str,
    pub class: Option<i64>,
    /// Class name when the catalog knows one
    pub label: String,
    pub value: f64,
    pub unit: &'static str,
}

/// Derive class shares, annual loss and area percentages for every
/// computed observation of `run`.
pub fn derive(run: &ProjectRun, catalog: &LayerCatalog) -> Result<Vec<DerivedRow>> {
    let mut zone_ha: HashMap<&str, f64> = HashMap::new();
    for zone in &run.zones {
        let ha = if zone.is_empty() {
            0.0
        } else {
            area_ha(&zone.geometry, &zone.crs)?
        };
        zone_ha.insert(zone.name.as_str(), ha);
    }

    let mut rows = Vec::new();
    for (key, obs) in run.table.observations() {
        let Some(spec) = catalog.get(&key.layer) else {
            continue;
        };
        let area = zone_ha.get(key.zone.as_str()).copied().unwrap_or(0.0);
        let row = |period: String, metric: &'static str, class: Option<i64>, value: f64, unit: &'static str| {
            DerivedRow {
                project: key.project.clone(),
                zone: key.zone.clone(),
                layer: key.layer.clone(),
                period,
                metric,
                class,
                label: class
                    .and_then(|c| spec.class_name(c))
                    .unwrap_or_default()
                    .to_string(),
                value,
                unit,
            }
        };

        match &obs.value {
            ObservationValue::Histogram(classes) if spec.year_base.is_some() => {
                // Pixel weights to hectares at the zone's mean cell size.
                let ha_per_weight = if obs.valid_weight > 0.0 {
                    obs.covered_ha / obs.valid_weight
                } else {
                    0.0
                };
                for (&code, &weight) in classes {
                    let Some(year) = spec.class_year(code) else {
                        continue;
                    };
                    let ha = weight * ha_per_weight;
                    rows.push(row(year.to_string(), "annual_loss", Some(code), ha, "ha"));
                    if area > 0.0 {
                        rows.push(row(year.to_string(), "percent_of_zone", Some(code), 100.0 * ha / area, "%"));
                    }
                }
            }
            ObservationValue::Histogram(classes) => {
                let total: f64 = classes.values().sum();
                if total <= 0.0 {
                    continue;
                }
                for (&code, &weight) in classes {
                    rows.push(row(key.period.clone(), "class_percent", Some(code), 100.0 * weight / total, "%"));
                }
            }
            ObservationValue::Scalar(ha) if spec.areal && obs.statistic == ReductionKind::Sum && area > 0.0 => {
                rows.push(row(key.period.clone(), "percent_of_zone", None, 100.0 * ha / area, "%"));
            }
            _ => {}
        }
    }
    debug!(project = %run.project, rows = rows.len(), "derived figures");
    Ok(rows)
}
