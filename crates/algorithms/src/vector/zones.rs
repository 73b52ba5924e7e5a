//! Analysis zone generation
//!
//! Derives the zones of a project from its boundary: the boundary itself,
//! outward rings (adjacent areas), inward buffers and distance bands.
//! Distances are metres, measured in the UTM zone of the boundary centroid;
//! results are returned in the boundary CRS.

use crate::vector::validity::validate_multipolygon;
use geo::{Area, BooleanOps, Buffer, MultiPolygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zonestats_core::crs::{self, CRS};
use zonestats_core::{Boundary, Result};

/// Parts smaller than this (m²) are dropped from derived zones.
const SLIVER_AREA_M2: f64 = 0.01;

/// Side of the boundary a buffer grows towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferDirection {
    #[default]
    Outward,
    Inward,
}

/// How a zone is derived from the project boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRule {
    /// The boundary itself
    Identity,
    /// Outward: the ring `buffer(P, d) \ P`. Inward: `buffer(P, -d)`.
    /// A negative distance flips the direction.
    Buffer {
        distance: f64,
        #[serde(default)]
        direction: BufferDirection,
    },
    /// Annulus between two distances from the boundary
    Band {
        #[serde(default)]
        min_dist: f64,
        max_dist: f64,
    },
}

impl ZoneRule {
    /// Short description used in logs and the `zones` report
    pub fn describe(&self) -> String {
        match self {
            ZoneRule::Identity => "identity".to_string(),
            ZoneRule::Buffer {
                distance,
                direction,
            } => format!("buffer {:?} {} m", direction, distance).to_lowercase(),
            ZoneRule::Band { min_dist, max_dist } => format!("band {}-{} m", min_dist, max_dist),
        }
    }
}

/// A named analysis zone in the CRS of its project boundary.
///
/// An empty geometry is a legal zone; reducing it yields a null observation.
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub crs: CRS,
    pub rule: ZoneRule,
}

impl Zone {
    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }
}

/// Derive one zone from a boundary.
pub fn generate_zone(boundary: &Boundary, name: &str, rule: &ZoneRule) -> Result<Zone> {
    let geometry = match rule {
        ZoneRule::Identity => boundary.geometry.clone(),
        _ => {
            let zone = crs::projected_zone_for(&boundary.geometry, &boundary.crs)?;
            let utm = CRS::from_epsg(zone.epsg());
            let projected = crs::transform_multipolygon(&boundary.geometry, &boundary.crs, &utm)?;

            let derived = clean(derive_projected(&projected, rule));
            let derived = match validate_multipolygon(&derived) {
                Ok(()) => derived,
                Err(reason) => {
                    warn!(zone = name, %reason, "derived zone is invalid, using empty zone");
                    MultiPolygon::new(vec![])
                }
            };
            crs::transform_multipolygon(&derived, &utm, &boundary.crs)?
        }
    };

    debug!(
        project = %boundary.id,
        zone = name,
        rule = %rule.describe(),
        parts = geometry.0.len(),
        "generated zone"
    );

    Ok(Zone {
        name: name.to_string(),
        geometry,
        crs: boundary.crs.clone(),
        rule: rule.clone(),
    })
}

/// Derive every configured zone, keeping the configured order.
pub fn generate_zones<'a, I>(boundary: &Boundary, rules: I) -> Result<Vec<Zone>>
where
    I: IntoIterator<Item = (&'a String, &'a ZoneRule)>,
{
    rules
        .into_iter()
        .map(|(name, rule)| generate_zone(boundary, name, rule))
        .collect()
}

fn derive_projected(projected: &MultiPolygon<f64>, rule: &ZoneRule) -> MultiPolygon<f64> {
    match *rule {
        ZoneRule::Identity => projected.clone(),
        ZoneRule::Buffer {
            distance,
            direction,
        } => {
            let direction = match (direction, distance < 0.0) {
                (d, false) => d,
                (BufferDirection::Outward, true) => BufferDirection::Inward,
                (BufferDirection::Inward, true) => BufferDirection::Outward,
            };
            let d = distance.abs();
            match direction {
                BufferDirection::Outward => projected.buffer(d).difference(projected),
                BufferDirection::Inward => projected.buffer(-d),
            }
        }
        ZoneRule::Band { min_dist, max_dist } => {
            if max_dist <= min_dist || max_dist <= 0.0 {
                return MultiPolygon::new(vec![]);
            }
            let outer = projected.buffer(max_dist);
            if min_dist <= 0.0 {
                outer.difference(projected)
            } else {
                outer.difference(&projected.buffer(min_dist))
            }
        }
    }
}

fn clean(geom: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geom.0
            .into_iter()
            .filter(|p| p.unsigned_area() > SLIVER_AREA_M2)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::measurements::area_ha;
    use crate::vector::validity::is_valid;
    use geo::{polygon, Intersects};

    /// ~1 km x 1 km square near the equator (about 100 ha)
    fn square_boundary() -> Boundary {
        let side = 0.00898;
        let p = polygon![
            (x: 20.0, y: 0.5),
            (x: 20.0 + side, y: 0.5),
            (x: 20.0 + side, y: 0.5 + side),
            (x: 20.0, y: 0.5 + side),
        ];
        Boundary::new("square", MultiPolygon::new(vec![p]), CRS::wgs84())
    }

    #[test]
    fn identity_is_exact_copy() {
        let b = square_boundary();
        let zone = generate_zone(&b, "PA", &ZoneRule::Identity).unwrap();
        assert_eq!(zone.geometry, b.geometry);
        assert_eq!(zone.crs, b.crs);
    }

    #[test]
    fn outward_ring_excludes_boundary() {
        let b = square_boundary();
        let rule = ZoneRule::Buffer {
            distance: 500.0,
            direction: BufferDirection::Outward,
        };
        let ring = generate_zone(&b, "AA", &rule).unwrap();
        assert!(!ring.is_empty());
        assert!(is_valid(&ring.geometry));

        // The ring area is roughly (1+2*0.5)² - 1 km² minus the rounded corners.
        let ha = area_ha(&ring.geometry, &ring.crs).unwrap();
        assert!(ha > 270.0 && ha < 300.0, "ring area {ha}");

        // Interior point of the boundary is not in the ring.
        let centre = geo::Point::new(20.00449, 0.50449);
        assert!(!ring.geometry.intersects(&centre));
    }

    #[test]
    fn inward_buffer_shrinks() {
        let b = square_boundary();
        let rule = ZoneRule::Buffer {
            distance: 100.0,
            direction: BufferDirection::Inward,
        };
        let zone = generate_zone(&b, "core", &rule).unwrap();
        let ha = area_ha(&zone.geometry, &zone.crs).unwrap();
        assert!((ha - 64.0).abs() < 2.0, "inner area {ha}");
    }

    #[test]
    fn negative_distance_flips_direction() {
        let b = square_boundary();
        let a = generate_zone(
            &b,
            "a",
            &ZoneRule::Buffer {
                distance: -100.0,
                direction: BufferDirection::Outward,
            },
        )
        .unwrap();
        let inward = generate_zone(
            &b,
            "b",
            &ZoneRule::Buffer {
                distance: 100.0,
                direction: BufferDirection::Inward,
            },
        )
        .unwrap();
        let (ha_a, ha_b) = (
            area_ha(&a.geometry, &a.crs).unwrap(),
            area_ha(&inward.geometry, &inward.crs).unwrap(),
        );
        assert!((ha_a - ha_b).abs() < 1e-6);
    }

    #[test]
    fn oversized_inward_buffer_is_empty() {
        let b = square_boundary();
        let rule = ZoneRule::Buffer {
            distance: 800.0,
            direction: BufferDirection::Inward,
        };
        let zone = generate_zone(&b, "gone", &rule).unwrap();
        assert!(zone.is_empty());
    }

    #[test]
    fn inverted_band_is_empty() {
        let b = square_boundary();
        let rule = ZoneRule::Band {
            min_dist: 1000.0,
            max_dist: 500.0,
        };
        assert!(generate_zone(&b, "band", &rule).unwrap().is_empty());
    }

    #[test]
    fn band_from_boundary_matches_outward_ring() {
        let b = square_boundary();
        let band = generate_zone(
            &b,
            "band",
            &ZoneRule::Band {
                min_dist: 0.0,
                max_dist: 500.0,
            },
        )
        .unwrap();
        let ring = generate_zone(
            &b,
            "ring",
            &ZoneRule::Buffer {
                distance: 500.0,
                direction: BufferDirection::Outward,
            },
        )
        .unwrap();
        let (a, r) = (
            area_ha(&band.geometry, &band.crs).unwrap(),
            area_ha(&ring.geometry, &ring.crs).unwrap(),
        );
        assert!((a - r).abs() < 1e-6);
    }

    #[test]
    fn zones_keep_configured_order() {
        let b = square_boundary();
        let rules = vec![
            ("PA".to_string(), ZoneRule::Identity),
            (
                "AA".to_string(),
                ZoneRule::Buffer {
                    distance: 500.0,
                    direction: BufferDirection::Outward,
                },
            ),
        ];
        let zones = generate_zones(&b, rules.iter().map(|(n, r)| (n, r))).unwrap();
        let names: Vec<_> = zones.iter().map(|z| z.name.as_str()).collect();
        assert_eq!(names, ["PA", "AA"]);
    }
}
