//! Vector operations on project boundaries and zones
//!
//! - Zones: identity, outward rings, inward buffers, distance bands
//! - Validity: ring and self-intersection checks
//! - Coverage: per-cell coverage fractions of a polygon
//! - Measurements: area and perimeter in metric units

pub mod coverage;
pub mod measurements;
pub mod validity;
pub mod zones;

pub use coverage::{pixel_coverage, Coverage, CoverageOptions, CoveragePolicy};
pub use measurements::{area_ha, perimeter_m};
pub use validity::{is_valid, validate_multipolygon, Invalidity};
pub use zones::{generate_zone, generate_zones, BufferDirection, Zone, ZoneRule};
