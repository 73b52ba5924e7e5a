//! # zonestats algorithms
//!
//! Geometry and statistics for zonal aggregation.
//!
//! ## Modules
//!
//! - **vector**: zone generation (identity, rings, bands), polygon validity,
//!   per-cell coverage fractions, metric measurements
//! - **statistics**: the zonal reducer (sum, mean, histogram, cumulative
//!   distribution)

pub mod statistics;
pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::statistics::{
        reduce_zone, ObservationValue, ReduceOptions, Reduction, ReductionKind, ValueSemantics,
    };
    pub use crate::vector::{
        area_ha, generate_zone, generate_zones, pixel_coverage, CoverageOptions, CoveragePolicy,
        Zone, ZoneRule,
    };
    pub use zonestats_core::prelude::*;
}
