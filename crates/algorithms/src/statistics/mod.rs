//! Zonal statistics over analysis zones

pub mod zonal;

pub use zonal::{
    reduce_zone, DistributionBin, ObservationValue, ReduceOptions, Reduction, ReductionKind,
    ValueSemantics,
};
