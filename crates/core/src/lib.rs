//! # zonestats core
//!
//! Core types and I/O shared by the zonestats crates.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `CRS`: Coordinate Reference System handling (WGS84 and UTM)
//! - `Boundary`: project boundaries loaded from GeoJSON
//! - `Error` / `ErrorKind`: the error taxonomy reported in result tables
//! - GeoTIFF reading and writing

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, ErrorKind, Result};
pub use raster::{GeoTransform, Raster, RasterElement};
pub use vector::Boundary;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{UtmZone, CRS};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::vector::{load_boundary, Boundary, LoaderOptions};
}
