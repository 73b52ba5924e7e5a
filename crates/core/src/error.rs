//! Error types for zonestats

use std::fmt;
use thiserror::Error;

/// Main error type for zonestats operations.
///
/// The first group of variants is the failure taxonomy of the zonal pipeline;
/// each maps to a stable [`ErrorKind`] that is written next to missing rows
/// in exported tables.
#[derive(Error, Debug)]
pub enum Error {
    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("no dataset for layer '{layer}' covers period {period}")]
    LayerNotFound { layer: String, period: String },

    #[error("layer '{layer}' is ambiguous for period {period}: candidates {candidates:?}")]
    LayerAmbiguous {
        layer: String,
        period: String,
        candidates: Vec<String>,
    },

    #[error("dataset '{dataset}' has no coverage for period {period} within the zone extent")]
    DataGap { dataset: String, period: String },

    #[error("reduction error: {0}")]
    Reduction(String),

    #[error("duplicate observation for key {0}")]
    DuplicateObservation(String),

    #[error("remote service error: {0}")]
    RemoteService(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failure category used for propagation decisions and export markers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Geometry(_) => ErrorKind::Geometry,
            Error::LayerNotFound { .. } => ErrorKind::LayerNotFound,
            Error::LayerAmbiguous { .. } => ErrorKind::LayerAmbiguous,
            Error::DataGap { .. } => ErrorKind::DataGap,
            Error::Reduction(_) => ErrorKind::Reduction,
            Error::DuplicateObservation(_) => ErrorKind::DuplicateObservation,
            Error::RemoteService(_) => ErrorKind::RemoteService,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteService(_))
    }

    /// Fill in the dataset and period of a data gap raised below the layer
    /// level. Other errors pass through.
    pub fn with_gap_context(self, dataset: &str, period: &str) -> Self {
        match self {
            Error::DataGap { .. } => Error::DataGap {
                dataset: dataset.to_string(),
                period: period.to_string(),
            },
            other => other,
        }
    }
}

/// Stable names for the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Geometry,
    LayerNotFound,
    LayerAmbiguous,
    DataGap,
    Reduction,
    DuplicateObservation,
    RemoteService,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Geometry => "GeometryError",
            ErrorKind::LayerNotFound => "LayerNotFoundError",
            ErrorKind::LayerAmbiguous => "LayerAmbiguousError",
            ErrorKind::DataGap => "DataGapError",
            ErrorKind::Reduction => "ReductionError",
            ErrorKind::DuplicateObservation => "DuplicateObservationError",
            ErrorKind::RemoteService => "RemoteServiceError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for zonestats operations
pub type Result<T> = std::result::Result<T, Error>;
