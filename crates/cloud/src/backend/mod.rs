//! Layer backends: where raster windows come from.

mod memory;
mod tiles;

pub use memory::MemoryBackend;
pub use tiles::{TileBackend, TileBackendConfig};

use crate::catalog::{DatasetInfo, TimeSlice};
use crate::error::Result;
use crate::session::Session;
use crate::tile_index::BBox;
use std::sync::Arc;
use zonestats_core::Raster;

/// A source of concrete datasets.
///
/// Implementations must be shareable across reducer threads; any internal
/// caching sits behind a lock.
pub trait LayerBackend: Send + Sync {
    /// Backend name, referenced by [`DatasetInfo::backend`]
    fn name(&self) -> &str;

    /// Datasets this backend can serve.
    fn datasets(&self, session: &Session) -> Result<Vec<DatasetInfo>>;

    /// Fetch the window of `dataset` for `slice` covering `bbox` (WGS84).
    ///
    /// The returned raster uses NaN as no-data. A dataset without data for
    /// the slice or the extent is reported as
    /// [`CloudError::NotFound`](crate::CloudError::NotFound).
    fn fetch(
        &self,
        session: &Session,
        dataset: &DatasetInfo,
        slice: &TimeSlice,
        bbox: &BBox,
    ) -> Result<Arc<Raster<f64>>>;
}
