//! In-process backend over rasters held in memory or loaded from local files.

use super::LayerBackend;
use crate::catalog::{DatasetInfo, TemporalResolution, TimeSlice};
use crate::error::{CloudError, Result};
use crate::session::Session;
use crate::tile_index::BBox;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use zonestats_core::io::read_geotiff;
use zonestats_core::{Raster, RasterElement, CRS};

/// Backend serving rasters registered up front.
///
/// Rasters are keyed by dataset id and slice. Static datasets hold a single
/// raster registered without a slice; annual datasets fall back to the
/// raster of the slice's first year.
#[derive(Default)]
pub struct MemoryBackend {
    name: String,
    datasets: Vec<DatasetInfo>,
    rasters: HashMap<(String, Option<TimeSlice>), Arc<Raster<f64>>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a dataset; its `backend` field is set to this backend.
    pub fn add_dataset(&mut self, mut info: DatasetInfo) {
        info.backend = self.name.clone();
        self.datasets.retain(|d| d.id != info.id);
        self.datasets.push(info);
    }

    /// Builder form of [`add_dataset`](Self::add_dataset).
    pub fn with_dataset(mut self, info: DatasetInfo) -> Self {
        self.add_dataset(info);
        self
    }

    /// Register the raster of a dataset for one slice (`None` for static data).
    pub fn insert_raster<T: RasterElement>(
        &mut self,
        dataset: &str,
        slice: Option<TimeSlice>,
        raster: &Raster<T>,
    ) {
        self.rasters
            .insert((dataset.to_string(), slice), Arc::new(raster.to_f64()));
    }

    /// Register a local GeoTIFF.
    pub fn load_geotiff(
        &mut self,
        dataset: &str,
        slice: Option<TimeSlice>,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let raster: Raster<f64> = read_geotiff(path.as_ref())?;
        debug!(dataset, path = %path.as_ref().display(), shape = ?raster.shape(), "loaded local raster");
        self.insert_raster(dataset, slice, &raster);
        Ok(())
    }

    fn lookup(&self, dataset: &DatasetInfo, slice: &TimeSlice) -> Option<&Arc<Raster<f64>>> {
        let id = dataset.id.clone();
        if dataset.temporal == TemporalResolution::Static {
            return self.rasters.get(&(id, None));
        }
        self.rasters
            .get(&(id.clone(), Some(slice.clone())))
            .or_else(|| self.rasters.get(&(id, Some(TimeSlice::Year(slice.year())))))
    }
}

impl LayerBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasets(&self, _session: &Session) -> Result<Vec<DatasetInfo>> {
        Ok(self.datasets.clone())
    }

    fn fetch(
        &self,
        _session: &Session,
        dataset: &DatasetInfo,
        slice: &TimeSlice,
        bbox: &BBox,
    ) -> Result<Arc<Raster<f64>>> {
        let not_found = || CloudError::NotFound {
            what: format!("{} for {}", dataset.id, slice),
        };
        let raster = self.lookup(dataset, slice).ok_or_else(not_found)?;

        let wgs84 = CRS::wgs84();
        let target = raster.crs().unwrap_or(&wgs84);
        let window = bbox.to_crs(&wgs84, target)?;
        let cropped = raster
            .crop(window.min_x, window.min_y, window.max_x, window.max_y)
            .ok_or_else(not_found)?;
        Ok(Arc::new(cropped))
    }
}
