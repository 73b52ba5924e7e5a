//! Layer resolution: logical layer + time slice → concrete dataset.

use crate::backend::LayerBackend;
use crate::catalog::{DatasetInfo, LayerCatalog, LayerSpec, TimeSlice};
use crate::session::Session;
use crate::tile_index::BBox;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use zonestats_core::{Error, Raster, Result};

/// Datasets whose resolutions differ by less than this (metres) tie.
const RESOLUTION_EPSILON: f64 = 1e-6;

/// A resolved dataset, ready to fetch from.
#[derive(Clone)]
pub struct DatasetHandle {
    pub info: DatasetInfo,
    pub spec: LayerSpec,
    backend: Arc<dyn LayerBackend>,
}

impl DatasetHandle {
    /// Fetch the window covering `bbox` (WGS84), retried per the session.
    ///
    /// Missing data surfaces as [`Error::DataGap`] naming this dataset and
    /// the slice; exhausted retries as [`Error::RemoteService`].
    pub fn fetch(&self, session: &Session, slice: &TimeSlice, bbox: &BBox) -> Result<Arc<Raster<f64>>> {
        let what = format!("{} {}", self.info.id, slice);
        session
            .retry(&what, || self.backend.fetch(session, &self.info, slice, bbox))
            .map_err(|e| Error::from(e).with_gap_context(&self.info.id, &slice.label()))
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("info", &self.info)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Picks one dataset per (layer, slice) among every registered backend.
pub struct LayerResolver {
    catalog: LayerCatalog,
    backends: Vec<Arc<dyn LayerBackend>>,
    pinned: HashMap<String, String>,
}

impl LayerResolver {
    pub fn new(catalog: LayerCatalog) -> Self {
        Self {
            catalog,
            backends: Vec::new(),
            pinned: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn LayerBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn add_backend(&mut self, backend: Arc<dyn LayerBackend>) {
        self.backends.push(backend);
    }

    /// Always prefer `dataset` for `layer` when it covers the slice.
    pub fn pin(&mut self, layer: impl Into<String>, dataset: impl Into<String>) {
        self.pinned.insert(layer.into(), dataset.into());
    }

    pub fn catalog(&self) -> &LayerCatalog {
        &self.catalog
    }

    /// Every dataset offered by the registered backends.
    pub fn datasets(&self, session: &Session) -> Result<Vec<DatasetInfo>> {
        let mut all = Vec::new();
        for backend in &self.backends {
            let listed = session
                .retry(&format!("datasets of {}", backend.name()), || backend.datasets(session))
                .map_err(Error::from)?;
            all.extend(listed);
        }
        Ok(all)
    }

    /// Resolve `layer` for `slice`.
    ///
    /// The finest resolution wins. Among datasets tied at that resolution a
    /// pinned dataset wins, then the single candidate flagged `default`.
    /// A backend whose listing fails is skipped with a warning; the failure
    /// is only returned when no other backend offers a candidate.
    pub fn resolve(&self, session: &Session, layer: &str, slice: &TimeSlice) -> Result<DatasetHandle> {
        let not_found = || Error::LayerNotFound {
            layer: layer.to_string(),
            period: slice.label(),
        };
        let spec = self.catalog.get(layer).ok_or_else(not_found)?;

        let mut candidates: Vec<(DatasetInfo, Arc<dyn LayerBackend>)> = Vec::new();
        let mut listing_error = None;
        for backend in &self.backends {
            let listed = match session.retry(&format!("datasets of {}", backend.name()), || backend.datasets(session)) {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(backend = backend.name(), layer, error = %e, "skipping backend whose listing failed");
                    listing_error.get_or_insert(e);
                    continue;
                }
            };
            candidates.extend(
                listed
                    .into_iter()
                    .filter(|d| d.layer == layer && d.covers(slice))
                    .map(|d| (d, backend.clone())),
            );
        }
        if candidates.is_empty() {
            return Err(listing_error.map(Error::from).unwrap_or_else(not_found));
        }

        let handle = |(info, backend): (DatasetInfo, Arc<dyn LayerBackend>)| {
            debug!(layer, slice = %slice, dataset = %info.id, backend = backend.name(), "resolved layer");
            DatasetHandle {
                info,
                spec: spec.clone(),
                backend,
            }
        };

        let finest = candidates
            .iter()
            .map(|(d, _)| d.resolution_m)
            .fold(f64::INFINITY, f64::min);
        let mut tied: Vec<(DatasetInfo, Arc<dyn LayerBackend>)> = candidates
            .into_iter()
            .filter(|(d, _)| (d.resolution_m - finest).abs() < RESOLUTION_EPSILON)
            .collect();

        if let Some(pinned) = self.pinned.get(layer) {
            if let Some(pos) = tied.iter().position(|(d, _)| &d.id == pinned) {
                return Ok(handle(tied.swap_remove(pos)));
            }
            warn!(layer, slice = %slice, pinned = %pinned, "pinned dataset is not among the finest candidates");
        }

        if tied.len() == 1 {
            return Ok(handle(tied.remove(0)));
        }

        let defaults: Vec<usize> = tied
            .iter()
            .enumerate()
            .filter(|(_, (d, _))| d.default)
            .map(|(i, _)| i)
            .collect();
        if let [only] = defaults.as_slice() {
            return Ok(handle(tied.swap_remove(*only)));
        }

        let mut ids: Vec<String> = tied.into_iter().map(|(d, _)| d.id).collect();
        ids.sort();
        Err(Error::LayerAmbiguous {
            layer: layer.to_string(),
            period: slice.label(),
            candidates: ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalog::TemporalResolution;
    use crate::error::CloudError;
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicI32, Ordering};
    use zonestats_core::ErrorKind;

    fn dataset(id: &str, layer: &str, resolution_m: f64, default: bool) -> DatasetInfo {
        DatasetInfo {
            id: id.into(),
            layer: layer.into(),
            backend: String::new(),
            resolution_m,
            years: Some((2010, 2021)),
            temporal: TemporalResolution::Annual,
            default,
        }
    }

    fn resolver(datasets: Vec<DatasetInfo>) -> LayerResolver {
        let mut backend = MemoryBackend::new("mem");
        for d in datasets {
            backend.add_dataset(d);
        }
        LayerResolver::new(LayerCatalog::builtin()).with_backend(Arc::new(backend))
    }

    #[test]
    fn test_unknown_layer_and_uncovered_slice() {
        let r = resolver(vec![dataset("agb-v5", "ESA_CCI_AGB", 100.0, false)]);
        let session = Session::new();

        let err = r.resolve(&session, "NoSuchLayer", &TimeSlice::Year(2015)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayerNotFound);

        let err = r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2023)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayerNotFound);

        let err = r.resolve(&session, "NDVI", &"2019-JJA".parse().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayerNotFound);
    }

    #[test]
    fn test_finest_resolution_wins() {
        let r = resolver(vec![
            dataset("agb-1km", "ESA_CCI_AGB", 1000.0, true),
            dataset("agb-100m", "ESA_CCI_AGB", 100.0, false),
        ]);
        let h = r.resolve(&Session::new(), "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap();
        assert_eq!(h.id(), "agb-100m");
        assert_eq!(h.spec.unit, "Mg/ha");
    }

    #[test]
    fn test_tie_broken_by_single_default() {
        let r = resolver(vec![
            dataset("a", "ESA_CCI_AGB", 100.0, false),
            dataset("b", "ESA_CCI_AGB", 100.0, true),
        ]);
        let h = r.resolve(&Session::new(), "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap();
        assert_eq!(h.id(), "b");
    }

    #[test]
    fn test_tie_without_default_is_ambiguous() {
        let r = resolver(vec![
            dataset("b", "ESA_CCI_AGB", 100.0, true),
            dataset("a", "ESA_CCI_AGB", 100.0, true),
        ]);
        match r.resolve(&Session::new(), "ESA_CCI_AGB", &TimeSlice::Year(2015)) {
            Err(Error::LayerAmbiguous { candidates, .. }) => assert_eq!(candidates, vec!["a", "b"]),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_finer_dataset_beats_coarser_pin() {
        let mut r = resolver(vec![
            dataset("fine", "ESA_CCI_AGB", 30.0, false),
            dataset("coarse", "ESA_CCI_AGB", 100.0, false),
        ]);
        r.pin("ESA_CCI_AGB", "coarse");
        let session = Session::new();
        assert_eq!(r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap().id(), "fine");

        r.pin("ESA_CCI_AGB", "missing");
        assert_eq!(r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap().id(), "fine");
    }

    #[test]
    fn test_pin_breaks_resolution_tie_before_default() {
        let mut r = resolver(vec![
            dataset("a", "ESA_CCI_AGB", 100.0, true),
            dataset("b", "ESA_CCI_AGB", 100.0, false),
            dataset("c", "ESA_CCI_AGB", 100.0, false),
        ]);
        let session = Session::new();
        assert_eq!(r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap().id(), "a");

        r.pin("ESA_CCI_AGB", "c");
        assert_eq!(r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap().id(), "c");
    }

    struct Flaky {
        failures: AtomicI32,
    }

    impl LayerBackend for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn datasets(&self, _session: &Session) -> crate::error::Result<Vec<DatasetInfo>> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(CloudError::Status { status: 503, url: "catalog".into() });
            }
            Ok(vec![dataset("gfc", "GFW_tree_loss", 30.0, false)])
        }

        fn fetch(
            &self,
            _session: &Session,
            _dataset: &DatasetInfo,
            _slice: &TimeSlice,
            _bbox: &BBox,
        ) -> crate::error::Result<Arc<Raster<f64>>> {
            Err(CloudError::NotFound { what: "tile".into() })
        }
    }

    #[test]
    fn test_listing_retried_and_gap_named() {
        let backend = Arc::new(Flaky { failures: AtomicI32::new(2) });
        let r = LayerResolver::new(LayerCatalog::builtin()).with_backend(backend);
        let session = Session::new().with_retry(RetryPolicy { max_retries: 3, base_delay_ms: 1 });

        let h = r.resolve(&session, "GFW_tree_loss", &TimeSlice::Year(2019)).unwrap();
        let err = h
            .fetch(&session, &TimeSlice::Year(2019), &BBox::new(0.0, 0.0, 1.0, 1.0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataGap);
        assert!(err.to_string().contains("'gfc'"));
        assert!(err.to_string().contains("2019"));
    }

    #[test]
    fn test_listing_failure_is_remote_service() {
        let backend = Arc::new(Flaky { failures: AtomicI32::new(10) });
        let r = LayerResolver::new(LayerCatalog::builtin()).with_backend(backend);
        let session = Session::new().with_retry(RetryPolicy { max_retries: 1, base_delay_ms: 1 });
        let err = r.resolve(&session, "GFW_tree_loss", &TimeSlice::Year(2019)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteService);
    }

    #[test]
    fn test_failing_backend_skipped_when_another_offers_layer() {
        let flaky = Arc::new(Flaky { failures: AtomicI32::new(10) });
        let mut healthy = MemoryBackend::new("mem");
        healthy.add_dataset(dataset("agb-v5", "ESA_CCI_AGB", 100.0, false));
        let r = LayerResolver::new(LayerCatalog::builtin())
            .with_backend(flaky)
            .with_backend(Arc::new(healthy));
        let session = Session::new().with_retry(RetryPolicy { max_retries: 0, base_delay_ms: 1 });

        let h = r.resolve(&session, "ESA_CCI_AGB", &TimeSlice::Year(2015)).unwrap();
        assert_eq!(h.id(), "agb-v5");
    }
}
