//! Per-project pipeline: zones → resolve → fetch → reduce → assemble.

use crate::config::{boundary_year, PipelineConfig};
use crate::maybe_rayon::*;
use crate::result::{Observation, ResultKey, ResultTable, ResultTableBuilder};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};
use zonestats_algorithms::statistics::{reduce_zone, ReduceOptions, ReductionKind};
use zonestats_algorithms::vector::{generate_zones, Zone};
use zonestats_cloud::{BBox, DatasetHandle, LayerResolver, LayerSpec, Session, TimeSlice};
use zonestats_core::crs;
use zonestats_core::{Boundary, Error, Raster, Result, CRS};

/// Zone window kept for raster export
#[derive(Debug, Clone)]
pub struct ZoneWindow {
    pub key: ResultKey,
    pub raster: Raster<f64>,
}

/// Everything produced for one project.
#[derive(Debug)]
pub struct ProjectRun {
    pub project: String,
    pub zones: Vec<Zone>,
    pub slices: Vec<TimeSlice>,
    pub table: ResultTable,
    /// Filled when `export_rasters` is set
    pub windows: Vec<ZoneWindow>,
}

/// Unit reported for a statistic.
fn unit_for(spec: &LayerSpec, kind: ReductionKind) -> String {
    match kind {
        ReductionKind::Histogram => "pixels".to_string(),
        ReductionKind::CumulativeDistribution { .. } => "%".to_string(),
        ReductionKind::Mean if spec.areal => "fraction".to_string(),
        _ => spec.unit.clone(),
    }
}

/// WGS84 box around every non-empty zone.
fn zones_extent(zones: &[Zone]) -> Result<Option<BBox>> {
    let wgs84 = CRS::wgs84();
    let mut extent: Option<BBox> = None;
    for zone in zones.iter().filter(|z| !z.is_empty()) {
        let geographic = crs::transform_multipolygon(&zone.geometry, &zone.crs, &wgs84)?;
        if let Some(bbox) = BBox::of(&geographic) {
            extent = Some(extent.map_or(bbox, |e| e.union(&bbox)));
        }
    }
    Ok(extent)
}

struct Context<'a> {
    project: &'a str,
    zones: &'a [Zone],
    extent: Option<BBox>,
    config: &'a PipelineConfig,
    resolver: &'a LayerResolver,
    session: &'a Session,
    builder: &'a ResultTableBuilder,
    windows: &'a Mutex<Vec<ZoneWindow>>,
}

impl Context<'_> {
    fn key(&self, zone: &Zone, layer: &str, slice: &TimeSlice) -> ResultKey {
        ResultKey::new(self.project, &zone.name, layer, slice.label())
    }

    /// Evaluate one (layer, slice) for every zone.
    fn evaluate(&self, layer: &str, slice: &TimeSlice) -> Result<()> {
        let handle = match self.resolver.resolve(self.session, layer, slice) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(project = self.project, layer, slice = %slice, error = %e, "layer unavailable");
                for zone in self.zones {
                    self.builder.missing(self.key(zone, layer, slice), &e)?;
                }
                return Ok(());
            }
        };

        let window = match self.extent {
            Some(extent) => Some(handle.fetch(self.session, slice, &extent)),
            None => None,
        };
        if let Some(Err(e)) = &window {
            warn!(project = self.project, layer, slice = %slice, error = %e, "fetch failed");
        }

        for zone in self.zones {
            let key = self.key(zone, layer, slice);
            let raster = match &window {
                Some(Ok(raster)) => Some(&**raster),
                Some(Err(e)) if !zone.is_empty() => {
                    self.builder.missing(key, e)?;
                    continue;
                }
                _ => None,
            };
            self.reduce(key, zone, &handle, raster)?;
        }
        Ok(())
    }

    fn reduce(
        &self,
        key: ResultKey,
        zone: &Zone,
        handle: &DatasetHandle,
        raster: Option<&Raster<f64>>,
    ) -> Result<()> {
        let options = ReduceOptions {
            semantics: handle.spec.semantics,
            kind: self.config.reduction_for(&handle.spec),
            areal: handle.spec.areal,
            coverage: self.config.coverage,
            keep_window: self.config.export_rasters,
        };

        // Empty zones never touch data.
        let empty = Raster::new(0, 0);
        let raster = raster.unwrap_or(&empty);

        match reduce_zone(&zone.geometry, &zone.crs, raster, &options) {
            Ok(mut reduction) => {
                debug!(key = %key, valid_weight = reduction.valid_weight, "observation");
                if let Some(window) = reduction.window.take() {
                    if let Ok(mut windows) = self.windows.lock() {
                        windows.push(ZoneWindow {
                            key: key.clone(),
                            raster: window,
                        });
                    }
                }
                let unit = unit_for(&handle.spec, reduction.kind);
                self.builder
                    .computed(key, Observation::from_reduction(reduction, handle.id(), &unit))
            }
            Err(e) => {
                let e = e.with_gap_context(handle.id(), &key.period);
                warn!(key = %key, error = %e, "reduction failed");
                self.builder.missing(key, &e)
            }
        }
    }
}

/// Run the pipeline for one boundary.
///
/// Geometry failures and duplicate observations abort the run; every other
/// failure becomes a missing row of the returned table.
pub fn run_project(
    boundary: &Boundary,
    config: &PipelineConfig,
    resolver: &LayerResolver,
    session: &Session,
) -> Result<ProjectRun> {
    let start = Instant::now();
    let project = boundary.id.as_str();
    let slices = config.slices(boundary_year(boundary))?;
    let zones = generate_zones(boundary, &config.zones)?;
    let extent = zones_extent(&zones)?;
    info!(project, zones = zones.len(), slices = slices.len(), layers = config.layers.len(), "running project");

    let mut requested = Vec::with_capacity(zones.len() * config.layers.len() * slices.len());
    for zone in &zones {
        for layer in &config.layers {
            for slice in &slices {
                requested.push(ResultKey::new(project, &zone.name, layer, slice.label()));
            }
        }
    }
    let builder = ResultTableBuilder::new(requested);
    let windows = Mutex::new(Vec::new());

    let ctx = Context {
        project,
        zones: &zones,
        extent,
        config,
        resolver,
        session,
        builder: &builder,
        windows: &windows,
    };

    let combos: Vec<(&String, &TimeSlice)> = config
        .layers
        .iter()
        .flat_map(|layer| slices.iter().map(move |slice| (layer, slice)))
        .collect();

    if config.concurrency.parallel {
        combos
            .into_par_iter()
            .map(|(layer, slice)| ctx.evaluate(layer, slice))
            .collect::<Result<Vec<()>>>()?;
    } else {
        for (layer, slice) in combos {
            ctx.evaluate(layer, slice)?;
        }
    }

    let table = builder.finalize()?;
    let windows = windows
        .into_inner()
        .map_err(|_| Error::Other("window list lock poisoned".into()))?;
    info!(
        project,
        computed = table.observations().count(),
        missing = table.missing().count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "project done"
    );

    Ok(ProjectRun {
        project: project.to_string(),
        zones,
        slices,
        table,
        windows,
    })
}
