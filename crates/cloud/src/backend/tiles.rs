//! Backend over a tiled GeoTIFF archive served over HTTP.
//!
//! Tiles are addressed by a URL template with `{tile}` and `{year}`
//! placeholders, e.g. the ESA CCI Biomass archive:
//!
//! ```text
//! https://dap.ceda.ac.uk/neodc/esacci/biomass/data/agb/maps/v5.01/geotiff/{year}/{tile}_ESACCI-BIOMASS-L4-AGB-MERGED-100m-{year}-fv5.0.tif
//! ```
//!
//! Downloads are kept on disk (optional) and decoded tiles in an LRU cache.
//! A tile the archive does not have (404) is skipped; a window with no tile
//! at all is a data gap.

use super::LayerBackend;
use crate::cache::{TileCache, TileKey};
use crate::catalog::{DatasetInfo, TemporalResolution, TimeSlice};
use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::session::Session;
use crate::tile_index::{tiles_for_bbox, BBox, TileId, TILE_DEGREES};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use zonestats_core::io::read_geotiff_from_buffer;
use zonestats_core::{GeoTransform, Raster, CRS};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack when snapping a window to the tile pixel grid, in pixels.
const SNAP_EPSILON: f64 = 1e-9;

/// Configuration of a [`TileBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileBackendConfig {
    /// Backend name
    pub name: String,
    /// Id of the single dataset served
    pub dataset: String,
    /// Logical layer the dataset provides
    pub layer: String,
    pub url_template: String,
    pub resolution_m: f64,
    #[serde(default)]
    pub years: Option<(i32, i32)>,
    #[serde(default)]
    pub temporal: TemporalResolution,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_tile_degrees")]
    pub tile_degrees: u32,
    /// Directory keeping downloaded tiles between runs
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Decoded tiles kept in memory
    #[serde(default = "default_cache_tiles")]
    pub cache_tiles: usize,
}

fn default_tile_degrees() -> u32 {
    TILE_DEGREES
}

fn default_cache_tiles() -> usize {
    16
}

impl TileBackendConfig {
    /// URL of one tile
    pub fn url_for(&self, tile: &TileId, year: i32) -> String {
        self.url_template
            .replace("{tile}", &tile.name())
            .replace("{year}", &year.to_string())
    }

    fn dataset_info(&self) -> DatasetInfo {
        DatasetInfo {
            id: self.dataset.clone(),
            layer: self.layer.clone(),
            backend: self.name.clone(),
            resolution_m: self.resolution_m,
            years: self.years,
            temporal: self.temporal,
            default: self.default,
        }
    }
}

/// File name used in the disk cache: last URL path segment, query dropped.
fn cache_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

pub struct TileBackend {
    config: TileBackendConfig,
    http: HttpClient,
    rt: tokio::runtime::Runtime,
    cache: Mutex<TileCache>,
}

impl TileBackend {
    pub fn new(config: TileBackendConfig) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| CloudError::Network(e.to_string()))?;
        if let Some(dir) = &config.cache_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            http: HttpClient::new(CONNECT_TIMEOUT)?,
            cache: Mutex::new(TileCache::new(config.cache_tiles)),
            config,
            rt,
        })
    }

    pub fn config(&self) -> &TileBackendConfig {
        &self.config
    }

    fn cached(&self, key: &TileKey) -> Option<Arc<Raster<f32>>> {
        self.cache.lock().ok()?.get(key)
    }

    fn remember(&self, key: TileKey, tile: Arc<Raster<f32>>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, tile);
        }
    }

    fn decode(bytes: &[u8]) -> Result<Arc<Raster<f32>>> {
        let mut tile: Raster<f32> = read_geotiff_from_buffer(bytes)?;
        if tile.crs().is_none() {
            tile.set_crs(Some(CRS::wgs84()));
        }
        Ok(Arc::new(tile))
    }

    /// Load the tiles overlapping `bbox`: memory cache, then disk, then HTTP.
    fn load_tiles(&self, session: &Session, tiles: &[TileId], year: i32) -> Result<Vec<Arc<Raster<f32>>>> {
        let mut loaded = Vec::with_capacity(tiles.len());
        let mut pending: Vec<(TileKey, String)> = Vec::new();

        for tile in tiles {
            let key = TileKey { tile: *tile, year };
            if let Some(hit) = self.cached(&key) {
                loaded.push(hit);
                continue;
            }
            let url = self.config.url_for(tile, year);
            if let Some(dir) = &self.config.cache_dir {
                let path = dir.join(cache_file_name(&url));
                if path.is_file() {
                    debug!(tile = %tile, path = %path.display(), "tile from disk cache");
                    let decoded = Self::decode(&std::fs::read(&path)?)?;
                    self.remember(key, decoded.clone());
                    loaded.push(decoded);
                    continue;
                }
            }
            pending.push((key, url));
        }

        if pending.is_empty() {
            return Ok(loaded);
        }

        let urls: Vec<String> = pending.iter().map(|(_, url)| url.clone()).collect();
        info!(count = urls.len(), dataset = %self.config.dataset, year, "downloading tiles");
        let responses = self
            .rt
            .block_on(self.http.get_many(&urls, session.auth(), session.timeout()));

        for ((key, url), response) in pending.into_iter().zip(responses) {
            let bytes = match response {
                Ok(bytes) => bytes,
                Err(CloudError::NotFound { .. }) => {
                    debug!(tile = %key.tile, url, "tile not in archive");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(dir) = &self.config.cache_dir {
                std::fs::write(dir.join(cache_file_name(&url)), &bytes)?;
            }
            let decoded = Self::decode(&bytes)?;
            self.remember(key, decoded.clone());
            loaded.push(decoded);
        }
        Ok(loaded)
    }
}

/// Resample tiles onto one grid covering `bbox`, aligned with the tile pixels.
fn mosaic(tiles: &[Arc<Raster<f32>>], bbox: &BBox) -> Option<Raster<f64>> {
    let reference = tiles.first()?.transform();
    let pw = reference.pixel_width.abs();
    let ph = reference.pixel_height.abs();

    let down = |v: f64| (v + SNAP_EPSILON).floor();
    let up = |v: f64| (v - SNAP_EPSILON).ceil();

    let x0 = reference.origin_x + down((bbox.min_x - reference.origin_x) / pw) * pw;
    let y0 = reference.origin_y - down((reference.origin_y - bbox.max_y) / ph) * ph;
    let cols = (up((bbox.max_x - x0) / pw) as usize).max(1);
    let rows = (up((y0 - bbox.min_y) / ph) as usize).max(1);

    let transform = GeoTransform::new(x0, y0, pw, -ph);
    let mut out: Raster<f64> = Raster::filled(rows, cols, f64::NAN).with_georef(transform, CRS::wgs84());
    out.set_nodata(Some(f64::NAN));

    let mut any = false;
    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = transform.pixel_to_geo(col, row);
            let value = tiles.iter().find_map(|tile| {
                let (c, r) = tile.transform().geo_to_pixel(x, y);
                if !(c >= 0.0 && r >= 0.0) {
                    return None;
                }
                tile.value_at(r as usize, c as usize)
            });
            if let Some(v) = value {
                out.data_mut()[(row, col)] = v;
                any = true;
            }
        }
    }
    any.then_some(out)
}

impl LayerBackend for TileBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn datasets(&self, _session: &Session) -> Result<Vec<DatasetInfo>> {
        Ok(vec![self.config.dataset_info()])
    }

    fn fetch(
        &self,
        session: &Session,
        dataset: &DatasetInfo,
        slice: &TimeSlice,
        bbox: &BBox,
    ) -> Result<Arc<Raster<f64>>> {
        let year = slice.year();
        let tiles = tiles_for_bbox(bbox, self.config.tile_degrees);
        let loaded = self.load_tiles(session, &tiles, year)?;
        debug!(dataset = %dataset.id, slice = %slice, requested = tiles.len(), loaded = loaded.len(), "tiles ready");

        mosaic(&loaded, bbox)
            .map(Arc::new)
            .ok_or_else(|| CloudError::NotFound {
                what: format!("{} tiles for {} in {:?}", dataset.id, slice, bbox),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonestats_core::io::write_geotiff;

    fn config(cache_dir: Option<PathBuf>) -> TileBackendConfig {
        TileBackendConfig {
            name: "ceda".into(),
            dataset: "esa-cci-agb-v5".into(),
            layer: "ESA_CCI_AGB".into(),
            url_template: "http://127.0.0.1:9/{year}/{tile}_AGB-{year}.tif".into(),
            resolution_m: 100.0,
            years: Some((2010, 2021)),
            temporal: TemporalResolution::Annual,
            default: true,
            tile_degrees: 10,
            cache_dir,
            cache_tiles: 4,
        }
    }

    #[test]
    fn test_url_template() {
        let cfg = config(None);
        let tile = TileId::containing(20.5, 0.5, 10);
        assert_eq!(cfg.url_for(&tile, 2019), "http://127.0.0.1:9/2019/N10E020_AGB-2019.tif");
        assert_eq!(cache_file_name("https://a/b/N10E020_x.tif?sig=1"), "N10E020_x.tif");
    }

    #[test]
    fn test_config_from_toml_defaults() {
        let cfg: TileBackendConfig = toml::from_str(
            r#"
            name = "ceda"
            dataset = "esa-cci-agb-v5"
            layer = "ESA_CCI_AGB"
            url_template = "https://example.org/{year}/{tile}.tif"
            resolution_m = 100.0
            years = [2010, 2021]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.years, Some((2010, 2021)));
        assert_eq!(cfg.tile_degrees, 10);
        assert_eq!(cfg.cache_tiles, 16);
    }

    #[test]
    fn test_mosaic_from_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(Some(dir.path().to_path_buf()));
        for (west, value) in [(20, 1.0f32), (30, 2.0f32)] {
            let tile = TileId { north: 10, west, size: 10 };
            let raster: Raster<f32> = Raster::filled(10, 10, value)
                .with_georef(GeoTransform::new(west as f64, 10.0, 1.0, -1.0), CRS::wgs84());
            let url = cfg.url_for(&tile, 2019);
            write_geotiff(&raster, dir.path().join(cache_file_name(&url))).unwrap();
        }

        let backend = TileBackend::new(cfg).unwrap();
        let session = Session::new();
        let dataset = &backend.datasets(&session).unwrap()[0];
        let window = backend
            .fetch(&session, dataset, &TimeSlice::Year(2019), &BBox::new(29.5, 4.2, 30.5, 5.8))
            .unwrap();

        assert_eq!(window.shape(), (2, 2));
        assert_eq!(window.transform().origin_x, 29.0);
        assert_eq!(window.transform().origin_y, 6.0);
        assert_eq!(window.get(0, 0).unwrap(), 1.0);
        assert_eq!(window.get(1, 1).unwrap(), 2.0);
        assert_eq!(backend.cache.lock().unwrap().len(), 2);
    }
}
