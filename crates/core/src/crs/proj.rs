//! Generic reprojection through proj4rs
//!
//! WGS84 and its UTM zones are handled by the inline Transverse Mercator in
//! [`super::utm`]. Every other CRS with a known PROJ definition goes through
//! a [`Reprojector`].

use super::CRS;
use crate::error::{Error, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

const WGS84_LONLAT: &str = "+proj=longlat +datum=WGS84 +no_defs";
const GRS80_TOWGS84: &str = "+ellps=GRS80 +towgs84=0,0,0,0,0,0,0";

/// PROJ definition for the EPSG codes this crate knows about.
pub fn proj_string(epsg: u32) -> Option<String> {
    let def = match epsg {
        4326 => WGS84_LONLAT.to_string(),
        4269 => "+proj=longlat +datum=NAD83 +no_defs".to_string(),
        // SIRGAS 2000, ETRS89
        4674 | 4258 => format!("+proj=longlat {GRS80_TOWGS84} +no_defs"),
        3857 | 900913 => {
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs".to_string()
        }
        3395 => "+proj=merc +lon_0=0 +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs".to_string(),
        3035 => format!(
            "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 {GRS80_TOWGS84} +units=m +no_defs"
        ),
        32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", epsg - 32600),
        32701..=32760 => format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", epsg - 32700),
        // SIRGAS 2000 / UTM 17S..25S
        31977..=31985 => format!("+proj=utm +zone={} +south {GRS80_TOWGS84} +units=m +no_defs", epsg - 31960),
        // ETRS89 / UTM 28N..38N
        25828..=25838 => format!("+proj=utm +zone={} {GRS80_TOWGS84} +units=m +no_defs", epsg - 25800),
        _ => return None,
    };
    Some(def)
}

/// Whether a PROJ definition describes longitude/latitude coordinates.
pub(crate) fn is_lonlat(def: &str) -> bool {
    def.contains("+proj=longlat") || def.contains("+proj=latlong")
}

/// Point transformer between two CRSs.
pub struct Reprojector {
    source: Proj,
    target: Proj,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("source_is_geographic", &self.source_is_geographic)
            .field("target_is_geographic", &self.target_is_geographic)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    /// Fails with [`Error::CrsMismatch`] when either side has no usable
    /// PROJ definition.
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        let mismatch = || Error::CrsMismatch(from.identifier(), to.identifier());
        let source_def = from.proj_definition().ok_or_else(mismatch)?;
        let target_def = to.proj_definition().ok_or_else(mismatch)?;
        let source = Proj::from_proj_string(&source_def).map_err(|_| mismatch())?;
        let target = Proj::from_proj_string(&target_def).map_err(|_| mismatch())?;
        Ok(Self {
            source,
            target,
            source_is_geographic: is_lonlat(&source_def),
            target_is_geographic: is_lonlat(&target_def),
        })
    }

    /// Transform one point. Geographic coordinates are degrees on both sides.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&self.source, &self.target, &mut point)
            .map_err(|e| Error::Geometry(format!("cannot reproject ({x}, {y}): {e:?}")))?;
        Ok(if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_web_mercator_to_lonlat() {
        let r = Reprojector::new(&CRS::from_epsg(3857), &CRS::wgs84()).unwrap();
        let (lon, lat) = r.apply(2_226_389.8, 1_118_890.0).unwrap();
        assert_relative_eq!(lon, 20.0, epsilon = 1e-4);
        assert_relative_eq!(lat, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_sirgas_utm_matches_wgs84_utm() {
        let sirgas = Reprojector::new(&CRS::wgs84(), &CRS::from_epsg(31983)).unwrap();
        let wgs = Reprojector::new(&CRS::wgs84(), &CRS::from_epsg(32723)).unwrap();
        let a = sirgas.apply(-46.6, -23.5).unwrap();
        let b = wgs.apply(-46.6, -23.5).unwrap();
        assert!((a.0 - b.0).abs() < 1.0 && (a.1 - b.1).abs() < 1.0);
    }

    #[test]
    fn test_unknown_code_rejected() {
        let err = Reprojector::new(&CRS::from_epsg(999_999), &CRS::wgs84()).unwrap_err();
        assert!(matches!(err, Error::CrsMismatch(_, _)));
    }
}
