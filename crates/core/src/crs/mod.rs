//! Coordinate Reference System handling
//!
//! Boundaries and rasters are tagged with a [`CRS`]. WGS84 and its UTM zones
//! are transformed with inline math; any other CRS with a PROJ definition
//! (a known EPSG code or a `+proj=` string) goes through [`proj::Reprojector`].

pub mod proj;
pub mod utm;

use crate::error::{Error, Result};
use geo::{Centroid, Coord, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use proj::Reprojector;
pub use utm::UtmZone;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
    /// WKT or other free-form definition when no EPSG code is known
    wkt: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            epsg: None,
            wkt: Some(wkt.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Parse the identifiers found in legacy GeoJSON `crs` members and config
    /// files: `EPSG:32630`, `urn:ogc:def:crs:EPSG::4326`,
    /// `urn:ogc:def:crs:OGC:1.3:CRS84`, or a bare code.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let upper = name.to_uppercase();
        if upper.ends_with("CRS84") {
            return Some(Self::wgs84());
        }
        let code = upper
            .rsplit(':')
            .next()
            .and_then(|tail| tail.parse::<u32>().ok())?;
        if upper.contains("EPSG") || name.chars().all(|c| c.is_ascii_digit()) {
            Some(Self::from_epsg(code))
        } else {
            None
        }
    }

    /// CRS described by a `.prj` WKT or a PROJ string.
    ///
    /// The outermost EPSG authority of a WKT wins; ESRI WKT without
    /// authorities is matched by name for WGS84, Web Mercator and the UTM
    /// zones. Anything else is kept verbatim.
    pub fn from_definition(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with("+proj") {
            return Self::from_wkt(text);
        }
        let upper = text.to_uppercase();
        if let Some(code) = last_epsg_authority(&upper) {
            return Self::from_epsg(code);
        }
        if let Some(code) = esri_name_to_epsg(&upper) {
            return Self::from_epsg(code);
        }
        Self::from_wkt(text)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// PROJ string for this CRS, if one is known.
    pub fn proj_definition(&self) -> Option<String> {
        match (self.epsg, &self.wkt) {
            (Some(code), _) => proj::proj_string(code),
            (None, Some(def)) if def.trim_start().starts_with("+proj") => Some(def.clone()),
            _ => None,
        }
    }

    /// WGS84 longitude/latitude.
    pub fn is_wgs84(&self) -> bool {
        self.epsg == Some(4326)
    }

    /// Whether coordinates are longitude/latitude degrees.
    pub fn is_geographic(&self) -> bool {
        self.is_wgs84() || self.proj_definition().map_or(false, |d| proj::is_lonlat(&d))
    }

    /// UTM zone for projected WGS84 UTM codes.
    pub fn utm_zone(&self) -> Option<UtmZone> {
        self.epsg.and_then(UtmZone::from_epsg)
    }

    /// Whether this CRS can be transformed by [`transform_multipolygon`].
    pub fn is_supported(&self) -> bool {
        self.is_wgs84() || self.utm_zone().is_some() || self.proj_definition().is_some()
    }

    fn has_inline_transform(&self) -> bool {
        self.is_wgs84() || self.utm_zone().is_some()
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

fn last_epsg_authority(upper: &str) -> Option<u32> {
    ["AUTHORITY[\"EPSG\",", "ID[\"EPSG\","]
        .iter()
        .filter_map(|marker| upper.rfind(marker).map(|at| at + marker.len()))
        .max()
        .and_then(|start| {
            let digits: String = upper[start..]
                .chars()
                .skip_while(|c| *c == '"' || c.is_whitespace())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        })
}

fn esri_name_to_epsg(upper: &str) -> Option<u32> {
    if upper.starts_with("PROJCS") {
        if upper.contains("WEB_MERCATOR") || upper.contains("PSEUDO_MERCATOR") {
            return Some(3857);
        }
        let at = upper.find("UTM_ZONE_")? + "UTM_ZONE_".len();
        let digits: String = upper[at..].chars().take_while(|c| c.is_ascii_digit()).collect();
        let zone: u32 = digits.parse().ok()?;
        let north = upper[at + digits.len()..].starts_with('N');
        let base = match (upper.contains("SIRGAS_2000"), upper.contains("WGS_1984"), north) {
            (true, _, false) => 31960,
            (false, true, true) => 32600,
            (false, true, false) => 32700,
            _ => return None,
        };
        return proj::proj_string(base + zone).map(|_| base + zone);
    }
    if upper.starts_with("GEOGCS") && upper.contains("WGS_1984") {
        return Some(4326);
    }
    None
}

/// Pick the UTM zone containing the centroid of a geometry.
///
/// UTM input already carries its zone. Other CRSs are taken to WGS84 first.
pub fn projected_zone_for(geom: &MultiPolygon<f64>, crs: &CRS) -> Result<UtmZone> {
    if let Some(zone) = crs.utm_zone() {
        return Ok(zone);
    }
    let centroid = geom
        .centroid()
        .ok_or_else(|| Error::Geometry("cannot take the centroid of an empty geometry".into()))?;
    let (lon, lat) = if crs.is_geographic() {
        (centroid.x(), centroid.y())
    } else {
        Reprojector::new(crs, &CRS::wgs84())
            .map_err(|_| Error::Geometry(format!("unsupported CRS {}", crs)))?
            .apply(centroid.x(), centroid.y())?
    };
    Ok(UtmZone::for_lon_lat(lon, lat))
}

/// Transform a multipolygon between two supported CRSs.
pub fn transform_multipolygon(
    geom: &MultiPolygon<f64>,
    from: &CRS,
    to: &CRS,
) -> Result<MultiPolygon<f64>> {
    if from.is_equivalent(to) {
        return Ok(geom.clone());
    }
    if !from.is_supported() || !to.is_supported() {
        return Err(Error::CrsMismatch(from.identifier(), to.identifier()));
    }
    if !from.has_inline_transform() || !to.has_inline_transform() {
        let reprojector = Reprojector::new(from, to)?;
        let reprojector = &reprojector;
        return geom.try_map_coords(|c| reprojector.apply(c.x, c.y).map(|(x, y)| Coord { x, y }));
    }

    // Route everything through geographic coordinates.
    let geographic = match from.utm_zone() {
        Some(zone) => geom.map_coords(|c| {
            let (lon, lat) = zone.inverse(c.x, c.y);
            Coord { x: lon, y: lat }
        }),
        None => geom.clone(),
    };

    Ok(match to.utm_zone() {
        Some(zone) => geographic.map_coords(|c| {
            let (e, n) = zone.forward(c.x, c.y);
            Coord { x: e, y: n }
        }),
        None => geographic,
    })
}
