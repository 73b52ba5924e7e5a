//! Boundary loader for GeoJSON and ESRI Shapefile

use crate::crs::{self, CRS};
use crate::error::{Error, Result};
use crate::vector::{shp, AttributeValue, Boundary};
use geo::{Area, MultiPolygon, Polygon, Simplify};
use geojson::{GeoJson, JsonObject};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Options applied while loading a boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Drop polygon parts smaller than this many hectares.
    pub min_part_area_ha: Option<f64>,
    /// Douglas-Peucker tolerance in metres, applied in the boundary's UTM zone.
    pub simplify_tolerance_m: Option<f64>,
}

/// Load a project boundary from a GeoJSON file or a `.shp` shapefile.
///
/// The identifier is the file stem. Fails with [`Error::Geometry`] when the
/// file cannot be read or parsed, holds no polygonal feature, or declares a
/// CRS that cannot be used.
pub fn load_boundary(path: impl AsRef<Path>, options: &LoaderOptions) -> Result<Boundary> {
    let path = path.as_ref();
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let is_shapefile = path
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("shp"));
    let loaded = if is_shapefile {
        shp::read(path).and_then(|contents| {
            if !contents.crs.is_supported() {
                return Err(Error::Geometry(format!("lacks a usable CRS ({})", contents.crs)));
            }
            finish(&id, contents.polygons, contents.crs, contents.properties, options)
        })
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| Error::Geometry(format!("cannot read: {}", e)))
            .and_then(|text| load_boundary_str(&id, &text, options))
    };

    let mut boundary = loaded
        .map_err(|e| match e {
            Error::Geometry(msg) => Error::Geometry(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
    boundary.source = Some(path.to_path_buf());
    Ok(boundary)
}

/// Parse a boundary from GeoJSON text.
pub fn load_boundary_str(id: &str, text: &str, options: &LoaderOptions) -> Result<Boundary> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| Error::Geometry(format!("invalid GeoJSON: {}", e)))?;

    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut properties = HashMap::new();

    let crs_member = match &geojson {
        GeoJson::FeatureCollection(fc) => {
            for (i, feature) in fc.features.iter().enumerate() {
                if i == 0 {
                    properties = attributes(feature.properties.as_ref());
                }
                if let Some(geometry) = &feature.geometry {
                    collect_polygons(geometry, &mut polygons)?;
                }
            }
            declared_crs(fc.foreign_members.as_ref())
        }
        GeoJson::Feature(feature) => {
            properties = attributes(feature.properties.as_ref());
            if let Some(geometry) = &feature.geometry {
                collect_polygons(geometry, &mut polygons)?;
            }
            declared_crs(feature.foreign_members.as_ref())
        }
        GeoJson::Geometry(geometry) => {
            collect_polygons(geometry, &mut polygons)?;
            declared_crs(geometry.foreign_members.as_ref())
        }
    };

    let crs = match crs_member {
        None => CRS::wgs84(),
        Some(name) => CRS::parse(&name)
            .filter(CRS::is_supported)
            .ok_or_else(|| Error::Geometry(format!("lacks a usable CRS (declared '{}')", name)))?,
    };

    finish(id, polygons, crs, properties, options)
}

fn finish(
    id: &str,
    polygons: Vec<Polygon<f64>>,
    crs: CRS,
    properties: HashMap<String, AttributeValue>,
    options: &LoaderOptions,
) -> Result<Boundary> {
    if polygons.is_empty() {
        return Err(Error::Geometry("no polygon features".into()));
    }

    let mut geometry = MultiPolygon::new(polygons);
    if let Some(min_ha) = options.min_part_area_ha {
        geometry = drop_small_parts(geometry, &crs, min_ha)?;
    }
    if let Some(tolerance) = options.simplify_tolerance_m.filter(|t| *t > 0.0) {
        geometry = simplify(geometry, &crs, tolerance)?;
    }

    debug!(id, parts = geometry.0.len(), crs = %crs, "loaded boundary");

    Ok(Boundary {
        id: id.to_string(),
        geometry,
        crs,
        properties,
        source: None,
    })
}

fn collect_polygons(geometry: &geojson::Geometry, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    let geom: geo::Geometry<f64> = geometry
        .clone()
        .try_into()
        .map_err(|e: geojson::Error| Error::Geometry(format!("bad geometry: {}", e)))?;
    push_polygons(geom, out);
    Ok(())
}

fn push_polygons(geom: geo::Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geom {
        geo::Geometry::Polygon(p) => out.push(p),
        geo::Geometry::MultiPolygon(mp) => out.extend(mp.0),
        geo::Geometry::GeometryCollection(gc) => {
            for g in gc.0 {
                push_polygons(g, out);
            }
        }
        _ => {}
    }
}

/// `crs.properties.name` of a legacy (pre RFC 7946) GeoJSON document.
fn declared_crs(foreign: Option<&JsonObject>) -> Option<String> {
    let crs = foreign?.get("crs")?;
    let name = crs.get("properties")?.get("name")?.as_str()?;
    Some(name.to_string())
}

fn attributes(props: Option<&JsonObject>) -> HashMap<String, AttributeValue> {
    props
        .map(|p| {
            p.iter()
                .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn drop_small_parts(geometry: MultiPolygon<f64>, crs: &CRS, min_ha: f64) -> Result<MultiPolygon<f64>> {
    let zone = crs::projected_zone_for(&geometry, crs)?;
    let projected = crs::transform_multipolygon(&geometry, crs, &CRS::from_epsg(zone.epsg()))?;

    let before = geometry.0.len();
    let kept: Vec<Polygon<f64>> = geometry
        .0
        .into_iter()
        .zip(projected.0.iter())
        .filter(|(_, p)| p.unsigned_area() / 10_000.0 >= min_ha)
        .map(|(original, _)| original)
        .collect();

    if kept.is_empty() {
        return Err(Error::Geometry(format!(
            "every polygon part is smaller than {} ha",
            min_ha
        )));
    }
    if kept.len() < before {
        debug!(dropped = before - kept.len(), min_ha, "dropped small boundary parts");
    }
    Ok(MultiPolygon::new(kept))
}

fn simplify(geometry: MultiPolygon<f64>, crs: &CRS, tolerance_m: f64) -> Result<MultiPolygon<f64>> {
    let utm = CRS::from_epsg(crs::projected_zone_for(&geometry, crs)?.epsg());
    let projected = crs::transform_multipolygon(&geometry, crs, &utm)?;
    let simplified = projected.simplify(tolerance_m);
    let before: usize = projected.0.iter().map(|p| p.exterior().0.len()).sum();
    let after: usize = simplified.0.iter().map(|p| p.exterior().0.len()).sum();
    debug!(tolerance_m, before, after, "simplified boundary");
    crs::transform_multipolygon(&simplified, &utm, crs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "PA", "year": 2018},
             "geometry": {"type": "Polygon", "coordinates": [[[-58.40,-34.62],[-58.39,-34.62],[-58.39,-34.61],[-58.40,-34.61],[-58.40,-34.62]]]}},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[-58.30,-34.62],[-58.29,-34.62],[-58.29,-34.61],[-58.30,-34.61],[-58.30,-34.62]]]}}
        ]
    }"#;

    #[test]
    fn merges_features_into_multipolygon() {
        let b = load_boundary_str("p1", TWO_SQUARES, &LoaderOptions::default()).unwrap();
        assert_eq!(b.parts(), 2);
        assert!(b.crs.is_geographic());
        assert_eq!(b.get_property("name"), Some(&AttributeValue::String("PA".into())));
        assert_eq!(b.get_property("year"), Some(&AttributeValue::Int(2018)));
    }

    #[test]
    fn honours_legacy_crs_member() {
        let text = r#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32721"}},
            "features": [{"type": "Feature", "properties": null,
              "geometry": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}}]}"#;
        let b = load_boundary_str("utm", text, &LoaderOptions::default()).unwrap();
        assert_eq!(b.crs.epsg(), Some(32721));
    }

    #[test]
    fn web_mercator_boundary_measures_in_utm() {
        // 1 km square on the equator at 20E.
        let text = r#"{"type": "Feature",
            "crs": {"type": "name", "properties": {"name": "EPSG:3857"}},
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[2226389,0],[2227389,0],[2227389,1000],[2226389,1000],[2226389,0]]]}}"#;
        let b = load_boundary_str("merc", text, &LoaderOptions::default()).unwrap();
        assert_eq!(b.crs.epsg(), Some(3857));

        let zone = crs::projected_zone_for(&b.geometry, &b.crs).unwrap();
        let utm = crs::transform_multipolygon(&b.geometry, &b.crs, &CRS::from_epsg(zone.epsg())).unwrap();
        let ha = utm.unsigned_area() / 10_000.0;
        assert!((ha - 100.0).abs() < 1.0, "area {ha} ha");
    }

    #[test]
    fn unusable_crs_is_geometry_error() {
        let text = r#"{"type": "Feature",
            "crs": {"type": "name", "properties": {"name": "EPSG:999999"}},
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}"#;
        let err = load_boundary_str("x", text, &LoaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)), "{err}");
    }

    #[test]
    fn simplification_drops_vertices_within_tolerance() {
        // Square edge carrying a 2 m bump halfway along it.
        let text = r#"{"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
            "coordinates": [[[10.0,0.0],[10.0045,0.00002],[10.009,0.0],[10.009,0.009],[10.0,0.009],[10.0,0.0]]]}}"#;
        let raw = load_boundary_str("x", text, &LoaderOptions::default()).unwrap();
        assert_eq!(raw.geometry.0[0].exterior().0.len(), 6);

        let options = LoaderOptions {
            simplify_tolerance_m: Some(10.0),
            ..Default::default()
        };
        let b = load_boundary_str("x", text, &options).unwrap();
        assert_eq!(b.geometry.0[0].exterior().0.len(), 5);
        assert!(b.crs.is_geographic());
        let corner = b.geometry.0[0].exterior().0[0];
        assert!((corner.x - 10.0).abs() < 1e-7 && corner.y.abs() < 1e-7);
    }

    #[test]
    fn zero_polygons_is_geometry_error() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [1, 2]}}]}"#;
        let err = load_boundary_str("x", text, &LoaderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Geometry);
    }

    #[test]
    fn garbage_is_geometry_error() {
        let err = load_boundary_str("x", "not json at all", &LoaderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Geometry);
    }

    #[test]
    fn drops_parts_below_threshold() {
        // First square ~1 km²; second is a ~0.36 ha sliver.
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
              "coordinates": [[[10.0,0.0],[10.009,0.0],[10.009,0.009],[10.0,0.009],[10.0,0.0]]]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
              "coordinates": [[[10.02,0.0],[10.02054,0.0],[10.02054,0.00054],[10.02,0.00054],[10.02,0.0]]]}}
        ]}"#;
        let options = LoaderOptions {
            min_part_area_ha: Some(1.0),
            ..Default::default()
        };
        let b = load_boundary_str("x", text, &options).unwrap();
        assert_eq!(b.parts(), 1);
    }

    #[test]
    fn load_from_file_uses_stem_as_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ACR-123.geojson");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(TWO_SQUARES.as_bytes())
            .unwrap();
        let b = load_boundary(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(b.id, "ACR-123");
        assert_eq!(b.source.as_deref(), Some(path.as_path()));
    }

    /// Minimal single-polygon `.shp`: big-endian header words, little-endian
    /// payload, ring clockwise.
    fn write_square_shp(path: &Path, x0: f64, y0: f64, side: f64) {
        let ring = [(x0, y0), (x0, y0 + side), (x0 + side, y0 + side), (x0 + side, y0), (x0, y0)];
        let content_len = 44 + 4 + 16 * ring.len();
        let mut bytes = Vec::new();
        bytes.extend(9994i32.to_be_bytes());
        bytes.extend([0u8; 20]);
        bytes.extend((((100 + 8 + content_len) / 2) as i32).to_be_bytes());
        bytes.extend(1000i32.to_le_bytes());
        bytes.extend(5i32.to_le_bytes());
        for v in [x0, y0, x0 + side, y0 + side, 0.0, 0.0, 0.0, 0.0] {
            bytes.extend(v.to_le_bytes());
        }
        bytes.extend(1i32.to_be_bytes());
        bytes.extend(((content_len / 2) as i32).to_be_bytes());
        bytes.extend(5i32.to_le_bytes());
        for v in [x0, y0, x0 + side, y0 + side] {
            bytes.extend(v.to_le_bytes());
        }
        bytes.extend(1i32.to_le_bytes());
        bytes.extend((ring.len() as i32).to_le_bytes());
        bytes.extend(0i32.to_le_bytes());
        for (x, y) in ring {
            bytes.extend(x.to_le_bytes());
            bytes.extend(y.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn loads_shapefile_with_prj() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PA.shp");
        write_square_shp(&path, 500_000.0, 7_400_000.0, 1_000.0);
        std::fs::write(
            dir.path().join("PA.prj"),
            r#"PROJCS["WGS_1984_UTM_Zone_23S",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]],PROJECTION["Transverse_Mercator"]]"#,
        )
        .unwrap();

        let b = load_boundary(&path, &LoaderOptions::default()).unwrap();
        assert_eq!(b.id, "PA");
        assert_eq!(b.parts(), 1);
        assert_eq!(b.crs.epsg(), Some(32723));
        assert!((b.planar_area() / 10_000.0 - 100.0).abs() < 1e-6);
    }

    #[test]
    fn shapefile_without_prj_is_wgs84() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.SHP");
        write_square_shp(&path, 20.0, 0.5, 0.009);
        let b = load_boundary(&path, &LoaderOptions::default()).unwrap();
        assert!(b.crs.is_wgs84());
        assert!(b.properties.is_empty());
    }

    #[test]
    fn truncated_shapefile_is_geometry_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.shp");
        std::fs::write(&path, [0u8; 12]).unwrap();
        let err = load_boundary(&path, &LoaderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Geometry);
    }

    #[test]
    fn missing_file_is_geometry_error() {
        let err = load_boundary("/nonexistent/zz.geojson", &LoaderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }
}
