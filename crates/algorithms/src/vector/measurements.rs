//! Geometric measurements in metric units
//!
//! Geographic geometries are projected into the UTM zone of their centroid
//! before measuring.

use geo::{Area, Euclidean, Length, MultiPolygon};
use zonestats_core::crs::{self, CRS};
use zonestats_core::Result;

fn to_metric(geom: &MultiPolygon<f64>, crs: &CRS) -> Result<MultiPolygon<f64>> {
    if geom.0.is_empty() || crs.utm_zone().is_some() {
        return Ok(geom.clone());
    }
    let zone = crs::projected_zone_for(geom, crs)?;
    crs::transform_multipolygon(geom, crs, &CRS::from_epsg(zone.epsg()))
}

/// Area in hectares.
pub fn area_ha(geom: &MultiPolygon<f64>, crs: &CRS) -> Result<f64> {
    Ok(to_metric(geom, crs)?.unsigned_area() / 10_000.0)
}

/// Total length of exterior and interior rings, in metres.
pub fn perimeter_m(geom: &MultiPolygon<f64>, crs: &CRS) -> Result<f64> {
    let metric = to_metric(geom, crs)?;
    Ok(metric
        .0
        .iter()
        .map(|p| {
            let ext = Euclidean.length(p.exterior());
            let int: f64 = p.interiors().iter().map(|r| Euclidean.length(r)).sum();
            ext + int
        })
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    #[test]
    fn test_area_projected_square() {
        let p = polygon![
            (x: 500_000.0, y: 0.0),
            (x: 501_000.0, y: 0.0),
            (x: 501_000.0, y: 1_000.0),
            (x: 500_000.0, y: 1_000.0),
        ];
        let mp = MultiPolygon::new(vec![p]);
        let crs = CRS::from_epsg(32630);
        assert_relative_eq!(area_ha(&mp, &crs).unwrap(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(perimeter_m(&mp, &crs).unwrap(), 4_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_area_geographic_square() {
        // 0.01° at the equator is about 1.1 km
        let p = polygon![
            (x: -3.0, y: 0.0),
            (x: -2.99, y: 0.0),
            (x: -2.99, y: 0.01),
            (x: -3.0, y: 0.01),
        ];
        let ha = area_ha(&MultiPolygon::new(vec![p]), &CRS::wgs84()).unwrap();
        assert!((ha - 122.9).abs() < 1.5, "area {ha}");
    }

    #[test]
    fn test_empty_geometry() {
        let empty = MultiPolygon::<f64>::new(vec![]);
        assert_eq!(area_ha(&empty, &CRS::wgs84()).unwrap(), 0.0);
    }
}
