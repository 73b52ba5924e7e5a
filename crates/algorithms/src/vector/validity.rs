//! Polygon validity checks
//!
//! A polygon is usable for reduction when every ring is closed, has at least
//! four coordinates, holds only finite values and no two of its edges cross
//! or overlap. Edges may touch at a point.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, Line, LineString, MultiPolygon, Polygon};

/// Reason a geometry failed validation
#[derive(Debug, Clone, PartialEq)]
pub enum Invalidity {
    /// Ring with fewer than four coordinates or not closed
    DegenerateRing { polygon: usize, ring: usize },
    /// NaN or infinite coordinate
    NonFinite { polygon: usize },
    /// Two edges cross or overlap
    SelfIntersection { polygon: usize, at: Coord<f64> },
}

impl std::fmt::Display for Invalidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invalidity::DegenerateRing { polygon, ring } => {
                write!(f, "degenerate ring {} in polygon {}", ring, polygon)
            }
            Invalidity::NonFinite { polygon } => {
                write!(f, "non-finite coordinate in polygon {}", polygon)
            }
            Invalidity::SelfIntersection { polygon, at } => write!(
                f,
                "self-intersection in polygon {} near ({:.6}, {:.6})",
                polygon, at.x, at.y
            ),
        }
    }
}

/// Validate every part of a multipolygon.
///
/// Parts are checked independently; overlaps between parts are allowed.
pub fn validate_multipolygon(geom: &MultiPolygon<f64>) -> Result<(), Invalidity> {
    for (i, polygon) in geom.0.iter().enumerate() {
        validate_polygon(polygon, i)?;
    }
    Ok(())
}

/// Whether every part of a multipolygon is valid
pub fn is_valid(geom: &MultiPolygon<f64>) -> bool {
    validate_multipolygon(geom).is_ok()
}

fn validate_polygon(polygon: &Polygon<f64>, index: usize) -> Result<(), Invalidity> {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .collect();

    for (r, ring) in rings.iter().enumerate() {
        if ring.0.len() < 4 || !ring.is_closed() {
            return Err(Invalidity::DegenerateRing {
                polygon: index,
                ring: r,
            });
        }
        if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(Invalidity::NonFinite { polygon: index });
        }
    }

    let mut segments: Vec<Line<f64>> = rings
        .iter()
        .flat_map(|ring| ring.lines())
        .filter(|line| line.start != line.end)
        .collect();

    // Sweep along x so only segments with overlapping x extents are compared.
    segments.sort_by(|a, b| {
        min_x(a)
            .partial_cmp(&min_x(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (i, &a) in segments.iter().enumerate() {
        let reach = max_x(&a);
        for &b in &segments[i + 1..] {
            if min_x(&b) > reach {
                break;
            }
            match line_intersection(a, b) {
                Some(LineIntersection::SinglePoint {
                    intersection,
                    is_proper: true,
                }) => {
                    return Err(Invalidity::SelfIntersection {
                        polygon: index,
                        at: intersection,
                    });
                }
                Some(LineIntersection::Collinear { intersection })
                    if intersection.start != intersection.end =>
                {
                    return Err(Invalidity::SelfIntersection {
                        polygon: index,
                        at: intersection.start,
                    });
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn min_x(line: &Line<f64>) -> f64 {
    line.start.x.min(line.end.x)
}

fn max_x(line: &Line<f64>) -> f64 {
    line.start.x.max(line.end.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn square_is_valid() {
        let p = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        assert!(is_valid(&MultiPolygon::new(vec![p])));
    }

    #[test]
    fn square_with_hole_is_valid() {
        let p = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 2.0, y: 2.0), (x: 8.0, y: 2.0), (x: 8.0, y: 8.0), (x: 2.0, y: 8.0)]],
        );
        assert!(is_valid(&MultiPolygon::new(vec![p])));
    }

    #[test]
    fn bowtie_is_invalid() {
        let p = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0)];
        let err = validate_multipolygon(&MultiPolygon::new(vec![p])).unwrap_err();
        match err {
            Invalidity::SelfIntersection { at, .. } => {
                assert!((at.x - 5.0).abs() < 1e-9 && (at.y - 5.0).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hole_crossing_shell_is_invalid() {
        let p = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 5.0, y: 5.0), (x: 15.0, y: 5.0), (x: 15.0, y: 8.0), (x: 5.0, y: 8.0)]],
        );
        assert!(!is_valid(&MultiPolygon::new(vec![p])));
    }

    #[test]
    fn non_finite_is_invalid() {
        let p = polygon![(x: 0.0, y: 0.0), (x: f64::NAN, y: 0.0), (x: 10.0, y: 10.0)];
        assert_eq!(
            validate_multipolygon(&MultiPolygon::new(vec![p])),
            Err(Invalidity::NonFinite { polygon: 0 })
        );
    }

    #[test]
    fn overlapping_parts_are_allowed() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let b = polygon![(x: 5.0, y: 5.0), (x: 15.0, y: 5.0), (x: 15.0, y: 15.0), (x: 5.0, y: 15.0)];
        assert!(is_valid(&MultiPolygon::new(vec![a, b])));
    }
}
