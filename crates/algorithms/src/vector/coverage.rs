//! Pixel coverage of polygons
//!
//! Computes, for every cell of a raster grid, the fraction of the cell
//! covered by a polygon. Two policies:
//!
//! - **centroid**: a cell counts fully when its centre lies inside the polygon
//! - **area-weighted**: the exact polygon ∩ cell area, found by clipping every
//!   ring against the cell with Sutherland-Hodgman; holes are subtracted
//!
//! All work happens in pixel space, where a cell is the unit square
//! `[col, col+1] x [row, row+1]`.

use geo::{Area, BoundingRect, Contains, Coord, LineString, MapCoords, MultiPolygon, Point};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use zonestats_core::GeoTransform;

/// Zones covering fewer cells than this use area weighting under `Auto`.
pub const DEFAULT_SMALL_ZONE_PIXELS: f64 = 64.0;

/// Rule deciding which cells belong to a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    Centroid,
    AreaWeighted,
    #[default]
    Auto,
}

/// Coverage options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageOptions {
    pub policy: CoveragePolicy,
    /// Threshold (in cell areas) below which `Auto` switches to area weighting
    pub small_zone_pixels: f64,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            policy: CoveragePolicy::Auto,
            small_zone_pixels: DEFAULT_SMALL_ZONE_PIXELS,
        }
    }
}

/// Per-cell coverage fractions in `[0, 1]` for a raster grid.
#[derive(Debug, Clone)]
pub struct Coverage {
    pub weights: Array2<f64>,
    /// Policy actually applied (never `Auto`)
    pub policy: CoveragePolicy,
    /// Zone area expressed in cell areas
    pub zone_pixels: f64,
}

impl Coverage {
    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.weights.sum()
    }

    /// Cells with a positive weight as `(row, col, weight)`
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.weights
            .indexed_iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|((r, c), &w)| (r, c, w))
    }
}

/// A clipping rectangle
#[derive(Debug, Clone, Copy)]
struct ClipRect {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl ClipRect {
    fn cell(col: usize, row: usize) -> Self {
        Self {
            min_x: col as f64,
            min_y: row as f64,
            max_x: col as f64 + 1.0,
            max_y: row as f64 + 1.0,
        }
    }
}

/// Edge of the clipping rectangle
#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    fn is_inside(&self, p: &Coord<f64>, rect: &ClipRect) -> bool {
        match self {
            Edge::Left => p.x >= rect.min_x,
            Edge::Right => p.x <= rect.max_x,
            Edge::Bottom => p.y >= rect.min_y,
            Edge::Top => p.y <= rect.max_y,
        }
    }

    fn intersect(&self, p: &Coord<f64>, q: &Coord<f64>, rect: &ClipRect) -> Coord<f64> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;

        match self {
            Edge::Left => {
                let t = (rect.min_x - p.x) / dx;
                Coord { x: rect.min_x, y: p.y + t * dy }
            }
            Edge::Right => {
                let t = (rect.max_x - p.x) / dx;
                Coord { x: rect.max_x, y: p.y + t * dy }
            }
            Edge::Bottom => {
                let t = (rect.min_y - p.y) / dy;
                Coord { x: p.x + t * dx, y: rect.min_y }
            }
            Edge::Top => {
                let t = (rect.max_y - p.y) / dy;
                Coord { x: p.x + t * dx, y: rect.max_y }
            }
        }
    }
}

/// Clip a ring against one edge (Sutherland-Hodgman step)
fn clip_ring_edge(vertices: &[Coord<f64>], edge: Edge, rect: &ClipRect) -> Vec<Coord<f64>> {
    let mut output = Vec::with_capacity(vertices.len() + 4);
    let n = vertices.len();

    for i in 0..n {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % n];

        match (edge.is_inside(current, rect), edge.is_inside(next, rect)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(edge.intersect(current, next, rect)),
            (false, true) => {
                output.push(edge.intersect(current, next, rect));
                output.push(*next);
            }
            (false, false) => {}
        }
    }

    output
}

/// Area of the part of an (open) ring inside a rectangle.
///
/// Clipping a concave ring against a convex window may leave degenerate
/// edges along the window border; they enclose no area.
fn clipped_area(ring: &[Coord<f64>], rect: &ClipRect) -> f64 {
    let mut vertices = ring.to_vec();
    for edge in [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top] {
        vertices = clip_ring_edge(&vertices, edge, rect);
        if vertices.len() < 3 {
            return 0.0;
        }
    }
    shoelace(&vertices).abs()
}

fn shoelace(vertices: &[Coord<f64>]) -> f64 {
    let n = vertices.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut v = ring.0.clone();
    if v.len() > 1 && v.first() == v.last() {
        v.pop();
    }
    v
}

/// Cell index range `[lo, hi)` touched by `[min, max]`, clamped to `0..len`.
fn cell_range(min: f64, max: f64, len: usize) -> (usize, usize) {
    let lo = min.floor().max(0.0);
    let hi = max.ceil().max(0.0).min(len as f64);
    if lo >= hi {
        (0, 0)
    } else {
        (lo as usize, hi as usize)
    }
}

/// Project a geometry into pixel space of a grid.
pub fn to_pixel_space(geom: &MultiPolygon<f64>, transform: &GeoTransform) -> MultiPolygon<f64> {
    geom.map_coords(|c| {
        let (col, row) = transform.geo_to_pixel(c.x, c.y);
        Coord { x: col, y: row }
    })
}

/// Coverage of `geom` (in the grid CRS) over a `rows` x `cols` grid.
pub fn pixel_coverage(
    geom: &MultiPolygon<f64>,
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    options: &CoverageOptions,
) -> Coverage {
    let pixel_geom = to_pixel_space(geom, transform);
    let zone_pixels = pixel_geom.unsigned_area();

    let policy = match options.policy {
        CoveragePolicy::Auto if zone_pixels < options.small_zone_pixels => {
            CoveragePolicy::AreaWeighted
        }
        CoveragePolicy::Auto => CoveragePolicy::Centroid,
        p => p,
    };

    let weights = match policy {
        CoveragePolicy::AreaWeighted => area_weights(&pixel_geom, rows, cols),
        _ => centroid_weights(&pixel_geom, rows, cols),
    };

    Coverage {
        weights,
        policy,
        zone_pixels,
    }
}

fn area_weights(pixel_geom: &MultiPolygon<f64>, rows: usize, cols: usize) -> Array2<f64> {
    let mut weights = Array2::<f64>::zeros((rows, cols));

    for polygon in &pixel_geom.0 {
        let Some(bbox) = polygon.bounding_rect() else {
            continue;
        };
        let (c0, c1) = cell_range(bbox.min().x, bbox.max().x, cols);
        let (r0, r1) = cell_range(bbox.min().y, bbox.max().y, rows);
        if c0 >= c1 || r0 >= r1 {
            continue;
        }

        let exterior = open_ring(polygon.exterior());
        let holes: Vec<Vec<Coord<f64>>> = polygon.interiors().iter().map(open_ring).collect();

        for row in r0..r1 {
            for col in c0..c1 {
                let rect = ClipRect::cell(col, row);
                let mut area = clipped_area(&exterior, &rect);
                if area <= 0.0 {
                    continue;
                }
                for hole in &holes {
                    area -= clipped_area(hole, &rect);
                }
                weights[(row, col)] += area.max(0.0);
            }
        }
    }

    weights.mapv_inplace(|w| w.clamp(0.0, 1.0));
    weights
}

fn centroid_weights(pixel_geom: &MultiPolygon<f64>, rows: usize, cols: usize) -> Array2<f64> {
    let mut weights = Array2::<f64>::zeros((rows, cols));

    for polygon in &pixel_geom.0 {
        let Some(bbox) = polygon.bounding_rect() else {
            continue;
        };
        let (c0, c1) = cell_range(bbox.min().x - 0.5, bbox.max().x - 0.5, cols);
        let (r0, r1) = cell_range(bbox.min().y - 0.5, bbox.max().y - 0.5, rows);

        for row in r0..r1 {
            for col in c0..c1 {
                let centre = Point::new(col as f64 + 0.5, row as f64 + 0.5);
                if polygon.contains(&centre) {
                    weights[(row, col)] = 1.0;
                }
            }
        }
    }

    weights
}
