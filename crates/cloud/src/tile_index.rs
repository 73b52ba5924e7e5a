//! Tile grid math for 10° layer archives.
//!
//! Archives such as ESA CCI Biomass split the globe into square tiles named
//! after their north-west corner (`N10E020` spans lat 0..10, lon 20..30 on
//! the 10° grid). This module maps geographic bounding boxes to those names.

use geo::{BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};
use zonestats_core::crs::{self, CRS};
use zonestats_core::Result;

/// Default side of an archive tile in degrees.
pub const TILE_DEGREES: u32 = 10;

/// Points per edge when reprojecting a box.
const EDGE_SAMPLES: usize = 16;

/// A bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Bounding box of a geometry, `None` when it is empty.
    pub fn of(geom: &MultiPolygon<f64>) -> Option<Self> {
        geom.bounding_rect().map(Self::from)
    }

    /// Check if two bboxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Box covering this one after reprojection.
    ///
    /// Edges are densified before transforming so that curved edges in the
    /// target CRS stay inside the result.
    pub fn to_crs(&self, from: &CRS, to: &CRS) -> Result<BBox> {
        if from.is_equivalent(to) {
            return Ok(*self);
        }
        let mut ring = Vec::with_capacity(4 * EDGE_SAMPLES + 1);
        let corners = [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ];
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            for s in 0..EDGE_SAMPLES {
                let t = s as f64 / EDGE_SAMPLES as f64;
                ring.push(Coord {
                    x: x0 + t * (x1 - x0),
                    y: y0 + t * (y1 - y0),
                });
            }
        }
        ring.push(ring[0]);
        let geom = MultiPolygon::new(vec![Polygon::new(LineString::new(ring), vec![])]);
        let projected = crs::transform_multipolygon(&geom, from, to)?;
        Ok(BBox::of(&projected).unwrap_or(*self))
    }
}

impl From<Rect<f64>> for BBox {
    fn from(rect: Rect<f64>) -> Self {
        BBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// An archive tile, identified by its north-west corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    /// Latitude of the northern edge
    pub north: i32,
    /// Longitude of the western edge
    pub west: i32,
    /// Side in degrees
    pub size: u32,
}

impl TileId {
    /// Tile containing a point. Points on a tile edge belong to the tile
    /// to the south-east.
    pub fn containing(lon: f64, lat: f64, size: u32) -> Self {
        let step = size.max(1) as f64;
        let north = ((lat / step).floor() * step + step) as i32;
        let west = ((lon / step).floor() * step) as i32;
        Self {
            north,
            west,
            size: size.max(1),
        }
    }

    /// Archive name, e.g. `N10E020` or `S10W060`.
    pub fn name(&self) -> String {
        let ns = if self.north >= 0 { 'N' } else { 'S' };
        let ew = if self.west >= 0 { 'E' } else { 'W' };
        format!("{}{:02}{}{:03}", ns, self.north.abs(), ew, self.west.abs())
    }

    /// Geographic extent of the tile.
    pub fn bbox(&self) -> BBox {
        let step = self.size as f64;
        BBox::new(
            self.west as f64,
            self.north as f64 - step,
            self.west as f64 + step,
            self.north as f64,
        )
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Tiles of `size` degrees overlapping a WGS84 box, north-west first.
pub fn tiles_for_bbox(bbox: &BBox, size: u32) -> Vec<TileId> {
    let size = size.max(1);
    let step = size as f64;
    let lon0 = (bbox.min_x.max(-180.0) / step).floor() as i32;
    // A box ending exactly on a tile edge does not touch the next tile.
    let lon1 = ((bbox.max_x.min(180.0) / step).ceil() as i32 - 1).max(lon0);
    let lat0 = (bbox.min_y.max(-90.0) / step).floor() as i32;
    let lat1 = ((bbox.max_y.min(90.0) / step).ceil() as i32 - 1).max(lat0);

    let mut tiles = Vec::new();
    for lat in (lat0..=lat1).rev() {
        for lon in lon0..=lon1 {
            tiles.push(TileId {
                north: (lat + 1) * size as i32,
                west: lon * size as i32,
                size,
            });
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tile_names() {
        assert_eq!(TileId::containing(20.5, 0.5, TILE_DEGREES).name(), "N10E020");
        assert_eq!(TileId::containing(-55.2, -3.1, TILE_DEGREES).name(), "N00W060");
        assert_eq!(TileId::containing(-55.2, -13.1, TILE_DEGREES).name(), "S10W060");
        assert_eq!(TileId::containing(5.0, 45.0, 5).name(), "N50E005");
    }

    #[test]
    fn test_tiles_for_bbox_single() {
        let tiles = tiles_for_bbox(&BBox::new(20.1, 0.1, 20.2, 0.2), TILE_DEGREES);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].bbox(), BBox::new(20.0, 0.0, 30.0, 10.0));
    }

    #[test]
    fn test_tiles_for_bbox_straddling() {
        let tiles = tiles_for_bbox(&BBox::new(29.5, -0.5, 30.5, 0.5), TILE_DEGREES);
        let names: Vec<String> = tiles.iter().map(TileId::name).collect();
        assert_eq!(names, vec!["N10E020", "N10E030", "N00E020", "N00E030"]);
    }

    #[test]
    fn test_tiles_for_bbox_on_edge() {
        let tiles = tiles_for_bbox(&BBox::new(20.0, 0.0, 30.0, 10.0), TILE_DEGREES);
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn test_bbox_intersects() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c), BBox::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_bbox_to_utm_and_back() {
        let bbox = BBox::new(20.0, 0.5, 20.01, 0.51);
        let utm = bbox.to_crs(&CRS::wgs84(), &CRS::from_epsg(32634)).unwrap();
        assert!(utm.width() > 1000.0 && utm.width() < 1200.0);
        let back = utm.to_crs(&CRS::from_epsg(32634), &CRS::wgs84()).unwrap();
        assert_relative_eq!(back.min_x, 20.0, epsilon = 1e-3);
        assert_relative_eq!(back.max_y, 0.51, epsilon = 1e-3);
    }
}
