//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{s, Array2};

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` in a 2D grid with associated
/// geographic metadata (transform and CRS). Layer windows fetched from a
/// backend are normalised to `Raster<f64>` with NaN as no-data.
///
/// # Example
///
/// ```ignore
/// use zonestats_core::Raster;
///
/// let mut raster: Raster<f32> = Raster::new(100, 100);
/// raster.set(10, 20, 42.0)?;
/// let value = raster.get(10, 20)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    /// Affine transformation
    transform: GeoTransform,
    /// Coordinate reference system
    crs: Option<CRS>,
    /// No-data value
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from existing data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Builder-style georeferencing.
    pub fn with_georef(mut self, transform: GeoTransform, crs: CRS) -> Self {
        self.transform = transform;
        self.crs = Some(crs);
        self
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows() || col >= self.cols() {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        self.data[(row, col)] = value;
        Ok(())
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    // Metadata

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Set the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Set the CRS
    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Set the no-data value
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Area of a cell of the given row in square metres.
    ///
    /// Geographic rasters vary by latitude; projected rasters do not.
    pub fn cell_area_m2(&self, row: usize) -> f64 {
        match &self.crs {
            Some(crs) if crs.is_geographic() => self.transform.geographic_cell_area(row),
            _ => self.transform.planar_cell_area(),
        }
    }

    // Value checks

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Value at (row, col) as f64, or `None` for no-data.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        let value = *self.data.get((row, col))?;
        if self.is_nodata(value) {
            None
        } else {
            value.as_f64()
        }
    }

    /// Convert to a float raster with NaN marking no-data.
    pub fn to_f64(&self) -> Raster<f64> {
        let data = self.data.map(|&v| {
            if self.is_nodata(v) {
                f64::NAN
            } else {
                v.as_f64().unwrap_or(f64::NAN)
            }
        });
        Raster {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: Some(f64::NAN),
        }
    }

    /// Cut the window covering a bounding box (in raster CRS units).
    ///
    /// Returns `None` when the box does not overlap the raster.
    pub fn crop(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<Raster<T>> {
        let (rmin_x, rmin_y, rmax_x, rmax_y) = self.bounds();
        if max_x <= rmin_x || min_x >= rmax_x || max_y <= rmin_y || min_y >= rmax_y {
            return None;
        }

        let corners = [
            self.transform.geo_to_pixel(min_x, min_y),
            self.transform.geo_to_pixel(min_x, max_y),
            self.transform.geo_to_pixel(max_x, min_y),
            self.transform.geo_to_pixel(max_x, max_y),
        ];
        let col_lo = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let col_hi = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let row_lo = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let row_hi = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let c0 = col_lo.floor().max(0.0) as usize;
        let r0 = row_lo.floor().max(0.0) as usize;
        let c1 = (col_hi.ceil().max(0.0) as usize).min(self.cols());
        let r1 = (row_hi.ceil().max(0.0) as usize).min(self.rows());
        if c0 >= c1 || r0 >= r1 {
            return None;
        }

        Some(Raster {
            data: self.data.slice(s![r0..r1, c0..c1]).to_owned(),
            transform: self.transform.offset(c0, r0),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    // Statistics

    /// Calculate basic statistics (min, max, mean, count of valid cells)
    pub fn statistics(&self) -> RasterStatistics {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum: f64 = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter() {
            if self.is_nodata(value) {
                continue;
            }
            if let Some(v) = value.as_f64() {
                min = min.min(v);
                max = max.max(v);
                sum += v;
                count += 1;
            }
        }

        let (min, max, mean) = if count > 0 {
            (Some(min), Some(max), Some(sum / count as f64))
        } else {
            (None, None, None)
        };

        RasterStatistics {
            min,
            max,
            mean,
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_raster_statistics() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        for i in 0..10 {
            for j in 0..10 {
                raster.set(i, j, (i * 10 + j) as f32).unwrap();
            }
        }

        let stats = raster.statistics();
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(99.0));
        assert_eq!(stats.valid_count, 100);
    }

    #[test]
    fn test_to_f64_marks_nodata_as_nan() {
        let mut raster: Raster<u16> = Raster::filled(2, 2, 7);
        raster.set_nodata(Some(65535));
        raster.set(0, 1, 65535).unwrap();
        let f = raster.to_f64();
        assert!(f.get(0, 1).unwrap().is_nan());
        assert_eq!(f.get(1, 1).unwrap(), 7.0);
        assert_eq!(raster.value_at(0, 1), None);
        assert_eq!(raster.value_at(0, 0), Some(7.0));
    }

    #[test]
    fn test_crop_window() {
        let raster: Raster<f64> = Raster::filled(10, 10, 1.0)
            .with_georef(GeoTransform::new(0.0, 10.0, 1.0, -1.0), CRS::from_epsg(32630));
        let window = raster.crop(2.5, 3.5, 5.5, 6.5).unwrap();
        assert_eq!(window.shape(), (4, 4));
        assert_eq!(window.transform().origin_x, 2.0);
        assert_eq!(window.transform().origin_y, 7.0);
        assert!(raster.crop(20.0, 20.0, 30.0, 30.0).is_none());
    }

    #[test]
    fn test_cell_area_projected() {
        let raster: Raster<f64> = Raster::new(3, 3)
            .with_georef(GeoTransform::new(0.0, 90.0, 30.0, -30.0), CRS::from_epsg(32630));
        assert_eq!(raster.cell_area_m2(0), 900.0);
    }
}
