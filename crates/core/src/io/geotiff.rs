//! GeoTIFF reading/writing on top of the `tiff` crate.
//!
//! Supports north-up rasters georeferenced with ModelPixelScale +
//! ModelTiepoint, an EPSG code from the GeoKey directory and the
//! GDAL_NODATA tag. That covers the tiled layer archives (ESA CCI biomass,
//! Hansen GFC) and the coverage rasters written by the exporter.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Read a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{}: {}", context, e))
}

fn cast_all<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: num_traits::NumCast + Copy,
    T: RasterElement,
{
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: std::io::Read + std::io::Seek,
{
    let mut decoder = Decoder::new(reader)
        .map_err(tiff_err("TIFF decode error"))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let rows = height as usize;
    let cols = width as usize;

    let data: Vec<T> = match decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?
    {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_epsg(&mut decoder).map(CRS::from_epsg));

    if let Ok(text) = decoder.get_tag_ascii_string(Tag::GdalNodata) {
        let nodata = text
            .trim_matches(char::from(0))
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(T::from_f64);
        raster.set_nodata(nodata);
    }

    Ok(raster)
}

/// GeoTransform from ModelPixelScale + ModelTiepoint
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// EPSG code from the GeoKey directory (projected key wins over geographic).
fn read_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;
    let mut geographic = None;
    let mut projected = None;

    // Header is 4 shorts, then entries of [key, location, count, value]
    for entry in keys.get(4..)?.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value as u32),
            PROJECTED_CS_TYPE_KEY => projected = Some(value as u32),
            _ => {}
        }
    }

    projected.or(geographic).filter(|&code| code != 32767)
}

/// Write a Raster to a GeoTIFF file as 32-bit float.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file)
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;

    let (rows, cols) = raster.shape();

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| {
            if raster.is_nodata(v) {
                f32::NAN
            } else {
                num_traits::cast(v).unwrap_or(f32::NAN)
            }
        })
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let gt = raster.transform();

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;

    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &geokeys(raster.crs())[..])
        .map_err(tiff_err("Cannot write geokey tag"))?;

    image
        .encoder()
        .write_tag(Tag::GdalNodata, "nan")
        .map_err(tiff_err("Cannot write nodata tag"))?;

    image
        .write_data(&data)
        .map_err(tiff_err("Cannot write image data"))?;

    Ok(())
}

/// GeoKey directory: model type, raster-is-area and the EPSG code if known.
fn geokeys(crs: Option<&CRS>) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    match crs.and_then(|c| c.epsg()) {
        Some(code) if crs.map_or(false, |c| c.is_geographic()) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, 2]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]);
            entries.push([GEOGRAPHIC_TYPE_KEY, 0, 1, code as u16]);
        }
        Some(code) if code <= u16::MAX as u32 => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, 1]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]);
            entries.push([PROJECTED_CS_TYPE_KEY, 0, 1, code as u16]);
        }
        _ => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, 1]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]);
        }
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_roundtrip_keeps_georeference() {
        let mut raster: Raster<f64> = Raster::filled(4, 5, 2.5).with_georef(
            GeoTransform::new(-58.5, -34.5, 0.001, -0.001),
            CRS::wgs84(),
        );
        raster.set(1, 1, f64::NAN).unwrap();

        let bytes = write_geotiff_to_buffer(&raster).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&bytes).unwrap();

        assert_eq!(back.shape(), (4, 5));
        assert_eq!(back.crs(), Some(&CRS::wgs84()));
        assert!((back.transform().origin_x + 58.5).abs() < 1e-9);
        assert!((back.transform().pixel_height + 0.001).abs() < 1e-12);
        assert!(back.get(1, 1).unwrap().is_nan());
        assert_eq!(back.get(0, 0).unwrap(), 2.5);
    }

    #[test]
    fn georeference_tags_survive_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agb.tif");
        let raster: Raster<f64> = Raster::filled(2, 3, 150.0)
            .with_georef(GeoTransform::new(20.0, 0.6, 0.0005, -0.0005), CRS::wgs84());
        write_geotiff(&raster, &path).unwrap();

        let back: Raster<f64> = read_geotiff(&path).unwrap();
        let gt = back.transform();
        assert!((gt.origin_x - 20.0).abs() < 1e-12);
        assert!((gt.origin_y - 0.6).abs() < 1e-12);
        assert!((gt.pixel_width - 0.0005).abs() < 1e-15);
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(4326));
        assert!(back.nodata().map_or(false, f64::is_nan));
    }

    #[test]
    fn projected_epsg_written_to_geokeys() {
        let keys = geokeys(Some(&CRS::from_epsg(32630)));
        assert_eq!(&keys[..4], &[1, 1, 0, 3]);
        assert!(keys.chunks(4).any(|k| k == [PROJECTED_CS_TYPE_KEY, 0, 1, 32630]));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.tif");
        let raster: Raster<f32> = Raster::filled(3, 3, 1.0)
            .with_georef(GeoTransform::new(500_000.0, 10.0, 10.0, -10.0), CRS::from_epsg(32721));
        write_geotiff(&raster, &path).unwrap();
        let back: Raster<f32> = read_geotiff(&path).unwrap();
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(32721));
        assert_eq!(back.statistics().valid_count, 9);
    }
}
