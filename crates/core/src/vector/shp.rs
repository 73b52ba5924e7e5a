//! ESRI Shapefile boundaries (`.shp` with optional `.dbf` and `.prj`)

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::AttributeValue;
use ::shapefile::dbase::{FieldValue, Record};
use ::shapefile::{PolygonRing, Shape};
use geo::{Coord, LineString, Polygon};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Polygons, first-record attributes and CRS of a shapefile.
pub(super) struct ShapefileContents {
    pub polygons: Vec<Polygon<f64>>,
    pub properties: HashMap<String, AttributeValue>,
    pub crs: CRS,
}

pub(super) fn read(path: &Path) -> Result<ShapefileContents> {
    let fail = |e: ::shapefile::Error| Error::Geometry(format!("invalid shapefile: {}", e));

    let (shapes, properties): (Vec<Shape>, _) = if path.with_extension("dbf").is_file() {
        let rows = ::shapefile::read(path).map_err(fail)?;
        let properties = rows
            .first()
            .map(|(_, record)| attributes(record.clone()))
            .unwrap_or_default();
        (rows.into_iter().map(|(shape, _)| shape).collect(), properties)
    } else {
        (::shapefile::read_shapes(path).map_err(fail)?, HashMap::new())
    };

    let mut polygons = Vec::new();
    for shape in shapes {
        match shape {
            Shape::Polygon(p) => push_rings(p.rings(), |pt| (pt.x, pt.y), &mut polygons),
            Shape::PolygonM(p) => push_rings(p.rings(), |pt| (pt.x, pt.y), &mut polygons),
            Shape::PolygonZ(p) => push_rings(p.rings(), |pt| (pt.x, pt.y), &mut polygons),
            Shape::NullShape => {}
            other => debug!(shape = ?other.shapetype(), "skipping non-polygon shape"),
        }
    }

    Ok(ShapefileContents {
        polygons,
        properties,
        crs: prj_crs(path)?,
    })
}

/// Outer rings open a polygon; inner rings are holes of the preceding one.
fn push_rings<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> (f64, f64), out: &mut Vec<Polygon<f64>>) {
    let line = |points: &[P]| -> LineString<f64> {
        points
            .iter()
            .map(|p| {
                let (x, y) = xy(p);
                Coord { x, y }
            })
            .collect()
    };

    let mut current: Option<(LineString<f64>, Vec<LineString<f64>>)> = None;
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => {
                if let Some((exterior, holes)) = current.take() {
                    out.push(Polygon::new(exterior, holes));
                }
                current = Some((line(points), Vec::new()));
            }
            PolygonRing::Inner(points) => match current.as_mut() {
                Some((_, holes)) => holes.push(line(points)),
                None => debug!("hole without an outer ring"),
            },
        }
    }
    if let Some((exterior, holes)) = current {
        out.push(Polygon::new(exterior, holes));
    }
}

/// CRS from the sibling `.prj`; a shapefile without one is WGS84.
fn prj_crs(path: &Path) -> Result<CRS> {
    let prj = path.with_extension("prj");
    if !prj.is_file() {
        return Ok(CRS::wgs84());
    }
    let text = std::fs::read_to_string(&prj)
        .map_err(|e| Error::Geometry(format!("cannot read {}: {}", prj.display(), e)))?;
    Ok(CRS::from_definition(&text))
}

fn attributes(record: Record) -> HashMap<String, AttributeValue> {
    HashMap::<String, FieldValue>::from(record)
        .into_iter()
        .map(|(name, value)| (name, attribute(value)))
        .collect()
}

fn attribute(value: FieldValue) -> AttributeValue {
    match value {
        FieldValue::Character(Some(s)) => AttributeValue::String(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
            AttributeValue::Int(n as i64)
        }
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => AttributeValue::Float(n),
        FieldValue::Float(Some(n)) => AttributeValue::Float(f64::from(n)),
        FieldValue::Integer(i) => AttributeValue::Int(i64::from(i)),
        FieldValue::Logical(Some(b)) => AttributeValue::Bool(b),
        FieldValue::Memo(s) => AttributeValue::String(s),
        _ => AttributeValue::Null,
    }
}
