//! Vector data: project boundaries and their attributes

mod loader;
mod shp;

pub use loader::{load_boundary, load_boundary_str, LoaderOptions};

use crate::crs::CRS;
use geo::{Area, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&serde_json::Value> for AttributeValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => AttributeValue::String(s.clone()),
            other => AttributeValue::String(other.to_string()),
        }
    }
}

/// A project boundary: every polygonal feature of a vector file merged into
/// one multipolygon, tagged with its CRS.
#[derive(Debug, Clone)]
pub struct Boundary {
    /// Identifier, usually the file stem
    pub id: String,
    /// Merged polygon parts
    pub geometry: MultiPolygon<f64>,
    /// CRS of `geometry`
    pub crs: CRS,
    /// Attributes of the first feature
    pub properties: HashMap<String, AttributeValue>,
    /// Source file, if loaded from disk
    pub source: Option<PathBuf>,
}

impl Boundary {
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>, crs: CRS) -> Self {
        Self {
            id: id.into(),
            geometry,
            crs,
            properties: HashMap::new(),
            source: None,
        }
    }

    /// Number of polygon parts
    pub fn parts(&self) -> usize {
        self.geometry.0.len()
    }

    /// Planar area in CRS units (degrees² for geographic boundaries)
    pub fn planar_area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }
}
