//! Layer model and read-only layer helpers
//!
//! The host project (layers, layer tree, extents, CRS) is a collaborator.
//! It is reached through the [`Project`] and [`MapLayer`] traits; the
//! helpers in this module only ever read from them.
//!
//! - [`metadata`] - layer metadata documents and validation
//! - [`project`] - JSON project files used by the command line tool

pub mod metadata;
pub mod project;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use metadata::{LayerMetadata, MetadataValidator, ValidationIssue};
pub use project::FileProject;

/// Errors raised while reading layer data
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Failed to read layer source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid GeoJSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Layer '{0}' has no readable features")]
    NoFeatures(String),
}

/// Geometry kind of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Vector,
    Raster,
    /// Plugin/annotation layers and anything else that cannot be published
    None,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Zero-area boxes (a single point, a horizontal line) count as empty
    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    /// Expand the box by `delta` on every side
    pub fn grow(&self, delta: f64) -> Self {
        Self::new(
            self.xmin - delta,
            self.ymin - delta,
            self.xmax + delta,
            self.ymax + delta,
        )
    }

    /// Include a single coordinate
    pub fn include(&mut self, x: f64, y: f64) {
        self.xmin = self.xmin.min(x);
        self.ymin = self.ymin.min(y);
        self.xmax = self.xmax.max(x);
        self.ymax = self.ymax.max(y);
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

/// Attribute type of a vector field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
    Date,
}

impl FieldType {
    /// Guess the field type from a JSON attribute value
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(_) => Self::Boolean,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            serde_json::Value::Number(_) => Self::Real,
            _ => Self::Text,
        }
    }
}

/// Vector layer attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A single vector feature: GeoJSON geometry plus attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub geometry: Option<serde_json::Value>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Streaming access to a layer's features
pub type FeatureIter<'a> = Box<dyn Iterator<Item = Result<Feature, LayerError>> + Send + 'a>;

/// A layer of the host project
pub trait MapLayer: Send + Sync {
    /// Display name, unique within the project
    fn name(&self) -> &str;

    /// Data source URI or path
    fn source(&self) -> &str;

    fn kind(&self) -> LayerKind;

    /// Geometry type (`Point`, `MultiPolygon`, ...) for vector layers
    fn geometry_type(&self) -> Option<&str>;

    fn fields(&self) -> &[Field];

    fn extent(&self) -> BoundingBox;

    /// CRS authority id, e.g. `EPSG:4326`
    fn crs_authid(&self) -> &str;

    fn metadata(&self) -> &LayerMetadata;

    /// File holding the layer's symbology, if any
    fn style_source(&self) -> Option<&Path>;

    fn features(&self) -> Result<FeatureIter<'_>, LayerError>;
}

/// Node of the project's layer tree
#[derive(Debug, Clone, PartialEq)]
pub enum LayerTreeNode {
    Layer(String),
    Group(LayerTreeGroup),
}

/// Named group in the project's layer tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerTreeGroup {
    pub name: String,
    pub children: Vec<LayerTreeNode>,
}

/// The host project
pub trait Project: Send + Sync {
    /// Every layer in the project, publishable or not
    fn map_layers(&self) -> Vec<Arc<dyn MapLayer>>;

    /// Root of the layer tree
    fn layer_tree(&self) -> &LayerTreeGroup;
}

/// Vector and raster layers of the project
pub fn publishable_layers(project: &dyn Project) -> Vec<Arc<dyn MapLayer>> {
    project
        .map_layers()
        .into_iter()
        .filter(|layer| matches!(layer.kind(), LayerKind::Vector | LayerKind::Raster))
        .collect()
}

/// Find a publishable layer by name
pub fn layer_from_name(project: &dyn Project, name: &str) -> Option<Arc<dyn MapLayer>> {
    publishable_layers(project)
        .into_iter()
        .find(|layer| layer.name() == name)
}

/// Extent advertised for a layer's map service
///
/// A zero-area extent (a single point) is grown by one unit on every side.
pub fn service_extent(layer: &dyn MapLayer) -> BoundingBox {
    let extent = layer.extent();
    if extent.is_empty() {
        extent.grow(1.0)
    } else {
        extent
    }
}

/// Stable content identifier derived from the layer source
///
/// UUIDv5 in the DNS namespace, so the same data source always maps to the
/// same metadata record.
pub fn uuid_for_layer(layer: &dyn MapLayer) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, layer.source().as_bytes()).to_string()
}
