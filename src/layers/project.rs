//! JSON project files
//!
//! The command line tool has no host GIS application to ask for layers, so
//! projects are described in a small JSON document:
//!
//! ```json
//! {
//!   "layers": [
//!     { "name": "roads", "kind": "vector", "source": "data/roads.geojson",
//!       "crs": "EPSG:4326", "style": "styles/roads.sld",
//!       "metadata": { "title": "Roads" } }
//!   ],
//!   "tree": [
//!     { "group": "Transport", "children": [ { "layer": "roads" } ] }
//!   ]
//! }
//! ```
//!
//! Relative paths are resolved against the project file. For GeoJSON sources
//! missing `fields`, `extent` and `geometry_type` are derived from the data.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    BoundingBox, Feature, FeatureIter, Field, FieldType, LayerError, LayerKind, LayerMetadata,
    LayerTreeGroup, LayerTreeNode, MapLayer, Project,
};

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    name: String,
    layers: Vec<LayerEntry>,
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct LayerEntry {
    name: String,
    kind: LayerKind,
    source: String,
    #[serde(default = "default_crs")]
    crs: String,
    geometry_type: Option<String>,
    #[serde(default)]
    fields: Vec<Field>,
    extent: Option<[f64; 4]>,
    style: Option<PathBuf>,
    #[serde(default)]
    metadata: LayerMetadata,
}

fn default_crs() -> String {
    String::from("EPSG:4326")
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TreeEntry {
    Layer { layer: String },
    Group { group: String, children: Vec<TreeEntry> },
}

impl From<TreeEntry> for LayerTreeNode {
    fn from(entry: TreeEntry) -> Self {
        match entry {
            TreeEntry::Layer { layer } => LayerTreeNode::Layer(layer),
            TreeEntry::Group { group, children } => LayerTreeNode::Group(LayerTreeGroup {
                name: group,
                children: children.into_iter().map(Into::into).collect(),
            }),
        }
    }
}

/// Layer loaded from a project file
#[derive(Debug, Clone)]
pub struct FileLayer {
    name: String,
    source: String,
    kind: LayerKind,
    geometry_type: Option<String>,
    fields: Vec<Field>,
    extent: BoundingBox,
    crs: String,
    metadata: LayerMetadata,
    style: Option<PathBuf>,
}

impl FileLayer {
    fn from_entry(entry: LayerEntry, base: &Path) -> Result<Self, LayerError> {
        let source_path = resolve(base, Path::new(&entry.source));
        let source = source_path.to_string_lossy().to_string();

        let mut layer = Self {
            name: entry.name,
            source,
            kind: entry.kind,
            geometry_type: entry.geometry_type,
            fields: entry.fields,
            extent: entry
                .extent
                .map(|[xmin, ymin, xmax, ymax]| BoundingBox::new(xmin, ymin, xmax, ymax))
                .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0)),
            crs: entry.crs,
            metadata: entry.metadata,
            style: entry.style.map(|p| resolve(base, &p)),
        };

        let needs_inference =
            layer.fields.is_empty() || entry.extent.is_none() || layer.geometry_type.is_none();
        if layer.kind == LayerKind::Vector && is_geojson(&layer.source) && needs_inference {
            layer.infer_from_data(entry.extent.is_none())?;
        }

        Ok(layer)
    }

    fn infer_from_data(&mut self, infer_extent: bool) -> Result<(), LayerError> {
        let features = read_geojson(&self.source)?;

        let mut extent: Option<BoundingBox> = None;
        let mut fields: Vec<Field> = Vec::new();
        for feature in &features {
            if let Some(geometry) = &feature.geometry {
                if self.geometry_type.is_none() {
                    self.geometry_type = geometry
                        .get("type")
                        .and_then(|t| t.as_str())
                        .map(str::to_string);
                }
                if infer_extent {
                    walk_coordinates(geometry.get("coordinates"), &mut extent);
                }
            }
            for (name, value) in &feature.attributes {
                if !value.is_null() && !fields.iter().any(|f| &f.name == name) {
                    fields.push(Field::new(name.clone(), FieldType::infer(value)));
                }
            }
        }

        if self.fields.is_empty() {
            self.fields = fields;
        }
        if let Some(extent) = extent {
            self.extent = extent;
        }
        Ok(())
    }
}

impl MapLayer for FileLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn geometry_type(&self) -> Option<&str> {
        self.geometry_type.as_deref()
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn extent(&self) -> BoundingBox {
        self.extent
    }

    fn crs_authid(&self) -> &str {
        &self.crs
    }

    fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    fn style_source(&self) -> Option<&Path> {
        self.style.as_deref()
    }

    fn features(&self) -> Result<FeatureIter<'_>, LayerError> {
        if !is_geojson(&self.source) {
            return Err(LayerError::NoFeatures(self.name.clone()));
        }
        let features = read_geojson(&self.source)?;
        Ok(Box::new(features.into_iter().map(Ok)))
    }
}

/// Project described by a JSON file
pub struct FileProject {
    name: String,
    layers: Vec<Arc<dyn MapLayer>>,
    tree: LayerTreeGroup,
}

impl FileProject {
    /// Load a project file
    pub fn load(path: &Path) -> Result<Self, LayerError> {
        let content = std::fs::read_to_string(path).map_err(|source| LayerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&content, base).map_err(|err| match err {
            LayerError::Json { source, .. } => LayerError::Json {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse a project document, resolving relative paths against `base`
    pub fn from_json(content: &str, base: &Path) -> Result<Self, LayerError> {
        let file: ProjectFile = serde_json::from_str(content).map_err(|source| LayerError::Json {
            path: String::from("<project>"),
            source,
        })?;

        let layers = file
            .layers
            .into_iter()
            .map(|entry| FileLayer::from_entry(entry, base).map(|l| Arc::new(l) as Arc<dyn MapLayer>))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tree: LayerTreeGroup {
                name: file.name.clone(),
                children: file.tree.into_iter().map(Into::into).collect(),
            },
            name: file.name,
            layers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Project for FileProject {
    fn map_layers(&self) -> Vec<Arc<dyn MapLayer>> {
        self.layers.clone()
    }

    fn layer_tree(&self) -> &LayerTreeGroup {
        &self.tree
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn is_geojson(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.ends_with(".geojson") || lower.ends_with(".json")
}

/// Read the features of a GeoJSON `FeatureCollection`
pub(crate) fn read_geojson(path: &str) -> Result<Vec<Feature>, LayerError> {
    let content = std::fs::read_to_string(path).map_err(|source| LayerError::Io {
        path: path.to_string(),
        source,
    })?;
    let document: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| LayerError::Json {
            path: path.to_string(),
            source,
        })?;

    let features = document
        .get("features")
        .and_then(|f| f.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| Feature {
                    geometry: item.get("geometry").filter(|g| !g.is_null()).cloned(),
                    attributes: item
                        .get("properties")
                        .and_then(|p| p.as_object())
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(features)
}

fn walk_coordinates(value: Option<&serde_json::Value>, extent: &mut Option<BoundingBox>) {
    let Some(serde_json::Value::Array(items)) = value else {
        return;
    };

    if let (Some(x), Some(y)) = (
        items.first().and_then(|v| v.as_f64()),
        items.get(1).and_then(|v| v.as_f64()),
    ) {
        match extent {
            Some(bbox) => bbox.include(x, y),
            None => *extent = Some(BoundingBox::new(x, y, x, y)),
        }
        return;
    }

    for item in items {
        walk_coordinates(Some(item), extent);
    }
}
