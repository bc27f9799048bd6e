//! Layer export collaborator
//!
//! Data uploads go through a portable file. [`LayerExporter`] is the contract
//! the geodata adapters rely on; [`FileExporter`] copies the layer source into
//! an export directory and, for GeoJSON data, drops properties that were not
//! selected for publishing.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::layers::{project::read_geojson, LayerError, LayerKind, MapLayer};
use crate::utils::sanitize_filename;

/// Errors raised while exporting a layer
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error("Cannot export layer '{layer}': {reason}")]
    Unsupported { layer: String, reason: String },
}

/// File formats the exporters produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    GeoJson,
    GeoPackage,
    /// Zipped shapefile
    Shapefile,
    GeoTiff,
}

impl DataFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "geojson" | "json" => Some(Self::GeoJson),
            "gpkg" => Some(Self::GeoPackage),
            "zip" => Some(Self::Shapefile),
            "tif" | "tiff" => Some(Self::GeoTiff),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::GeoPackage => "gpkg",
            Self::Shapefile => "zip",
            Self::GeoTiff => "tif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::GeoJson => "application/geo+json",
            Self::GeoPackage => "application/geopackage+sqlite3",
            Self::Shapefile => "application/zip",
            Self::GeoTiff => "image/tiff",
        }
    }
}

/// Result of exporting a layer
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub format: DataFormat,
    /// Requested fields the layer does not have
    pub warnings: Vec<String>,
}

/// Produces a portable file for a layer
pub trait LayerExporter: Send + Sync {
    /// Export `layer`, restricted to `fields` for vector layers when given
    fn export(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
    ) -> Result<ExportedFile, ExportError>;
}

/// Exports layers into a directory
#[derive(Debug, Clone)]
pub struct FileExporter {
    export_dir: PathBuf,
}

impl FileExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    fn target(&self, layer: &dyn MapLayer, format: DataFormat) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.export_dir).map_err(|source| ExportError::Io {
            path: self.export_dir.clone(),
            source,
        })?;
        let filename = format!("{}.{}", sanitize_filename(layer.name()), format.extension());
        Ok(self.export_dir.join(filename))
    }

    fn export_geojson(
        &self,
        layer: &dyn MapLayer,
        fields: &[String],
    ) -> Result<ExportedFile, ExportError> {
        let warnings = fields
            .iter()
            .filter(|name| !layer.fields().iter().any(|f| &f.name == *name))
            .map(|name| format!("Field '{name}' does not exist in layer '{}'", layer.name()))
            .collect();

        let features: Vec<serde_json::Value> = read_geojson(layer.source())?
            .into_iter()
            .map(|feature| {
                let properties: serde_json::Map<_, _> = feature
                    .attributes
                    .into_iter()
                    .filter(|(key, _)| fields.contains(key))
                    .collect();
                serde_json::json!({
                    "type": "Feature",
                    "geometry": feature.geometry,
                    "properties": properties,
                })
            })
            .collect();

        let document = serde_json::json!({
            "type": "FeatureCollection",
            "features": features,
        });

        let path = self.target(layer, DataFormat::GeoJson)?;
        std::fs::write(&path, document.to_string()).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(ExportedFile {
            path,
            format: DataFormat::GeoJson,
            warnings,
        })
    }
}

impl LayerExporter for FileExporter {
    fn export(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
    ) -> Result<ExportedFile, ExportError> {
        let source = Path::new(layer.source());
        let format = DataFormat::from_path(source).ok_or_else(|| ExportError::Unsupported {
            layer: layer.name().to_string(),
            reason: format!("unknown data format for source {}", layer.source()),
        })?;

        match (layer.kind(), fields) {
            (LayerKind::Vector, Some(fields)) if format == DataFormat::GeoJson => {
                self.export_geojson(layer, fields)
            }
            (LayerKind::Vector, Some(fields)) if fields.len() < layer.fields().len() => {
                Err(ExportError::Unsupported {
                    layer: layer.name().to_string(),
                    reason: "field selection is only supported for GeoJSON sources".to_string(),
                })
            }
            (LayerKind::None, _) => Err(ExportError::Unsupported {
                layer: layer.name().to_string(),
                reason: "layer has no exportable data".to_string(),
            }),
            _ => {
                let path = self.target(layer, format)?;
                std::fs::copy(source, &path).map_err(|source| ExportError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(ExportedFile {
                    path,
                    format,
                    warnings: Vec::new(),
                })
            }
        }
    }
}
