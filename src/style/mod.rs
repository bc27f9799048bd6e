//! Style conversion collaborator
//!
//! Turning a layer's symbology into SLD is done by an external conversion
//! library. The geodata adapters only need the [`StyleConverter`] contract;
//! [`SldFileConverter`] serves projects whose styles are already stored as
//! SLD files next to the data.

use std::path::PathBuf;
use thiserror::Error;

use crate::layers::{LayerKind, MapLayer};

/// Errors raised by style conversion
#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Failed to read style {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Style for layer '{layer}' is not a valid SLD document")]
    InvalidSld { layer: String },
}

/// Style payload ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedStyle {
    /// SLD 1.0 document
    pub sld: String,
    /// Symbology features the conversion had to drop or approximate
    pub warnings: Vec<String>,
}

/// Converts a layer's symbology to SLD
pub trait StyleConverter: Send + Sync {
    fn convert(&self, layer: &dyn MapLayer) -> Result<ConvertedStyle, StyleError>;
}

/// Reads SLD files referenced by the layer
///
/// Layers without a style file get a generic default style for their geometry
/// type, reported as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct SldFileConverter;

impl StyleConverter for SldFileConverter {
    fn convert(&self, layer: &dyn MapLayer) -> Result<ConvertedStyle, StyleError> {
        match layer.style_source() {
            Some(path) => {
                let sld = std::fs::read_to_string(path).map_err(|source| StyleError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                if !sld.contains("StyledLayerDescriptor") {
                    return Err(StyleError::InvalidSld {
                        layer: layer.name().to_string(),
                    });
                }
                Ok(ConvertedStyle {
                    sld,
                    warnings: Vec::new(),
                })
            }
            None => Ok(ConvertedStyle {
                sld: default_sld(layer),
                warnings: vec![format!(
                    "Layer '{}' has no style file; a default style was used",
                    layer.name()
                )],
            }),
        }
    }
}

fn default_sld(layer: &dyn MapLayer) -> String {
    let symbolizer = match (layer.kind(), layer.geometry_type().unwrap_or_default()) {
        (LayerKind::Raster, _) => "<RasterSymbolizer><Opacity>1.0</Opacity></RasterSymbolizer>",
        (_, geometry) if geometry.contains("Point") => {
            "<PointSymbolizer><Graphic><Mark><WellKnownName>circle</WellKnownName>\
             <Fill><CssParameter name=\"fill\">#3388ff</CssParameter></Fill></Mark>\
             <Size>6</Size></Graphic></PointSymbolizer>"
        }
        (_, geometry) if geometry.contains("Line") => {
            "<LineSymbolizer><Stroke><CssParameter name=\"stroke\">#3388ff</CssParameter>\
             <CssParameter name=\"stroke-width\">1</CssParameter></Stroke></LineSymbolizer>"
        }
        _ => {
            "<PolygonSymbolizer><Fill><CssParameter name=\"fill\">#3388ff</CssParameter></Fill>\
             <Stroke><CssParameter name=\"stroke\">#1f4f99</CssParameter></Stroke></PolygonSymbolizer>"
        }
    };
    let name = html_escape::encode_text(layer.name());

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <StyledLayerDescriptor version=\"1.0.0\" xmlns=\"http://www.opengis.net/sld\" \
         xmlns:ogc=\"http://www.opengis.net/ogc\">\
         <NamedLayer><Name>{name}</Name><UserStyle><Name>{name}</Name>\
         <FeatureTypeStyle><Rule>{symbolizer}</Rule></FeatureTypeStyle>\
         </UserStyle></NamedLayer></StyledLayerDescriptor>"
    )
}
