//! Catalog server adapters and the server registry
//!
//! Three kinds of servers can be configured:
//!
//! - geodata servers ([`geoserver::GeoserverServer`]) store layer data and styles
//!   and serve them as WMS/WFS
//! - metadata servers ([`geonetwork::GeonetworkServer`]) store discovery records
//! - auxiliary databases ([`postgis::PostgisServer`]) receive imported features
//!   so the geodata server can reference them instead of an uploaded copy
//!
//! The publish task talks to them only through the [`GeodataCatalog`] and
//! [`MetadataCatalog`] contracts. Every publishing call returns a
//! [`PublishLog`] with the non-fatal warnings and recoverable errors it ran
//! into; hard failures come back as [`AdapterError`].

pub mod definition;
pub mod geonetwork;
pub mod geoserver;
pub mod http;
pub mod postgis;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::ExportError;
use crate::layers::{BoundingBox, MapLayer};
use crate::publish::LayerGroup;
use crate::style::StyleError;

pub use definition::{Server, ServerContext};
pub use postgis::ImportError;
pub use registry::{RegistryError, ServerFilter, ServerRegistry, StoredEntry};

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure of a single adapter operation
///
/// Raised while publishing one layer, these are caught at the per-layer
/// boundary of the publish task and recorded in that layer's error list.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport-level HTTP failure
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The catalog answered with a non-success status
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid server URL '{0}'")]
    InvalidUrl(String),

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Invalid metadata template: {0}")]
    TemplateSetup(#[from] handlebars::TemplateError),

    #[error("Failed to render metadata record: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The layer could not be published for a domain reason
    #[error("{0}")]
    Publish(String),

    #[error("Layer '{0}' not found in project")]
    LayerNotFound(String),

    #[error("Cannot find the selected PostGIS database '{0}'")]
    MissingDatabase(String),

    /// Failure of a call that had already logged warnings or errors
    #[error("{error}")]
    Logged {
        error: Box<AdapterError>,
        log: PublishLog,
    },
}

impl AdapterError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::Logged { error, .. } => error.is_transient(),
            _ => false,
        }
    }

    /// Attach the log collected before the failure
    ///
    /// An empty log leaves the error untouched; a log attached earlier
    /// is appended after `log`.
    pub fn with_log(self, mut log: PublishLog) -> Self {
        match self {
            Self::Logged { error, log: inner } => {
                log.merge(inner);
                Self::Logged { error, log }
            }
            error if log.is_empty() => error,
            error => Self::Logged {
                error: Box::new(error),
                log,
            },
        }
    }

    /// Split into the underlying failure and whatever was logged before it
    pub fn into_parts(self) -> (AdapterError, PublishLog) {
        match self {
            Self::Logged { error, log } => (*error, log),
            error => (error, PublishLog::new()),
        }
    }
}

/// Outcome of an adapter call that logs into `log` as it goes
pub(crate) fn finish(result: AdapterResult<()>, log: PublishLog) -> AdapterResult<PublishLog> {
    match result {
        Ok(()) => Ok(log),
        Err(e) => Err(e.with_log(log)),
    }
}

/// Warnings and errors collected during one adapter call
///
/// Warnings keep insertion order here; the publish task collapses duplicates
/// when it files them under a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishLog {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PublishLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.errors.push(message);
    }

    /// Append another log, keeping order
    pub fn merge(&mut self, other: PublishLog) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Server kind, used to filter the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerKind {
    GeodataServer,
    MetadataServer,
    AuxiliaryDatabase,
}

/// Reference to a live map service, embedded in metadata records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WmsReference {
    /// WMS endpoint
    pub url: String,
    /// Comma-separated qualified layer names
    pub layers: String,
    pub bbox: BoundingBox,
    pub crs: String,
}

impl WmsReference {
    /// GetMap request showing the referenced layers over their extent
    pub fn get_map_url(&self) -> String {
        format!(
            "{}?service=WMS&version=1.1.1&request=GetMap&layers={}&bbox={}&srs={}&width=768&height=768&format=image/png",
            self.url, self.layers, self.bbox, self.crs
        )
    }
}

/// Capabilities shared by every server adapter
#[async_trait]
pub trait CatalogServer: Send + Sync {
    /// User-chosen name, unique within the registry
    fn name(&self) -> &str;

    fn kind(&self) -> ServerKind;

    /// Lightweight round trip; every failure collapses to `false`
    async fn test_connection(&self) -> bool;
}

/// Geodata publishing contract
#[async_trait]
pub trait GeodataCatalog: CatalogServer {
    /// Setup run once before the per-layer loop of a publish task
    async fn prepare_for_publishing(&self, only_symbology: bool) -> AdapterResult<PublishLog>;

    /// Convert and upload the layer's style under the layer's name
    async fn publish_style(&self, layer: &dyn MapLayer) -> AdapterResult<PublishLog>;

    /// Publish the layer's data with its style
    ///
    /// `fields` restricts the published attributes of vector layers.
    async fn publish_layer(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
    ) -> AdapterResult<PublishLog>;

    /// Attach a metadata record URL to an already published layer
    async fn set_layer_metadata_link(&self, layer_name: &str, url: &str)
        -> AdapterResult<PublishLog>;

    /// WMS reference for the given layers
    fn layer_wms(&self, layer_names: &[String], bbox: &BoundingBox, crs_authid: &str)
        -> WmsReference;

    /// Mirror the layer group hierarchy
    async fn create_groups(&self, groups: &[LayerGroup]) -> AdapterResult<PublishLog>;

    /// Finalization run once after the per-layer loop
    async fn close_publishing(&self) -> AdapterResult<PublishLog>;

    /// Remove a published layer and its style
    async fn unpublish_data(&self, layer_name: &str) -> AdapterResult<PublishLog>;
}

/// Metadata publishing contract
#[async_trait]
pub trait MetadataCatalog: CatalogServer {
    /// Serialize and upload the layer's metadata record
    async fn publish_layer_metadata(
        &self,
        layer: &dyn MapLayer,
        wms: Option<&WmsReference>,
    ) -> AdapterResult<PublishLog>;

    /// Dereferenceable URL of the record with the given content id
    fn metadata_url(&self, content_id: &str) -> String;
}
