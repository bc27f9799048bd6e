//! geobridge - publish GIS layers, styles and metadata to catalog servers
//!
//! Layers of a project are pushed to a geodata server (GeoServer), their
//! discovery records to a metadata server (GeoNetwork), optionally importing
//! vector data into a PostGIS database first.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`settings`] - Persisted named settings (server registry backing)
//! - [`auth`] - Credential lookup for configured servers
//! - [`layers`] - Project and layer model, metadata validation
//! - [`style`] - Style conversion for upload
//! - [`export`] - Layer export to portable files
//! - [`servers`] - Server adapters and the server registry
//! - [`publish`] - The cancellable publish task
//! - [`report`] - Report presentation of a finished run
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geobridge::config::Config;
//! use geobridge::layers::FileProject;
//! use geobridge::publish::{PublishRequest, PublishTask};
//! use geobridge::servers::{ServerContext, ServerRegistry};
//! use geobridge::settings::SqliteSettings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteSettings::open(&config.settings.path)?);
//!     let registry = ServerRegistry::open(store, ServerContext::from_config(&config))?;
//!
//!     let project = Arc::new(FileProject::load("project.json".as_ref())?);
//!     let task = PublishTask::new(PublishRequest::new(["roads"]), project)
//!         .with_geodata_server(registry.geodata_server("geoserver")?);
//!     let outcome = task.run().await;
//!     println!("{}", outcome.status);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod layers;
pub mod metrics;
pub mod publish;
pub mod report;
pub mod servers;
pub mod settings;
pub mod style;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{BridgeErrorTrait, Error, ErrorCategory, Result};
    pub use crate::layers::{MapLayer, Project};
    pub use crate::publish::{
        MetadataPolicy, PublishOutcome, PublishRequest, PublishTask, TaskHandle, TaskStatus,
    };
    pub use crate::servers::{GeodataCatalog, MetadataCatalog, ServerFilter, ServerRegistry};
}

// Direct re-exports for convenience
pub use publish::{PublishRequest, PublishTask};
pub use servers::ServerRegistry;
