//! Typed server variants and the definition factory
//!
//! A persisted server is a `(type name, parameters)` pair. [`Server::from_definition`]
//! maps the type name onto a constructor explicitly; unknown names are an
//! error rather than a lookup at runtime.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::geonetwork::{GeonetworkConfig, GeonetworkServer};
use super::geoserver::{GeoserverConfig, GeoserverServer};
use super::postgis::{PostgisConfig, PostgisServer};
use super::registry::RegistryError;
use super::{CatalogServer, GeodataCatalog, MetadataCatalog, ServerKind};
use crate::auth::{CredentialStore, EnvCredentialStore};
use crate::config::Config;
use crate::export::{FileExporter, LayerExporter};
use crate::style::{SldFileConverter, StyleConverter};
use crate::utils::retry::RetryConfig;

/// Collaborators and HTTP settings handed to every adapter constructor
#[derive(Clone)]
pub struct ServerContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub styles: Arc<dyn StyleConverter>,
    pub exporter: Arc<dyn LayerExporter>,
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl ServerContext {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        styles: Arc<dyn StyleConverter>,
        exporter: Arc<dyn LayerExporter>,
    ) -> Self {
        let defaults = Config::default();
        Self {
            credentials,
            styles,
            exporter,
            timeout: defaults.request_timeout(),
            retry: defaults.retry(),
            user_agent: defaults.http.user_agent,
        }
    }

    /// Context wired from application configuration
    ///
    /// Credentials come from the environment, styles from SLD files and
    /// exports land in `publish.export_dir`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            credentials: Arc::new(EnvCredentialStore),
            styles: Arc::new(SldFileConverter),
            exporter: Arc::new(FileExporter::new(&config.publish.export_dir)),
            timeout: config.request_timeout(),
            user_agent: config.http.user_agent.clone(),
            retry: config.retry(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// A configured server of one of the supported kinds
#[derive(Clone)]
pub enum Server {
    Geoserver(Arc<GeoserverServer>),
    Geonetwork(Arc<GeonetworkServer>),
    Postgis(Arc<PostgisServer>),
}

impl Server {
    pub const GEOSERVER: &'static str = "GeoserverServer";
    pub const GEONETWORK: &'static str = "GeonetworkServer";
    pub const POSTGIS: &'static str = "PostgisServer";

    /// Rebuild a server from its persisted `(type name, parameters)` pair
    pub fn from_definition(
        type_name: &str,
        params: serde_json::Value,
        context: &ServerContext,
    ) -> Result<Self, RegistryError> {
        match type_name {
            Self::GEOSERVER => {
                let config: GeoserverConfig = parse_params(type_name, params)?;
                Ok(Self::Geoserver(Arc::new(GeoserverServer::new(config, context)?)))
            }
            Self::GEONETWORK => {
                let config: GeonetworkConfig = parse_params(type_name, params)?;
                Ok(Self::Geonetwork(Arc::new(GeonetworkServer::new(config, context)?)))
            }
            Self::POSTGIS => {
                let config: PostgisConfig = parse_params(type_name, params)?;
                Ok(Self::Postgis(Arc::new(PostgisServer::new(config, context)?)))
            }
            other => Err(RegistryError::UnknownServerType(other.to_string())),
        }
    }

    /// The `(type name, parameters)` pair persisted for this server
    ///
    /// Only constructor-level configuration is included.
    pub fn definition(&self) -> Result<(String, serde_json::Value), serde_json::Error> {
        let params = match self {
            Self::Geoserver(server) => serde_json::to_value(server.config())?,
            Self::Geonetwork(server) => serde_json::to_value(server.config())?,
            Self::Postgis(server) => serde_json::to_value(server.config())?,
        };
        Ok((self.type_name().to_string(), params))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Geoserver(_) => Self::GEOSERVER,
            Self::Geonetwork(_) => Self::GEONETWORK,
            Self::Postgis(_) => Self::POSTGIS,
        }
    }

    fn as_catalog(&self) -> &dyn CatalogServer {
        match self {
            Self::Geoserver(server) => server.as_ref(),
            Self::Geonetwork(server) => server.as_ref(),
            Self::Postgis(server) => server.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        self.as_catalog().name()
    }

    pub fn kind(&self) -> ServerKind {
        self.as_catalog().kind()
    }

    pub async fn test_connection(&self) -> bool {
        self.as_catalog().test_connection().await
    }

    pub fn as_geodata(&self) -> Option<Arc<dyn GeodataCatalog>> {
        match self {
            Self::Geoserver(server) => Some(server.clone()),
            _ => None,
        }
    }

    pub fn as_metadata(&self) -> Option<Arc<dyn MetadataCatalog>> {
        match self {
            Self::Geonetwork(server) => Some(server.clone()),
            _ => None,
        }
    }

    pub fn as_database(&self) -> Option<Arc<PostgisServer>> {
        match self {
            Self::Postgis(server) => Some(server.clone()),
            _ => None,
        }
    }
}

impl PartialEq for Server {
    /// Servers are equal when their public configuration is equal
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Geoserver(a), Self::Geoserver(b)) => a.config() == b.config(),
            (Self::Geonetwork(a), Self::Geonetwork(b)) => a.config() == b.config(),
            (Self::Postgis(a), Self::Postgis(b)) => a.config() == b.config(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Geoserver(server) => f.debug_tuple("Geoserver").field(server.config()).finish(),
            Self::Geonetwork(server) => f.debug_tuple("Geonetwork").field(server.config()).finish(),
            Self::Postgis(server) => f.debug_tuple("Postgis").field(server.config()).finish(),
        }
    }
}

fn parse_params<T: DeserializeOwned>(
    type_name: &str,
    params: serde_json::Value,
) -> Result<T, RegistryError> {
    serde_json::from_value(params).map_err(|source| RegistryError::InvalidDefinition {
        type_name: type_name.to_string(),
        source,
    })
}
