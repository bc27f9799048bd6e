//! Server registry
//!
//! Keeps the configured servers keyed by name and persists them as one named
//! setting holding a JSON array of `[typeName, params]` pairs. Every mutation
//! is persisted immediately; a failed persist leaves the in-memory registry
//! unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::definition::{Server, ServerContext};
use super::postgis::PostgisServer;
use super::{AdapterError, GeodataCatalog, MetadataCatalog, ServerKind};
use crate::settings::{SettingsError, SettingsStore};

/// Settings key holding the persisted registry
pub const SERVERS_SETTING: &str = "geobridge/BridgeServers";

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Server '{0}' not found")]
    NotFound(String),

    #[error("Unknown server type '{0}'")]
    UnknownServerType(String),

    #[error("Server '{0}' is not a {1}")]
    WrongKind(String, &'static str),

    #[error("Invalid parameters for {type_name}: {source}")]
    InvalidDefinition {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored server list is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Cannot create server: {0}")]
    Adapter(#[from] AdapterError),
}

/// Filter applied by [`ServerRegistry::list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFilter {
    Geodata,
    Metadata,
    Database,
    All,
}

impl ServerFilter {
    fn accepts(&self, kind: ServerKind) -> bool {
        match self {
            Self::Geodata => kind == ServerKind::GeodataServer,
            Self::Metadata => kind == ServerKind::MetadataServer,
            Self::Database => kind == ServerKind::AuxiliaryDatabase,
            Self::All => true,
        }
    }
}

/// A persisted `[typeName, params]` pair
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub type_name: String,
    /// The `name` parameter, when present
    pub name: Option<String>,
    pub params: serde_json::Value,
}

/// Persisted definitions; a missing or blank setting is an empty list
fn read_definitions(
    store: &dyn SettingsStore,
) -> Result<Vec<(String, serde_json::Value)>, RegistryError> {
    match store.value(SERVERS_SETTING)? {
        Some(stored) if !stored.trim().is_empty() => Ok(serde_json::from_str(&stored)?),
        _ => {
            debug!("No persisted servers");
            Ok(Vec::new())
        }
    }
}

/// Configured servers of the session
///
/// Created once at startup and handed to whatever builds publish tasks.
pub struct ServerRegistry {
    store: Arc<dyn SettingsStore>,
    context: ServerContext,
    servers: BTreeMap<String, Server>,
}

impl ServerRegistry {
    /// Empty registry backed by `store`; call [`load`](Self::load) to read it
    pub fn new(store: Arc<dyn SettingsStore>, context: ServerContext) -> Self {
        Self {
            store,
            context,
            servers: BTreeMap::new(),
        }
    }

    /// Registry populated from `store`
    pub fn open(store: Arc<dyn SettingsStore>, context: ServerContext) -> Result<Self, RegistryError> {
        let mut registry = Self::new(store, context);
        registry.load()?;
        Ok(registry)
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Read the persisted definitions
    ///
    /// A missing setting means an empty registry. Any malformed or unknown
    /// entry aborts the load and leaves the registry empty; the persisted
    /// value is not touched.
    pub fn load(&mut self) -> Result<(), RegistryError> {
        self.servers.clear();

        let definitions = read_definitions(self.store.as_ref())?;
        let mut servers = BTreeMap::new();
        for (type_name, params) in definitions {
            let server = Server::from_definition(&type_name, params, &self.context)?;
            servers.insert(server.name().to_string(), server);
        }

        info!(count = servers.len(), "Loaded server registry");
        self.servers = servers;
        Ok(())
    }

    fn persist(&self, servers: &BTreeMap<String, Server>) -> Result<(), RegistryError> {
        let definitions = servers
            .values()
            .map(Server::definition)
            .collect::<Result<Vec<_>, _>>()?;
        let value = serde_json::to_string(&definitions)?;
        self.store.set_value(SERVERS_SETTING, &value)?;
        Ok(())
    }

    /// Insert or replace a server by name and persist
    pub fn add(&mut self, server: Server) -> Result<(), RegistryError> {
        let mut servers = self.servers.clone();
        let name = server.name().to_string();
        servers.insert(name.clone(), server);
        self.persist(&servers)?;
        self.servers = servers;
        info!(server = %name, "Server saved");
        Ok(())
    }

    /// Build a server from a definition and add it
    pub fn add_definition(
        &mut self,
        type_name: &str,
        params: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let server = Server::from_definition(type_name, params, &self.context)?;
        self.add(server)
    }

    /// Remove a server by name and persist
    pub fn remove(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.servers.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let mut servers = self.servers.clone();
        servers.remove(name);
        self.persist(&servers)?;
        self.servers = servers;
        info!(server = %name, "Server removed");
        Ok(())
    }

    /// Servers accepted by `filter`, keyed by name
    pub fn list(&self, filter: ServerFilter) -> BTreeMap<String, Server> {
        self.servers
            .iter()
            .filter(|(_, server)| filter.accepts(server.kind()))
            .map(|(name, server)| (name.clone(), server.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<&Server, RegistryError> {
        self.servers
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Geodata server by name
    ///
    /// A server storing data in PostGIS gets its database attached here. A
    /// missing database is not an error yet; publishing a vector layer
    /// through that server will fail for that layer.
    pub fn geodata_server(&self, name: &str) -> Result<Arc<dyn GeodataCatalog>, RegistryError> {
        match self.get(name)? {
            Server::Geoserver(server) => {
                let database = server
                    .config()
                    .postgisdb
                    .as_deref()
                    .filter(|_| server.stores_in_postgis())
                    .and_then(|db| self.database(db).ok());
                match database {
                    Some(database) => Ok(Arc::new(server.with_database(database))),
                    None => Ok(server.clone()),
                }
            }
            _ => Err(RegistryError::WrongKind(name.to_string(), "geodata server")),
        }
    }

    pub fn metadata_server(&self, name: &str) -> Result<Arc<dyn MetadataCatalog>, RegistryError> {
        self.get(name)?
            .as_metadata()
            .ok_or_else(|| RegistryError::WrongKind(name.to_string(), "metadata server"))
    }

    pub fn database(&self, name: &str) -> Result<Arc<PostgisServer>, RegistryError> {
        self.get(name)?
            .as_database()
            .ok_or_else(|| RegistryError::WrongKind(name.to_string(), "PostGIS database"))
    }

    /// Persisted entries as stored, without building any server
    ///
    /// Works when [`load`](Self::load) fails on an unknown or invalid entry.
    pub fn stored_entries(store: &dyn SettingsStore) -> Result<Vec<StoredEntry>, RegistryError> {
        Ok(read_definitions(store)?
            .into_iter()
            .map(|(type_name, params)| StoredEntry {
                name: params
                    .get("name")
                    .and_then(|name| name.as_str())
                    .map(str::to_string),
                type_name,
                params,
            })
            .collect())
    }

    /// Drop every persisted entry called `name`, whatever its type
    pub fn remove_stored_entry(store: &dyn SettingsStore, name: &str) -> Result<(), RegistryError> {
        let definitions = read_definitions(store)?;
        let before = definitions.len();
        let kept: Vec<_> = definitions
            .into_iter()
            .filter(|(_, params)| params.get("name").and_then(|n| n.as_str()) != Some(name))
            .collect();
        if kept.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        store.set_value(SERVERS_SETTING, &serde_json::to_string(&kept)?)?;
        info!(server = %name, "Stored server entry removed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
