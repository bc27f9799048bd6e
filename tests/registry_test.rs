//! Server registry persistence and lookup

mod common;

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use common::test_context;
use geobridge::servers::geoserver::{GeoserverConfig, GeoserverServer, StorageMode};
use geobridge::servers::postgis::{PostgisConfig, PostgisServer};
use geobridge::servers::registry::SERVERS_SETTING;
use geobridge::servers::{RegistryError, Server, ServerFilter, ServerKind, ServerRegistry};
use geobridge::settings::{MemorySettings, SettingsStore, SqliteSettings};

fn geoserver(name: &str, dir: &TempDir) -> Server {
    let mut config = GeoserverConfig::new(name, "http://localhost:8080/geoserver");
    config.authid = "gs".to_string();
    config.workspace = "demo".to_string();
    Server::Geoserver(Arc::new(
        GeoserverServer::new(config, &test_context(dir.path())).unwrap(),
    ))
}

#[test]
fn test_round_trip_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("settings.db");

    let server = geoserver("main", &dir);
    {
        let store = Arc::new(SqliteSettings::open(&db).unwrap());
        let mut registry = ServerRegistry::new(store, test_context(dir.path()));
        registry.add(server.clone()).unwrap();
    }

    let store = Arc::new(SqliteSettings::open(&db).unwrap());
    let registry = ServerRegistry::open(store, test_context(dir.path())).unwrap();
    let servers = registry.list(ServerFilter::All);

    assert_eq!(servers.len(), 1);
    assert_eq!(servers["main"], server);
}

#[test]
fn test_persisted_format_is_type_and_params_pairs() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let mut registry = ServerRegistry::new(store.clone(), test_context(dir.path()));

    registry.add(geoserver("main", &dir)).unwrap();

    let stored: serde_json::Value =
        serde_json::from_str(&store.value(SERVERS_SETTING).unwrap().unwrap()).unwrap();
    assert_eq!(stored[0][0], "GeoserverServer");
    assert_eq!(stored[0][1]["name"], "main");
    assert_eq!(stored[0][1]["workspace"], "demo");
    // only the credential id is persisted
    assert_eq!(stored[0][1]["authid"], "gs");
    assert!(stored[0][1].get("password").is_none());
}

#[test]
fn test_remove_missing_server_does_not_persist() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let mut registry = ServerRegistry::new(store.clone(), test_context(dir.path()));
    registry.add(geoserver("main", &dir)).unwrap();
    let writes = store.write_count();

    let err = registry.remove("nonexistent").unwrap_err();

    assert!(matches!(err, RegistryError::NotFound(name) if name == "nonexistent"));
    assert_eq!(store.write_count(), writes);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_remove_persists() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let mut registry = ServerRegistry::new(store.clone(), test_context(dir.path()));
    registry.add(geoserver("main", &dir)).unwrap();

    registry.remove("main").unwrap();

    assert!(registry.is_empty());
    assert_eq!(store.value(SERVERS_SETTING).unwrap().as_deref(), Some("[]"));
}

#[test]
fn test_unknown_type_aborts_load() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let stored = json!([
        ["GeoserverServer", {"name": "main", "url": "http://localhost/geoserver"}],
        ["MapserverServer", {"name": "legacy"}],
    ])
    .to_string();
    store.set_value(SERVERS_SETTING, &stored).unwrap();
    let writes = store.write_count();

    let mut registry = ServerRegistry::new(store.clone(), test_context(dir.path()));
    let err = registry.load().unwrap_err();

    assert!(matches!(err, RegistryError::UnknownServerType(name) if name == "MapserverServer"));
    assert!(registry.is_empty());
    assert_eq!(store.write_count(), writes);
    assert_eq!(store.value(SERVERS_SETTING).unwrap().unwrap(), stored);
}

#[test]
fn test_invalid_params_fail_load() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    store
        .set_value(SERVERS_SETTING, r#"[["GeonetworkServer", {"url": 5}]]"#)
        .unwrap();

    let result = ServerRegistry::open(store, test_context(dir.path()));

    assert!(matches!(
        result,
        Err(RegistryError::InvalidDefinition { ref type_name, .. }) if type_name == "GeonetworkServer"
    ));
}

#[test]
fn test_filters_and_typed_lookup() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let mut registry = ServerRegistry::new(store, test_context(dir.path()));

    registry.add(geoserver("gs", &dir)).unwrap();
    registry
        .add_definition(
            "GeonetworkServer",
            json!({"name": "gn", "url": "http://localhost/geonetwork", "profile": "inspire"}),
        )
        .unwrap();
    registry
        .add_definition("PostgisServer", json!({"name": "db", "database": "gis"}))
        .unwrap();

    assert_eq!(registry.list(ServerFilter::All).len(), 3);
    assert_eq!(
        registry.list(ServerFilter::Geodata).keys().collect::<Vec<_>>(),
        vec!["gs"]
    );
    assert_eq!(
        registry.list(ServerFilter::Metadata).keys().collect::<Vec<_>>(),
        vec!["gn"]
    );
    assert_eq!(
        registry.list(ServerFilter::Database).keys().collect::<Vec<_>>(),
        vec!["db"]
    );

    assert_eq!(registry.get("gn").unwrap().kind(), ServerKind::MetadataServer);
    assert!(registry.geodata_server("gs").is_ok());
    assert!(registry.metadata_server("gn").is_ok());
    assert_eq!(registry.database("db").unwrap().config().port, 5432);
    assert!(matches!(
        registry.metadata_server("gs"),
        Err(RegistryError::WrongKind(..))
    ));
    assert!(matches!(
        registry.geodata_server("missing"),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn test_add_replaces_by_name() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    let mut registry = ServerRegistry::new(store, test_context(dir.path()));

    registry.add(geoserver("main", &dir)).unwrap();
    let mut config = GeoserverConfig::new("main", "http://other:8080/geoserver");
    config.storage = StorageMode::StoreInPostgis;
    config.postgisdb = Some("db".to_string());
    registry
        .add(Server::Geoserver(Arc::new(
            GeoserverServer::new(config, &test_context(dir.path())).unwrap(),
        )))
        .unwrap();
    let database = PostgisServer::new(PostgisConfig::new("db", "gis"), &test_context(dir.path()))
        .unwrap();
    registry.add(Server::Postgis(Arc::new(database))).unwrap();

    assert_eq!(registry.len(), 2);
    match registry.get("main").unwrap() {
        Server::Geoserver(server) => {
            assert_eq!(server.config().url, "http://other:8080/geoserver");
            assert!(server.stores_in_postgis());
        }
        other => panic!("expected GeoServer, got {other:?}"),
    }
    assert!(registry.geodata_server("main").is_ok());
}

#[test]
fn test_stored_entries_survive_unknown_types() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettings::new());
    store
        .set_value(
            SERVERS_SETTING,
            &json!([
                ["GeoserverServer", {"name": "main", "url": "http://localhost/geoserver"}],
                ["MapserverServer", {"name": "legacy"}],
            ])
            .to_string(),
        )
        .unwrap();
    assert!(ServerRegistry::open(store.clone(), test_context(dir.path())).is_err());

    let entries = ServerRegistry::stored_entries(&*store).unwrap();
    assert_eq!(
        entries
            .iter()
            .map(|e| (e.type_name.as_str(), e.name.as_deref()))
            .collect::<Vec<_>>(),
        vec![("GeoserverServer", Some("main")), ("MapserverServer", Some("legacy"))]
    );

    // dropping the offending entry makes the registry loadable again
    ServerRegistry::remove_stored_entry(&*store, "legacy").unwrap();
    let registry = ServerRegistry::open(store.clone(), test_context(dir.path())).unwrap();
    assert_eq!(registry.list(ServerFilter::All).keys().collect::<Vec<_>>(), vec!["main"]);

    let writes = store.write_count();
    assert!(matches!(
        ServerRegistry::remove_stored_entry(&*store, "legacy"),
        Err(RegistryError::NotFound(name)) if name == "legacy"
    ));
    assert_eq!(store.write_count(), writes);
}

#[test]
fn test_stored_entries_of_empty_store() {
    let store = MemorySettings::new();
    assert!(ServerRegistry::stored_entries(&store).unwrap().is_empty());
}
