//! GeoServer adapter
//!
//! Publishes styles and layer data through the GeoServer REST API. All
//! resources of a publish run live in one workspace. Vector data is either
//! uploaded as a file or imported into a PostGIS database and registered as a
//! feature type of a PostGIS datastore; raster data is uploaded as GeoTIFF.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use super::http::{CatalogHttp, CatalogRequest};
use super::postgis::PostgisServer;
use super::{
    finish, AdapterError, AdapterResult, CatalogServer, GeodataCatalog, PublishLog,
    ServerContext, ServerKind, WmsReference,
};
use crate::export::{DataFormat, LayerExporter};
use crate::layers::{BoundingBox, LayerKind, MapLayer};
use crate::publish::{GroupMember, LayerGroup};
use crate::style::StyleConverter;
use crate::utils::safe_name;

const SLD_CONTENT_TYPE: &str = "application/vnd.ogc.sld+xml";

/// Where vector data ends up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Upload an exported file to the server
    #[default]
    UploadData,
    /// Import into the linked PostGIS database and reference the table
    StoreInPostgis,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "upload" | "upload_data" => Ok(Self::UploadData),
            "postgis" | "store_in_postgis" => Ok(Self::StoreInPostgis),
            other => Err(format!(
                "unknown storage mode '{other}' (expected upload or postgis)"
            )),
        }
    }
}

fn default_workspace() -> String {
    String::from("geobridge")
}

/// Persisted GeoServer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoserverConfig {
    pub name: String,
    /// Base URL, e.g. `http://localhost:8080/geoserver`
    pub url: String,
    #[serde(default)]
    pub authid: String,
    #[serde(default)]
    pub storage: StorageMode,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// PostGIS datastore name, defaults to the database server name
    #[serde(default)]
    pub datastore: Option<String>,
    /// Registry name of the PostGIS database used with `StoreInPostgis`
    #[serde(default)]
    pub postgisdb: Option<String>,
}

impl GeoserverConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            authid: String::new(),
            storage: StorageMode::UploadData,
            workspace: default_workspace(),
            datastore: None,
            postgisdb: None,
        }
    }
}

/// Kind of REST resource backing a published layer
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    FeatureType { store: String },
    Coverage { store: String },
}

/// GeoServer geodata server
#[derive(Clone)]
pub struct GeoserverServer {
    config: GeoserverConfig,
    http: CatalogHttp,
    styles: Arc<dyn StyleConverter>,
    exporter: Arc<dyn LayerExporter>,
    database: Option<Arc<PostgisServer>>,
    /// Layers published since the last `prepare_for_publishing`
    published: Arc<Mutex<HashMap<String, Resource>>>,
}

impl GeoserverServer {
    pub fn new(config: GeoserverConfig, context: &ServerContext) -> AdapterResult<Self> {
        let credentials = context.credentials.resolve(&config.authid);
        let http = CatalogHttp::new(&config.url, credentials, context, false)?;
        Ok(Self {
            config,
            http,
            styles: context.styles.clone(),
            exporter: context.exporter.clone(),
            database: None,
            published: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &GeoserverConfig {
        &self.config
    }

    pub fn stores_in_postgis(&self) -> bool {
        self.config.storage == StorageMode::StoreInPostgis
    }

    /// Copy of this server importing vector data into `database`
    pub fn with_database(&self, database: Arc<PostgisServer>) -> Self {
        let mut server = self.clone();
        server.database = Some(database);
        server
    }

    fn workspace(&self) -> &str {
        &self.config.workspace
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}:{}", self.workspace(), name)
    }

    fn remember(&self, name: &str, resource: Resource) {
        if let Ok(mut published) = self.published.lock() {
            published.insert(name.to_string(), resource);
        }
    }

    fn published_resource(&self, name: &str) -> Option<Resource> {
        self.published
            .lock()
            .ok()
            .and_then(|published| published.get(name).cloned())
    }

    fn forget_session(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }

    async fn create_workspace(&self) -> AdapterResult<()> {
        self.http
            .send(
                CatalogRequest::post("/rest/workspaces")
                    .json(json!({"workspace": {"name": self.workspace()}})),
            )
            .await?;
        info!(workspace = %self.workspace(), "Created workspace");
        Ok(())
    }

    async fn delete_workspace(&self) -> AdapterResult<()> {
        self.http
            .send_optional(
                CatalogRequest::delete(format!("/rest/workspaces/{}", self.workspace()))
                    .query("recurse", "true"),
            )
            .await?;
        Ok(())
    }

    /// Create or replace a workspace style
    async fn upload_style(&self, name: &str, sld: &str) -> AdapterResult<()> {
        let ws = self.workspace();
        let style_path = format!("/rest/workspaces/{ws}/styles/{name}");

        if self.http.exists(&format!("{style_path}.json")).await? {
            self.http
                .send(CatalogRequest::put(style_path).text(sld, SLD_CONTENT_TYPE))
                .await?;
        } else {
            self.http
                .send(
                    CatalogRequest::post(format!("/rest/workspaces/{ws}/styles"))
                        .query("name", name)
                        .text(sld, SLD_CONTENT_TYPE),
                )
                .await?;
        }
        debug!(style = %name, workspace = %ws, "Uploaded style");
        Ok(())
    }

    async fn convert_and_upload_style(
        &self,
        layer: &dyn MapLayer,
        log: &mut PublishLog,
    ) -> AdapterResult<String> {
        let converted = self.styles.convert(layer)?;
        for warning in converted.warnings {
            log.warn(warning);
        }
        let name = safe_name(layer.name());
        self.upload_style(&name, &converted.sld).await?;
        Ok(name)
    }

    /// Make `style` the default style of a layer; `false` if the layer is absent
    async fn set_default_style(&self, layer_name: &str, style: &str) -> AdapterResult<bool> {
        let response = self
            .http
            .send_optional(
                CatalogRequest::put(format!("/rest/layers/{}", self.qualified(layer_name))).json(
                    json!({
                        "layer": {
                            "defaultStyle": {"name": self.qualified(style)}
                        }
                    }),
                ),
            )
            .await?;
        Ok(response.is_some())
    }

    async fn upload_file(&self, path: &std::path::Path) -> AdapterResult<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|source| AdapterError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    async fn publish_vector_file(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
        name: &str,
        log: &mut PublishLog,
    ) -> AdapterResult<()> {
        let exported = self.exporter.export(layer, fields)?;
        for warning in exported.warnings {
            log.warn(warning);
        }
        let data = self.upload_file(&exported.path).await?;

        self.http
            .send(
                CatalogRequest::put(format!(
                    "/rest/workspaces/{}/datastores/{name}/file.{}",
                    self.workspace(),
                    exported.format.extension()
                ))
                .query("configure", "all")
                .query("update", "overwrite")
                .bytes(data, exported.format.content_type()),
            )
            .await?;

        self.remember(
            name,
            Resource::FeatureType {
                store: name.to_string(),
            },
        );
        Ok(())
    }

    async fn upload_layer_style(
        &self,
        layer: &dyn MapLayer,
        log: &mut PublishLog,
    ) -> AdapterResult<()> {
        let style = self.convert_and_upload_style(layer, log).await?;
        if !self.set_default_style(&style, &style).await? {
            debug!(layer = %layer.name(), "Style uploaded for a layer that is not published");
        }
        Ok(())
    }

    /// Style and data upload; warnings land in `log` even when a later step fails
    async fn upload_layer(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
        log: &mut PublishLog,
    ) -> AdapterResult<()> {
        let name = safe_name(layer.name());
        let style = self.convert_and_upload_style(layer, log).await?;

        match layer.kind() {
            LayerKind::Vector => match self.config.storage {
                StorageMode::UploadData => {
                    self.publish_vector_file(layer, fields, &name, log).await?
                }
                StorageMode::StoreInPostgis => {
                    self.publish_vector_postgis(layer, fields, &name, log).await?
                }
            },
            LayerKind::Raster => self.publish_raster(layer, &name).await?,
            LayerKind::None => {
                return Err(AdapterError::Publish(format!(
                    "Layer '{}' has no publishable data",
                    layer.name()
                )))
            }
        }

        if !self.set_default_style(&name, &style).await? {
            log.warn(format!(
                "Layer '{}' was not found after upload; its style was not assigned",
                layer.name()
            ));
        }
        info!(layer = %layer.name(), workspace = %self.workspace(), "Published layer");
        Ok(())
    }

    async fn ensure_postgis_datastore(&self, database: &PostgisServer) -> AdapterResult<String> {
        let store = self
            .config
            .datastore
            .clone()
            .unwrap_or_else(|| safe_name(database.name()));
        let ws = self.workspace();

        if self
            .http
            .exists(&format!("/rest/workspaces/{ws}/datastores/{store}.json"))
            .await?
        {
            return Ok(store);
        }

        let entries: Vec<serde_json::Value> = database
            .connection_parameters()
            .into_iter()
            .map(|(key, value)| json!({"@key": key, "$": value}))
            .collect();

        self.http
            .send(
                CatalogRequest::post(format!("/rest/workspaces/{ws}/datastores")).json(json!({
                    "dataStore": {
                        "name": store,
                        "connectionParameters": {"entry": entries}
                    }
                })),
            )
            .await?;
        info!(datastore = %store, database = %database.name(), "Created PostGIS datastore");
        Ok(store)
    }

    async fn publish_vector_postgis(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
        name: &str,
        log: &mut PublishLog,
    ) -> AdapterResult<()> {
        let database = self.database.as_ref().ok_or_else(|| {
            AdapterError::MissingDatabase(self.config.postgisdb.clone().unwrap_or_default())
        })?;

        log.merge(database.import_layer(layer, fields).await?);

        let store = self.ensure_postgis_datastore(database).await?;
        let ws = self.workspace();
        let feature_type_path = format!("/rest/workspaces/{ws}/datastores/{store}/featuretypes");

        if self
            .http
            .exists(&format!("{feature_type_path}/{name}.json"))
            .await?
        {
            self.http
                .send_optional(
                    CatalogRequest::delete(format!("/rest/workspaces/{ws}/layers/{name}"))
                        .query("recurse", "true"),
                )
                .await?;
        }

        self.http
            .send(CatalogRequest::post(feature_type_path).json(json!({
                "featureType": {
                    "name": name,
                    "nativeName": database.table_name(layer),
                    "title": layer.name(),
                    "srs": layer.crs_authid(),
                }
            })))
            .await?;

        self.remember(name, Resource::FeatureType { store });
        Ok(())
    }

    async fn publish_raster(&self, layer: &dyn MapLayer, name: &str) -> AdapterResult<()> {
        let exported = self.exporter.export(layer, None)?;
        if exported.format != DataFormat::GeoTiff {
            return Err(AdapterError::Publish(format!(
                "Raster layer '{}' must be exported as GeoTIFF",
                layer.name()
            )));
        }
        let data = self.upload_file(&exported.path).await?;

        self.http
            .send(
                CatalogRequest::put(format!(
                    "/rest/workspaces/{}/coveragestores/{name}/file.geotiff",
                    self.workspace()
                ))
                .query("configure", "all")
                .query("coverageName", name)
                .bytes(data, exported.format.content_type()),
            )
            .await?;

        self.remember(
            name,
            Resource::Coverage {
                store: name.to_string(),
            },
        );
        Ok(())
    }

    fn group_body(&self, group: &LayerGroup) -> serde_json::Value {
        let published: Vec<serde_json::Value> = group
            .layers
            .iter()
            .map(|member| match member {
                GroupMember::Layer(layer) => {
                    json!({"@type": "layer", "name": self.qualified(&safe_name(layer))})
                }
                GroupMember::Group(sub) => {
                    json!({"@type": "layerGroup", "name": self.qualified(&safe_name(&sub.name))})
                }
            })
            .collect();
        let styles: Vec<serde_json::Value> = group.layers.iter().map(|_| json!("")).collect();

        json!({
            "layerGroup": {
                "name": safe_name(&group.name),
                "title": group.name,
                "mode": "NAMED",
                "workspace": {"name": self.workspace()},
                "publishables": {"published": published},
                "styles": {"style": styles},
            }
        })
    }

    /// Create a group after its nested groups
    async fn create_group(&self, group: &LayerGroup) -> AdapterResult<()> {
        for member in &group.layers {
            if let GroupMember::Group(sub) = member {
                Box::pin(self.create_group(sub)).await?;
            }
        }

        let ws = self.workspace();
        let name = safe_name(&group.name);
        self.http
            .send_optional(CatalogRequest::delete(format!(
                "/rest/workspaces/{ws}/layergroups/{name}"
            )))
            .await?;
        self.http
            .send(
                CatalogRequest::post(format!("/rest/workspaces/{ws}/layergroups"))
                    .json(self.group_body(group)),
            )
            .await?;
        debug!(group = %group.name, "Created layer group");
        Ok(())
    }
}

#[async_trait]
impl CatalogServer for GeoserverServer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ServerKind {
        ServerKind::GeodataServer
    }

    async fn test_connection(&self) -> bool {
        self.http.probe("/rest/about/version.json").await
    }
}

#[async_trait]
impl GeodataCatalog for GeoserverServer {
    #[instrument(skip(self), fields(server = %self.config.name))]
    async fn prepare_for_publishing(&self, only_symbology: bool) -> AdapterResult<PublishLog> {
        self.forget_session();
        if only_symbology {
            if !self
                .http
                .exists(&format!("/rest/workspaces/{}.json", self.workspace()))
                .await?
            {
                self.create_workspace().await?;
            }
        } else {
            self.delete_workspace().await?;
            self.create_workspace().await?;
        }
        Ok(PublishLog::new())
    }

    async fn publish_style(&self, layer: &dyn MapLayer) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();
        let result = self.upload_layer_style(layer, &mut log).await;
        finish(result, log)
    }

    async fn publish_layer(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
    ) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();
        let result = self.upload_layer(layer, fields, &mut log).await;
        finish(result, log)
    }

    async fn set_layer_metadata_link(
        &self,
        layer_name: &str,
        url: &str,
    ) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();
        let name = safe_name(layer_name);
        let ws = self.workspace();
        let link = json!({
            "metadataLink": [{
                "type": "text/xml",
                "metadataType": "ISO19115:2003",
                "content": url,
            }]
        });

        let request = match self.published_resource(&name) {
            Some(Resource::FeatureType { store }) => CatalogRequest::put(format!(
                "/rest/workspaces/{ws}/datastores/{store}/featuretypes/{name}"
            ))
            .json(json!({"featureType": {"metadataLinks": link}})),
            Some(Resource::Coverage { store }) => CatalogRequest::put(format!(
                "/rest/workspaces/{ws}/coveragestores/{store}/coverages/{name}"
            ))
            .json(json!({"coverage": {"metadataLinks": link}})),
            None => {
                log.warn(format!(
                    "Layer '{layer_name}' was not published in this session; metadata link not set"
                ));
                return Ok(log);
            }
        };

        self.http.send(request).await?;
        Ok(log)
    }

    fn layer_wms(
        &self,
        layer_names: &[String],
        bbox: &BoundingBox,
        crs_authid: &str,
    ) -> WmsReference {
        let layers = layer_names
            .iter()
            .map(|name| self.qualified(&safe_name(name)))
            .collect::<Vec<_>>()
            .join(",");
        WmsReference {
            url: self.http.url("/wms"),
            layers,
            bbox: *bbox,
            crs: crs_authid.to_string(),
        }
    }

    async fn create_groups(&self, groups: &[LayerGroup]) -> AdapterResult<PublishLog> {
        for group in groups {
            self.create_group(group).await?;
        }
        Ok(PublishLog::new())
    }

    async fn close_publishing(&self) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();
        if let Err(e) = self.http.send(CatalogRequest::post("/rest/reset")).await {
            log.warn(format!("Could not reset GeoServer caches: {e}"));
        }
        self.forget_session();
        Ok(log)
    }

    async fn unpublish_data(&self, layer_name: &str) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();
        let name = safe_name(layer_name);
        let ws = self.workspace();

        let layer = self
            .http
            .send_optional(
                CatalogRequest::delete(format!("/rest/workspaces/{ws}/layers/{name}"))
                    .query("recurse", "true"),
            )
            .await?;
        if layer.is_none() {
            log.warn(format!("Layer '{layer_name}' is not published on {}", self.config.name));
        }

        let purged = self
            .http
            .send_optional(
                CatalogRequest::delete(format!("/rest/workspaces/{ws}/styles/{name}"))
                    .query("purge", "true"),
            )
            .await;
        if let Err(e) = purged {
            return Err(e.with_log(log));
        }
        info!(layer = %layer_name, "Unpublished layer");
        Ok(log)
    }
}
