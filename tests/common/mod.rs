//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use geobridge::auth::{Credentials, StaticCredentialStore};
use geobridge::export::FileExporter;
use geobridge::layers::metadata::{Contact, Link};
use geobridge::layers::{
    BoundingBox, Field, FieldType, FeatureIter, LayerError, LayerKind, LayerMetadata,
    LayerTreeGroup, LayerTreeNode, MapLayer, Project,
};
use geobridge::publish::{LayerGroup, TaskHandle};
use geobridge::servers::{
    AdapterError, AdapterResult, CatalogServer, GeodataCatalog, MetadataCatalog, PublishLog,
    ServerContext, ServerKind, WmsReference,
};
use geobridge::style::SldFileConverter;
use geobridge::utils::retry::RetryConfig;

/// Metadata document passing validation
pub fn valid_metadata(title: &str) -> LayerMetadata {
    LayerMetadata {
        identifier: title.to_lowercase(),
        language: "eng".to_string(),
        kind: "dataset".to_string(),
        title: title.to_string(),
        abstract_text: format!("{title} of the test area"),
        licenses: vec!["CC-BY-4.0".to_string()],
        crs: "EPSG:4326".to_string(),
        spatial_extents: vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0)],
        contacts: vec![Contact {
            name: "GIS team".to_string(),
            email: "gis@example.org".to_string(),
            ..Default::default()
        }],
        links: vec![Link {
            name: "homepage".to_string(),
            link_type: "WWW:LINK".to_string(),
            url: "https://example.org".to_string(),
            description: String::new(),
        }],
        ..Default::default()
    }
}

/// In-memory vector layer
pub struct TestLayer {
    pub name: String,
    pub source: String,
    pub kind: LayerKind,
    pub fields: Vec<Field>,
    pub extent: BoundingBox,
    pub metadata: LayerMetadata,
}

impl TestLayer {
    pub fn new(name: &str, valid: bool) -> Self {
        Self {
            name: name.to_string(),
            source: format!("/data/{name}.geojson"),
            kind: LayerKind::Vector,
            fields: vec![
                Field::new("id", FieldType::Integer),
                Field::new("name", FieldType::Text),
            ],
            extent: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            metadata: if valid {
                valid_metadata(name)
            } else {
                LayerMetadata::default()
            },
        }
    }
}

impl MapLayer for TestLayer {
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
        Some("Polygon")
    }
    fn fields(&self) -> &[Field] {
        &self.fields
    }
    fn extent(&self) -> BoundingBox {
        self.extent
    }
    fn crs_authid(&self) -> &str {
        "EPSG:4326"
    }
    fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }
    fn style_source(&self) -> Option<&Path> {
        None
    }
    fn features(&self) -> Result<FeatureIter<'_>, LayerError> {
        Ok(Box::new(std::iter::empty()))
    }
}

pub struct TestProject {
    layers: Vec<Arc<dyn MapLayer>>,
    tree: LayerTreeGroup,
}

impl TestProject {
    /// Every layer in one group named `all`
    pub fn grouped(layers: Vec<TestLayer>) -> Self {
        let children = layers
            .iter()
            .map(|layer| LayerTreeNode::Layer(layer.name.clone()))
            .collect();
        Self {
            layers: layers
                .into_iter()
                .map(|layer| Arc::new(layer) as Arc<dyn MapLayer>)
                .collect(),
            tree: LayerTreeGroup {
                name: String::new(),
                children: vec![LayerTreeNode::Group(LayerTreeGroup {
                    name: "all".to_string(),
                    children,
                })],
            },
        }
    }

    pub fn valid(names: &[&str]) -> Arc<dyn Project> {
        Arc::new(Self::grouped(
            names.iter().map(|name| TestLayer::new(name, true)).collect(),
        ))
    }

    pub fn invalid(names: &[&str]) -> Arc<dyn Project> {
        Arc::new(Self::grouped(
            names.iter().map(|name| TestLayer::new(name, false)).collect(),
        ))
    }
}

impl Project for TestProject {
    fn map_layers(&self) -> Vec<Arc<dyn MapLayer>> {
        self.layers.clone()
    }
    fn layer_tree(&self) -> &LayerTreeGroup {
        &self.tree
    }
}

/// Shared, ordered log of adapter calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

/// Geodata server double
#[derive(Default)]
pub struct MockGeodata {
    pub log: CallLog,
    /// Layers whose data upload fails
    pub failing: Vec<String>,
    /// Warnings returned by every data upload
    pub warnings: Vec<String>,
    /// Errors returned by every data upload
    pub errors: Vec<String>,
    pub fail_groups: bool,
    /// Cancel this handle once the named layer is published
    pub cancel_after: Mutex<Option<(String, TaskHandle)>>,
    pub groups: Mutex<Vec<LayerGroup>>,
}

impl MockGeodata {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CatalogServer for MockGeodata {
    fn name(&self) -> &str {
        "mock-geoserver"
    }
    fn kind(&self) -> ServerKind {
        ServerKind::GeodataServer
    }
    async fn test_connection(&self) -> bool {
        true
    }
}

#[async_trait]
impl GeodataCatalog for MockGeodata {
    async fn prepare_for_publishing(&self, only_symbology: bool) -> AdapterResult<PublishLog> {
        self.log.push(format!("prepare:{only_symbology}"));
        Ok(PublishLog::new())
    }

    async fn publish_style(&self, layer: &dyn MapLayer) -> AdapterResult<PublishLog> {
        self.log.push(format!("style:{}", layer.name()));
        Ok(PublishLog::new())
    }

    async fn publish_layer(
        &self,
        layer: &dyn MapLayer,
        fields: Option<&[String]>,
    ) -> AdapterResult<PublishLog> {
        match fields {
            Some(fields) => self
                .log
                .push(format!("data:{}:{}", layer.name(), fields.join(","))),
            None => self.log.push(format!("data:{}", layer.name())),
        }

        if let Ok(mut cancel) = self.cancel_after.lock() {
            if cancel.as_ref().map(|(name, _)| name.as_str()) == Some(layer.name()) {
                if let Some((_, handle)) = cancel.take() {
                    handle.cancel();
                }
            }
        }

        if self.failing.iter().any(|name| name == layer.name()) {
            return Err(AdapterError::Publish(format!(
                "upload of '{}' rejected",
                layer.name()
            )));
        }
        Ok(PublishLog {
            warnings: self.warnings.clone(),
            errors: self.errors.clone(),
        })
    }

    async fn set_layer_metadata_link(
        &self,
        layer_name: &str,
        url: &str,
    ) -> AdapterResult<PublishLog> {
        self.log.push(format!("link:{layer_name}:{url}"));
        Ok(PublishLog::new())
    }

    fn layer_wms(&self, layer_names: &[String], bbox: &BoundingBox, crs: &str) -> WmsReference {
        WmsReference {
            url: "http://mock/wms".to_string(),
            layers: layer_names.join(","),
            bbox: *bbox,
            crs: crs.to_string(),
        }
    }

    async fn create_groups(&self, groups: &[LayerGroup]) -> AdapterResult<PublishLog> {
        self.log.push("groups");
        if self.fail_groups {
            return Err(AdapterError::Publish("group creation failed".to_string()));
        }
        if let Ok(mut stored) = self.groups.lock() {
            *stored = groups.to_vec();
        }
        Ok(PublishLog::new())
    }

    async fn close_publishing(&self) -> AdapterResult<PublishLog> {
        self.log.push("close");
        Ok(PublishLog::new())
    }

    async fn unpublish_data(&self, layer_name: &str) -> AdapterResult<PublishLog> {
        self.log.push(format!("unpublish:{layer_name}"));
        Ok(PublishLog::new())
    }
}

/// Metadata server double
#[derive(Default)]
pub struct MockMetadata {
    pub log: CallLog,
    pub warnings: Vec<String>,
    /// Map service references received with each record
    pub references: Mutex<Vec<WmsReference>>,
}

impl MockMetadata {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CatalogServer for MockMetadata {
    fn name(&self) -> &str {
        "mock-geonetwork"
    }
    fn kind(&self) -> ServerKind {
        ServerKind::MetadataServer
    }
    async fn test_connection(&self) -> bool {
        true
    }
}

#[async_trait]
impl MetadataCatalog for MockMetadata {
    async fn publish_layer_metadata(
        &self,
        layer: &dyn MapLayer,
        wms: Option<&WmsReference>,
    ) -> AdapterResult<PublishLog> {
        match wms {
            Some(wms) => self
                .log
                .push(format!("metadata:{}:{}", layer.name(), wms.layers)),
            None => self.log.push(format!("metadata:{}", layer.name())),
        }
        if let (Some(wms), Ok(mut references)) = (wms, self.references.lock()) {
            references.push(wms.clone());
        }
        Ok(PublishLog {
            warnings: self.warnings.clone(),
            errors: Vec::new(),
        })
    }

    fn metadata_url(&self, content_id: &str) -> String {
        format!("http://mock/records/{content_id}")
    }
}

/// Adapter context with static credentials and no retry delays
pub fn test_context(export_dir: &Path) -> ServerContext {
    let credentials = StaticCredentialStore::new()
        .with("gs", Credentials::new("admin", "geoserver"))
        .with("gn", Credentials::new("admin", "admin"));
    ServerContext::new(
        Arc::new(credentials),
        Arc::new(SldFileConverter),
        Arc::new(FileExporter::new(export_dir)),
    )
    .with_retry(RetryConfig::with_delays(1, 1, 2))
}
