//! GeoNetwork adapter
//!
//! Renders layer metadata as an ISO 19139 record and uploads it through the
//! GeoNetwork records API, overwriting any record with the same identifier.
//! Write requests need the XSRF token GeoNetwork hands out as a cookie.

use async_trait::async_trait;
use chrono::Utc;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::http::{CatalogHttp, CatalogRequest};
use super::{
    finish, AdapterResult, CatalogServer, MetadataCatalog, PublishLog, ServerContext,
    ServerKind, WmsReference,
};
use crate::layers::{uuid_for_layer, BoundingBox, LayerKind, MapLayer};

const RECORD_TEMPLATE: &str = include_str!("../../templates/iso19139.hbs");

/// Metadata profile the records follow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataProfile {
    #[default]
    Default,
    Inspire,
    Dutch,
}

impl MetadataProfile {
    fn standard(&self) -> (&'static str, &'static str) {
        match self {
            Self::Default => ("ISO 19115:2003/19139", "1.0"),
            Self::Inspire => (
                "ISO 19115:2003/19139 (INSPIRE Technical Guidelines)",
                "2.0",
            ),
            Self::Dutch => (
                "ISO 19115 Nederlands metadata profiel op ISO 19115 voor geografie",
                "2.0",
            ),
        }
    }
}

impl std::str::FromStr for MetadataProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "inspire" => Ok(Self::Inspire),
            "dutch" => Ok(Self::Dutch),
            other => Err(format!("unknown metadata profile '{other}'")),
        }
    }
}

/// Persisted GeoNetwork configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeonetworkConfig {
    pub name: String,
    /// Base URL, e.g. `http://localhost:8080/geonetwork`
    pub url: String,
    #[serde(default)]
    pub authid: String,
    #[serde(default)]
    pub profile: MetadataProfile,
}

impl GeonetworkConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            authid: String::new(),
            profile: MetadataProfile::Default,
        }
    }
}

#[derive(Debug, Serialize)]
struct KeywordGroup {
    thesaurus: String,
    words: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OnlineResource {
    name: String,
    link_type: String,
    url: String,
    description: String,
}

/// Values handed to the ISO 19139 template
#[derive(Debug, Serialize)]
struct RecordData {
    uuid: String,
    identifier: String,
    parent_identifier: String,
    language: String,
    hierarchy_level: String,
    title: String,
    abstract_text: String,
    date_stamp: String,
    standard_name: &'static str,
    standard_version: &'static str,
    contacts: Vec<crate::layers::metadata::Contact>,
    keywords: Vec<KeywordGroup>,
    categories: Vec<String>,
    licenses: Vec<String>,
    rights: Vec<String>,
    constraints: Vec<String>,
    crs_authority: String,
    crs_code: String,
    spatial_representation: &'static str,
    bbox: BoundingBox,
    lineage: String,
    wms: Option<WmsReference>,
    wms_get_map: Option<String>,
    links: Vec<OnlineResource>,
}

/// GeoNetwork metadata server
pub struct GeonetworkServer {
    config: GeonetworkConfig,
    http: CatalogHttp,
    templates: Arc<Handlebars<'static>>,
}

impl GeonetworkServer {
    pub fn new(config: GeonetworkConfig, context: &ServerContext) -> AdapterResult<Self> {
        let credentials = context.credentials.resolve(&config.authid);
        let http = CatalogHttp::new(&config.url, credentials, context, true)?;

        let mut templates = Handlebars::new();
        templates.register_template_string("iso19139", RECORD_TEMPLATE)?;

        Ok(Self {
            config,
            http,
            templates: Arc::new(templates),
        })
    }

    pub fn config(&self) -> &GeonetworkConfig {
        &self.config
    }

    fn record_data(&self, layer: &dyn MapLayer, wms: Option<&WmsReference>) -> RecordData {
        let metadata = layer.metadata();
        let crs = if metadata.crs.is_empty() {
            layer.crs_authid()
        } else {
            metadata.crs.as_str()
        };
        let (crs_authority, crs_code) = crs.split_once(':').unwrap_or(("", crs));
        let (standard_name, standard_version) = self.config.profile.standard();

        RecordData {
            uuid: uuid_for_layer(layer),
            identifier: if metadata.identifier.is_empty() {
                layer.name().to_string()
            } else {
                metadata.identifier.clone()
            },
            parent_identifier: metadata.parent_identifier.clone(),
            language: metadata.language.clone(),
            hierarchy_level: if metadata.kind.is_empty() {
                String::from("dataset")
            } else {
                metadata.kind.clone()
            },
            title: if metadata.title.is_empty() {
                layer.name().to_string()
            } else {
                metadata.title.clone()
            },
            abstract_text: metadata.abstract_text.clone(),
            date_stamp: Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            standard_name,
            standard_version,
            contacts: metadata.contacts.clone(),
            keywords: metadata
                .keywords
                .iter()
                .map(|(thesaurus, words)| KeywordGroup {
                    thesaurus: thesaurus.clone(),
                    words: words.clone(),
                })
                .collect(),
            categories: metadata.categories.clone(),
            licenses: metadata.licenses.clone(),
            rights: metadata.rights.clone(),
            constraints: metadata.constraints.clone(),
            crs_authority: crs_authority.to_string(),
            crs_code: crs_code.to_string(),
            spatial_representation: match layer.kind() {
                LayerKind::Raster => "grid",
                _ => "vector",
            },
            bbox: metadata
                .spatial_extents
                .first()
                .copied()
                .unwrap_or_else(|| layer.extent()),
            lineage: metadata.history.join("\n"),
            wms: wms.cloned(),
            wms_get_map: wms.map(WmsReference::get_map_url),
            links: metadata
                .links
                .iter()
                .map(|link| OnlineResource {
                    name: link.name.clone(),
                    link_type: link.link_type.clone(),
                    url: link.url.clone(),
                    description: link.description.clone(),
                })
                .collect(),
        }
    }

    /// Render the ISO 19139 record for a layer
    pub fn render_record(
        &self,
        layer: &dyn MapLayer,
        wms: Option<&WmsReference>,
    ) -> AdapterResult<String> {
        let data = self.record_data(layer, wms);
        Ok(self.templates.render("iso19139", &data)?)
    }

    async fn upload_record(
        &self,
        layer: &dyn MapLayer,
        wms: Option<&WmsReference>,
        log: &mut PublishLog,
    ) -> AdapterResult<()> {
        let record = self.render_record(layer, wms)?;

        let mut request = CatalogRequest::put("/srv/api/records")
            .query("metadataType", "METADATA")
            .query("uuidProcessing", "OVERWRITE")
            .query("publishToAll", "true")
            .header("Accept", "application/json")
            .text(record, "application/xml");
        if let Some(token) = self.xsrf_token().await? {
            request = request.header("X-XSRF-TOKEN", token);
        }

        let response = self.http.send(request).await?;
        let report: serde_json::Value = response.json().await.unwrap_or_default();
        for message in report_errors(&report) {
            log.error(format!(
                "Metadata record of layer '{}' was rejected: {message}",
                layer.name()
            ));
        }

        info!(uuid = %uuid_for_layer(layer), "Published metadata record");
        Ok(())
    }

    /// Fetch a fresh XSRF token, if the server issues one
    async fn xsrf_token(&self) -> AdapterResult<Option<String>> {
        let response = self.http.send_raw(&CatalogRequest::get("/srv/api/me")).await?;
        let token = response
            .cookies()
            .find(|cookie| cookie.name() == "XSRF-TOKEN")
            .map(|cookie| cookie.value().to_string());
        if token.is_none() {
            debug!(server = %self.config.name, "No XSRF token issued");
        }
        Ok(token)
    }
}

/// Collect the messages of a records API processing report
fn report_errors(report: &serde_json::Value) -> Vec<String> {
    report
        .get("errors")
        .and_then(serde_json::Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| match error.get("message").and_then(serde_json::Value::as_str) {
                    Some(message) => message.to_string(),
                    None => error.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CatalogServer for GeonetworkServer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ServerKind {
        ServerKind::MetadataServer
    }

    async fn test_connection(&self) -> bool {
        self.http.probe("/srv/api/site").await
    }
}

#[async_trait]
impl MetadataCatalog for GeonetworkServer {
    #[instrument(skip_all, fields(layer = %layer.name(), server = %self.config.name))]
    async fn publish_layer_metadata(
        &self,
        layer: &dyn MapLayer,
        wms: Option<&WmsReference>,
    ) -> AdapterResult<PublishLog> {
        let mut log = PublishLog::new();

        if self.config.profile == MetadataProfile::Inspire && layer.metadata().categories.is_empty()
        {
            log.warn(format!(
                "Layer '{}' has no topic category, required by the INSPIRE profile",
                layer.name()
            ));
        }

        let result = self.upload_record(layer, wms, &mut log).await;
        finish(result, log)
    }

    fn metadata_url(&self, content_id: &str) -> String {
        self.http.url(&format!("/srv/api/records/{content_id}"))
    }
}
