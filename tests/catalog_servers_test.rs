//! GeoServer and GeoNetwork adapters against mock REST endpoints

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::test_context;
use geobridge::layers::{FileProject, Project};
use geobridge::publish::{PublishRequest, PublishTask, TaskStatus};
use geobridge::servers::geonetwork::{GeonetworkConfig, GeonetworkServer, MetadataProfile};
use geobridge::servers::geoserver::{GeoserverConfig, GeoserverServer};
use geobridge::servers::{CatalogServer, GeodataCatalog};

const ROADS: &str = r#"{"type":"FeatureCollection","features":[
    {"type":"Feature","geometry":{"type":"LineString","coordinates":[[4.0,52.0],[5.0,53.0]]},
     "properties":{"id":1,"name":"A1","lanes":4}}]}"#;

/// Project with one vector layer `roads` inside group `transport`
fn roads_project(dir: &TempDir) -> Arc<dyn Project> {
    std::fs::write(dir.path().join("roads.geojson"), ROADS).unwrap();
    let project = r#"{
        "name": "demo",
        "layers": [{
            "name": "roads",
            "kind": "vector",
            "source": "roads.geojson",
            "metadata": {
                "identifier": "roads",
                "language": "eng",
                "type": "dataset",
                "title": "Roads",
                "abstract": "Main roads",
                "licenses": ["CC-BY-4.0"],
                "crs": "EPSG:4326",
                "spatial_extents": [{"xmin": 4.0, "ymin": 52.0, "xmax": 5.0, "ymax": 53.0}],
                "contacts": [{"name": "GIS team"}],
                "links": [{"name": "home", "type": "WWW:LINK", "url": "https://example.org"}]
            }
        }],
        "tree": [{"group": "transport", "children": [{"layer": "roads"}]}]
    }"#;
    Arc::new(FileProject::from_json(project, dir.path()).unwrap())
}

fn geoserver(mock: &MockServer, dir: &TempDir) -> Arc<GeoserverServer> {
    let mut config = GeoserverConfig::new("gs", mock.uri());
    config.authid = "gs".to_string();
    config.workspace = "demo".to_string();
    Arc::new(GeoserverServer::new(config, &test_context(&dir.path().join("export"))).unwrap())
}

fn geonetwork(mock: &MockServer, dir: &TempDir) -> Arc<GeonetworkServer> {
    let mut config = GeonetworkConfig::new("gn", mock.uri());
    config.authid = "gn".to_string();
    Arc::new(GeonetworkServer::new(config, &test_context(dir.path())).unwrap())
}

async fn mount_workspace(mock: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path("/rest/workspaces/demo"))
        .and(query_param("recurse", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/workspaces"))
        .and(body_string_contains("\"demo\""))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/workspaces/demo/styles"))
        .and(query_param("name", "roads"))
        .and(header("content-type", "application/vnd.ogc.sld+xml"))
        .respond_with(ResponseTemplate::new(201))
        .mount(mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/reset"))
        .respond_with(ResponseTemplate::new(200))
        .mount(mock)
        .await;
}

async fn mount_geonetwork(mock: &MockServer, report: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/srv/api/me"))
        .respond_with(
            ResponseTemplate::new(204).insert_header("set-cookie", "XSRF-TOKEN=token-1; Path=/"),
        )
        .mount(mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/srv/api/records"))
        .and(query_param("uuidProcessing", "OVERWRITE"))
        .and(header("x-xsrf-token", "token-1"))
        .and(body_string_contains("Main roads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(report))
        .expect(1)
        .mount(mock)
        .await;
}

#[tokio::test]
async fn test_publish_layer_and_metadata_end_to_end() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;
    let gn_mock = MockServer::start().await;

    mount_workspace(&gs_mock).await;
    Mock::given(method("PUT"))
        .and(path("/rest/workspaces/demo/datastores/roads/file.geojson"))
        .and(query_param("configure", "all"))
        .and(query_param("update", "overwrite"))
        .and(body_string_contains("A1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&gs_mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/layers/demo:roads"))
        .and(body_string_contains("demo:roads"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&gs_mock)
        .await;
    Mock::given(method("PUT"))
        .and(path(
            "/rest/workspaces/demo/datastores/roads/featuretypes/roads",
        ))
        .and(body_string_contains("/srv/api/records/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&gs_mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/workspaces/demo/layergroups"))
        .and(body_string_contains("demo:roads"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&gs_mock)
        .await;
    mount_geonetwork(&gn_mock, serde_json::json!({"errors": []})).await;

    let task = PublishTask::new(PublishRequest::new(["roads"]), roads_project(&dir))
        .with_geodata_server(geoserver(&gs_mock, &dir))
        .with_metadata_server(geonetwork(&gn_mock, &dir));

    let outcome = task.run().await;

    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.exception);
    let report = &outcome.results["roads"];
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    // no style file in the project
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings.iter().next().unwrap().contains("default style"));
    assert_eq!(task.handle().progress(), 100);
}

#[tokio::test]
async fn test_selected_fields_limit_uploaded_properties() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;

    mount_workspace(&gs_mock).await;
    Mock::given(method("PUT"))
        .and(path("/rest/workspaces/demo/datastores/roads/file.geojson"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&gs_mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/rest/layers/demo:roads"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&gs_mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/workspaces/demo/layergroups"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&gs_mock)
        .await;

    let request = PublishRequest::new(["roads"]).with_fields(
        "roads",
        [("name".to_string(), true), ("lanes".to_string(), false)].into(),
    );
    let task = PublishTask::new(request, roads_project(&dir))
        .with_geodata_server(geoserver(&gs_mock, &dir));

    let outcome = task.run().await;
    assert!(outcome.success());

    let upload = gs_mock
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path().ends_with("file.geojson"))
        .unwrap();
    let body = String::from_utf8(upload.body).unwrap();
    assert!(body.contains("\"name\""));
    assert!(!body.contains("lanes"));
}

#[tokio::test]
async fn test_rejected_upload_is_a_layer_error() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;

    mount_workspace(&gs_mock).await;
    Mock::given(method("PUT"))
        .and(path("/rest/workspaces/demo/datastores/roads/file.geojson"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Unsupported geometry"))
        .expect(1)
        .mount(&gs_mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/workspaces/demo/layergroups"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&gs_mock)
        .await;

    let task = PublishTask::new(PublishRequest::new(["roads"]), roads_project(&dir))
        .with_geodata_server(geoserver(&gs_mock, &dir));

    let outcome = task.run().await;

    assert_eq!(outcome.status, TaskStatus::Completed);
    let report = &outcome.results["roads"];
    let errors = &report.errors;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("HTTP 400"), "{errors:?}");
    assert!(errors[0].contains("Unsupported geometry"));
    // the style was converted before the upload failed
    assert_eq!(report.warnings.len(), 1, "{:?}", report.warnings);
    assert!(report.warnings.iter().next().unwrap().contains("default style"));
}

#[tokio::test]
async fn test_rejected_record_keeps_profile_warning() {
    let dir = TempDir::new().unwrap();
    let gn_mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/srv/api/me"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&gn_mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/srv/api/records"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid record"))
        .expect(1)
        .mount(&gn_mock)
        .await;

    let mut config = GeonetworkConfig::new("gn", gn_mock.uri());
    config.profile = MetadataProfile::Inspire;
    let server = Arc::new(GeonetworkServer::new(config, &test_context(dir.path())).unwrap());
    let task = PublishTask::new(PublishRequest::new(["roads"]), roads_project(&dir))
        .with_metadata_server(server);

    let outcome = task.run().await;

    assert!(outcome.success());
    let report = &outcome.results["roads"];
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("Invalid record"), "{:?}", report.errors);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("required by the INSPIRE profile")));
}

#[tokio::test]
async fn test_workspace_failure_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/workspaces"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&gs_mock)
        .await;

    let task = PublishTask::new(PublishRequest::new(["roads"]), roads_project(&dir))
        .with_geodata_server(geoserver(&gs_mock, &dir));

    let outcome = task.run().await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.results.is_empty());
    assert!(outcome.exception.unwrap().contains("forbidden"));
}

#[tokio::test]
async fn test_metadata_report_errors_are_layer_errors() {
    let dir = TempDir::new().unwrap();
    let gn_mock = MockServer::start().await;
    mount_geonetwork(
        &gn_mock,
        serde_json::json!({"errors": [{"message": "Schema validation failed"}]}),
    )
    .await;

    let task = PublishTask::new(PublishRequest::new(["roads"]), roads_project(&dir))
        .with_metadata_server(geonetwork(&gn_mock, &dir));

    let outcome = task.run().await;

    assert!(outcome.success());
    assert_eq!(
        outcome.results["roads"].errors,
        vec!["Metadata record of layer 'roads' was rejected: Schema validation failed"]
    );
}

#[tokio::test]
async fn test_connection_probes() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;
    let gn_mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/about/version.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"about": {}})))
        .mount(&gs_mock)
        .await;

    assert!(geoserver(&gs_mock, &dir).test_connection().await);
    // nothing mounted: 404
    assert!(!geonetwork(&gn_mock, &dir).test_connection().await);

    let unreachable = GeoserverServer::new(
        GeoserverConfig::new("down", "http://127.0.0.1:1/geoserver"),
        &test_context(dir.path()),
    )
    .unwrap();
    assert!(!unreachable.test_connection().await);
}

#[tokio::test]
async fn test_unpublish_missing_layer_warns() {
    let dir = TempDir::new().unwrap();
    let gs_mock = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/workspaces/demo/styles/roads"))
        .and(query_param("purge", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&gs_mock)
        .await;

    let log = geoserver(&gs_mock, &dir)
        .unpublish_data("roads")
        .await
        .unwrap();

    assert_eq!(log.warnings, vec!["Layer 'roads' is not published on gs"]);
    assert!(log.errors.is_empty());
}
