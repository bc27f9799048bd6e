//! Publish task behaviour against in-memory server doubles

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{CallLog, MockGeodata, MockMetadata, TestLayer, TestProject};
use geobridge::layers::{uuid_for_layer, BoundingBox, Project};
use geobridge::publish::{MetadataPolicy, PublishRequest, PublishTask, TaskStatus};
use geobridge::report::{ReportPresenter, TextReport};

#[tokio::test]
async fn test_full_run_publishes_data_then_metadata() {
    let log = CallLog::default();
    let geodata = Arc::new(MockGeodata::with_log(log.clone()));
    let metadata = Arc::new(MockMetadata::with_log(log.clone()));

    let task = PublishTask::new(
        PublishRequest::new(["roads", "lakes"]),
        TestProject::valid(&["roads", "lakes"]),
    )
    .with_geodata_server(geodata.clone())
    .with_metadata_server(metadata);

    let outcome = task.run().await;

    assert!(outcome.success());
    assert!(outcome.exception.is_none());
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.values().all(|r| !r.has_errors()));

    let roads_uuid = uuid_for_layer(&TestLayer::new("roads", true));
    assert_eq!(
        log.calls(),
        vec![
            "prepare:false".to_string(),
            "data:roads".to_string(),
            format!("link:roads:http://mock/records/{roads_uuid}"),
            "metadata:roads:roads".to_string(),
            "data:lakes".to_string(),
            format!(
                "link:lakes:http://mock/records/{}",
                uuid_for_layer(&TestLayer::new("lakes", true))
            ),
            "metadata:lakes:lakes".to_string(),
            "groups".to_string(),
            "close".to_string(),
        ]
    );
    assert_eq!(log.count("groups"), 1);
    assert_eq!(log.count("close"), 1);

    let groups = geodata.groups.lock().unwrap().clone();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].layer_names(), vec!["roads", "lakes"]);
}

#[tokio::test]
async fn test_metadata_without_geodata_server_has_no_wms() {
    let log = CallLog::default();
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::valid(&["roads"]))
        .with_metadata_server(Arc::new(MockMetadata::with_log(log.clone())));

    let outcome = task.run().await;

    assert!(outcome.success());
    assert_eq!(log.calls(), vec!["metadata:roads"]);
}

#[tokio::test]
async fn test_single_point_layer_gets_a_map_extent() {
    let mut wells = TestLayer::new("wells", true);
    wells.extent = BoundingBox::new(5.0, 52.0, 5.0, 52.0);
    let metadata = Arc::new(MockMetadata::default());
    let task = PublishTask::new(
        PublishRequest::new(["wells"]),
        Arc::new(TestProject::grouped(vec![wells])),
    )
    .with_geodata_server(Arc::new(MockGeodata::default()))
    .with_metadata_server(metadata.clone());

    let outcome = task.run().await;

    assert!(outcome.success());
    let references = metadata.references.lock().unwrap().clone();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].bbox, BoundingBox::new(4.0, 51.0, 6.0, 53.0));
    assert!(references[0].get_map_url().contains("bbox=4,51,6,53"));
}

#[tokio::test]
async fn test_one_entry_per_requested_layer() {
    let geodata = Arc::new(MockGeodata {
        failing: vec!["lakes".to_string()],
        ..Default::default()
    });
    let task = PublishTask::new(
        PublishRequest::new(["roads", "lakes", "ghost", "rivers"]),
        TestProject::valid(&["roads", "lakes", "rivers"]),
    )
    .with_geodata_server(geodata.clone());

    let outcome = task.run().await;

    assert!(outcome.success());
    let names: Vec<&str> = outcome.results.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["ghost", "lakes", "rivers", "roads"]);

    assert!(outcome.results["lakes"].errors[0].contains("upload of 'lakes' rejected"));
    assert!(outcome.results["ghost"].errors[0].contains("Layer 'ghost' not found"));
    assert!(!outcome.results["rivers"].has_errors());

    // groups only reference layers the server accepted
    let groups = geodata.groups.lock().unwrap().clone();
    assert_eq!(groups[0].layer_names(), vec!["roads", "rivers"]);
}

#[tokio::test]
async fn test_cancel_keeps_processed_layers_only() {
    let log = CallLog::default();
    let geodata = Arc::new(MockGeodata::with_log(log.clone()));
    let task = PublishTask::new(
        PublishRequest::new(["a", "b", "c"]),
        TestProject::valid(&["a", "b", "c"]),
    )
    .with_geodata_server(geodata.clone());
    *geodata.cancel_after.lock().unwrap() = Some(("b".to_string(), task.handle()));

    let outcome = task.run().await;

    assert_eq!(outcome.status, TaskStatus::Canceled);
    assert_eq!(task.handle().status(), TaskStatus::Canceled);
    let names: Vec<&str> = outcome.results.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a", "b"]);
    // no groups and no finalization after a cancel
    assert_eq!(log.calls(), vec!["prepare:false", "data:a", "data:b"]);
}

#[tokio::test]
async fn test_progress_is_reported_per_layer() {
    let geodata = Arc::new(MockGeodata::default());
    let task = PublishTask::new(
        PublishRequest::new(["a", "b", "c"]),
        TestProject::valid(&["a", "b", "c"]),
    )
    .with_geodata_server(geodata.clone());
    *geodata.cancel_after.lock().unwrap() = Some(("b".to_string(), task.handle()));

    task.run().await;

    // canceled before the third layer: last progress is the second layer's
    assert_eq!(task.handle().progress(), 33);
}

#[tokio::test]
async fn test_deny_policy_blocks_data_and_metadata() {
    let log = CallLog::default();
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::invalid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())))
        .with_metadata_server(Arc::new(MockMetadata::with_log(log.clone())))
        .with_policy(MetadataPolicy::Deny);

    let outcome = task.run().await;

    assert!(outcome.success());
    assert_eq!(
        outcome.results["roads"].errors,
        vec![
            "Layer 'roads' has invalid metadata. Layer was not published",
            "Layer 'roads' has invalid metadata. Metadata was not published",
        ]
    );
    assert_eq!(log.count("data:"), 0);
    assert_eq!(log.count("metadata:"), 0);
}

#[tokio::test]
async fn test_allow_policy_publishes_invalid_layers() {
    let log = CallLog::default();
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::invalid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())))
        .with_metadata_server(Arc::new(MockMetadata::with_log(log.clone())))
        .with_policy(MetadataPolicy::Allow);

    let outcome = task.run().await;

    assert!(!outcome.results["roads"].has_errors());
    assert_eq!(log.count("data:roads"), 1);
    assert_eq!(log.count("metadata:roads"), 1);
}

#[tokio::test]
async fn test_allow_only_data_policy_blocks_metadata() {
    let log = CallLog::default();
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::invalid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())))
        .with_metadata_server(Arc::new(MockMetadata::with_log(log.clone())))
        .with_policy(MetadataPolicy::AllowOnlyData);

    let outcome = task.run().await;

    assert_eq!(
        outcome.results["roads"].errors,
        vec!["Layer 'roads' has invalid metadata. Metadata was not published"]
    );
    assert_eq!(log.count("data:roads"), 1);
    assert_eq!(log.count("metadata:"), 0);
}

#[tokio::test]
async fn test_only_symbology_ignores_policy_for_styles() {
    let log = CallLog::default();
    let task = PublishTask::new(
        PublishRequest::new(["roads"]).only_symbology(true),
        TestProject::invalid(&["roads"]),
    )
    .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())))
    .with_policy(MetadataPolicy::Deny);

    let outcome = task.run().await;

    assert!(outcome.success());
    assert_eq!(
        log.calls(),
        vec!["prepare:true", "style:roads", "groups", "close"]
    );
}

#[tokio::test]
async fn test_warnings_collapse_errors_do_not() {
    let geodata = MockGeodata {
        warnings: vec!["style simplified".to_string(), "style simplified".to_string()],
        errors: vec!["field dropped".to_string(), "field dropped".to_string()],
        ..Default::default()
    };
    let metadata = MockMetadata {
        warnings: vec!["style simplified".to_string()],
        ..Default::default()
    };
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::valid(&["roads"]))
        .with_geodata_server(Arc::new(geodata))
        .with_metadata_server(Arc::new(metadata));

    let outcome = task.run().await;

    let report = &outcome.results["roads"];
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.errors, vec!["field dropped", "field dropped"]);
}

#[tokio::test]
async fn test_group_failure_fails_run_and_discards_results() {
    let geodata = MockGeodata {
        fail_groups: true,
        ..Default::default()
    };
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::valid(&["roads"]))
        .with_geodata_server(Arc::new(geodata));

    let outcome = task.run().await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.results.is_empty());
    let trace = outcome.exception.unwrap();
    assert!(trace.contains("Failed to create layer groups on 'mock-geoserver'"));
    assert!(trace.contains("Caused by: group creation failed"));
}

#[tokio::test]
async fn test_selected_fields_reach_the_server() {
    let log = CallLog::default();
    let request = PublishRequest::new(["roads"]).with_fields(
        "roads",
        HashMap::from([("name".to_string(), true), ("id".to_string(), false)]),
    );
    let task = PublishTask::new(request, TestProject::valid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())));

    task.run().await;

    assert_eq!(log.count("data:roads:name"), 1);
}

#[tokio::test]
async fn test_report_only_for_successful_runs() {
    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::valid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata {
            fail_groups: true,
            ..Default::default()
        }));
    let failed = task.run().await;
    let presenter = TextReport::new(Vec::new());
    assert!(!task.finished(&failed, &presenter).unwrap());
    assert!(presenter.into_inner().unwrap().is_empty());

    let task = PublishTask::new(PublishRequest::new(["roads"]), TestProject::valid(&["roads"]))
        .with_geodata_server(Arc::new(MockGeodata::default()));
    let outcome = task.run().await;
    let presenter = TextReport::new(Vec::new());
    assert!(task.finished(&outcome, &presenter as &dyn ReportPresenter).unwrap());
    let text = String::from_utf8(presenter.into_inner().unwrap()).unwrap();
    assert!(text.contains("Data published to: mock-geoserver"));
    assert!(text.contains("[OK] roads"));
}

#[tokio::test]
async fn test_task_can_run_again() {
    let log = CallLog::default();
    let project: Arc<dyn Project> = TestProject::valid(&["roads"]);
    let task = PublishTask::new(PublishRequest::new(["roads"]), project)
        .with_geodata_server(Arc::new(MockGeodata::with_log(log.clone())));

    assert!(task.run().await.success());
    assert!(task.run().await.success());
    assert_eq!(log.count("prepare"), 2);
}
