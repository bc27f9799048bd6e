//! Cancellable publish task
//!
//! The task owns its request and the servers it publishes to. Callers
//! observe it through a cloneable [`TaskHandle`]: progress and status are
//! `watch` channels, cancellation is a flag checked before every layer.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{
    layer_groups, LayerReport, MetadataPolicy, PublishRequest, PublishResult, TaskStatus,
};
use crate::layers::{
    layer_from_name, service_extent, uuid_for_layer, MetadataValidator, Project,
};
use crate::metrics;
use crate::report::{PublishReport, ReportError, ReportPresenter};
use crate::servers::{AdapterError, AdapterResult, GeodataCatalog, MetadataCatalog};
use crate::utils::format_error_chain;

/// User-facing message for a failed run
pub const FATAL_MESSAGE: &str = "Error while publishing. See log for details";

/// Failure outside the per-layer boundary; aborts the whole run
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Failed to prepare geodata server '{server}' for publishing")]
    Prepare {
        server: String,
        #[source]
        source: AdapterError,
    },

    #[error("Failed to create layer groups on '{server}'")]
    Groups {
        server: String,
        #[source]
        source: AdapterError,
    },

    #[error("Failed to finalize publishing on '{server}'")]
    Close {
        server: String,
        #[source]
        source: AdapterError,
    },

    #[error("Publish task is already running")]
    AlreadyRunning,

    #[error("Publish task aborted: {0}")]
    Aborted(String),
}

// ============================================================================
// Task Handle
// ============================================================================

struct HandleInner {
    cancel: watch::Sender<bool>,
    progress: watch::Sender<u8>,
    status: watch::Sender<TaskStatus>,
}

/// Observer and cancellation side of a [`PublishTask`]
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let (progress, _) = watch::channel(0);
        let (status, _) = watch::channel(TaskStatus::Idle);
        Self {
            inner: Arc::new(HandleInner {
                cancel,
                progress,
                status,
            }),
        }
    }

    /// Request cancellation
    ///
    /// Takes effect before the next layer starts; a layer in flight always
    /// finishes. Cancellation is sticky for the lifetime of the task.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Last reported progress, 0-100
    pub fn progress(&self) -> u8 {
        *self.inner.progress.borrow()
    }

    pub fn status(&self) -> TaskStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.inner.progress.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until the task reaches a final status
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.subscribe_status();
        let finished = match rx.wait_for(|status| status.is_finished()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        finished
    }

    fn set_progress(&self, progress: u8) {
        self.inner.progress.send_if_modified(|current| {
            // never report going backwards
            if progress > *current {
                *current = progress;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.inner.status.send_replace(status);
    }

    /// Move to `Running` unless a run is already in progress
    fn begin(&self) -> bool {
        let started = self.inner.status.send_if_modified(|status| {
            if *status == TaskStatus::Running {
                false
            } else {
                *status = TaskStatus::Running;
                true
            }
        });
        if started {
            self.inner.progress.send_replace(0);
        }
        started
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("status", &self.status())
            .field("progress", &self.progress())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of one [`PublishTask::run`]
#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub status: TaskStatus,
    /// Per-layer warnings and errors; empty for failed runs
    pub results: PublishResult,
    /// Formatted error chain of the fatal failure
    pub exception: Option<String>,
}

impl PublishOutcome {
    pub fn success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub(crate) fn failed(trace: String) -> Self {
        Self {
            status: TaskStatus::Failed,
            results: PublishResult::new(),
            exception: Some(trace),
        }
    }
}

enum Flow {
    Completed(PublishResult),
    Canceled(PublishResult),
}

// ============================================================================
// Publish Task
// ============================================================================

/// Publishes a set of project layers to the configured servers
pub struct PublishTask {
    request: PublishRequest,
    project: Arc<dyn Project>,
    geodata: Option<Arc<dyn GeodataCatalog>>,
    metadata: Option<Arc<dyn MetadataCatalog>>,
    policy: MetadataPolicy,
    validator: MetadataValidator,
    handle: TaskHandle,
}

impl PublishTask {
    pub fn new(request: PublishRequest, project: Arc<dyn Project>) -> Self {
        Self {
            request,
            project,
            geodata: None,
            metadata: None,
            policy: MetadataPolicy::default(),
            validator: MetadataValidator::new(),
            handle: TaskHandle::new(),
        }
    }

    pub fn with_geodata_server(mut self, server: Arc<dyn GeodataCatalog>) -> Self {
        self.geodata = Some(server);
        self
    }

    pub fn with_metadata_server(mut self, server: Arc<dyn MetadataCatalog>) -> Self {
        self.metadata = Some(server);
        self
    }

    pub fn with_policy(mut self, policy: MetadataPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn request(&self) -> &PublishRequest {
        &self.request
    }

    /// Publish every requested layer
    ///
    /// Never returns an error: fatal failures come back as a `Failed`
    /// outcome carrying the formatted error chain.
    #[instrument(skip_all, fields(layers = self.request.layer_names.len()))]
    pub async fn run(&self) -> PublishOutcome {
        if !self.handle.begin() {
            warn!("Publish task is already running");
            return PublishOutcome::failed(format_error_chain(&TaskError::AlreadyRunning));
        }

        let started = Instant::now();
        let outcome = match self.publish().await {
            Ok(Flow::Completed(results)) => {
                self.handle.set_progress(100);
                PublishOutcome {
                    status: TaskStatus::Completed,
                    results,
                    exception: None,
                }
            }
            Ok(Flow::Canceled(results)) => {
                info!(processed = results.len(), "Publish task canceled");
                PublishOutcome {
                    status: TaskStatus::Canceled,
                    results,
                    exception: None,
                }
            }
            Err(e) => {
                let trace = format_error_chain(&e);
                error!(error = %trace, "{FATAL_MESSAGE}");
                PublishOutcome::failed(trace)
            }
        };

        info!(
            status = %outcome.status,
            layers = outcome.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Publish task finished"
        );
        metrics::record_run(outcome.status.as_str());
        self.handle.set_status(outcome.status);
        outcome
    }

    async fn publish(&self) -> Result<Flow, TaskError> {
        if let Some(geodata) = &self.geodata {
            geodata
                .prepare_for_publishing(self.request.only_symbology)
                .await
                .map_err(|source| TaskError::Prepare {
                    server: geodata.name().to_string(),
                    source,
                })?;
        }

        let total = self.request.layer_names.len();
        let mut results = PublishResult::new();
        let mut accepted: Vec<String> = Vec::new();

        for (i, name) in self.request.layer_names.iter().enumerate() {
            if self.handle.is_canceled() {
                return Ok(Flow::Canceled(results));
            }
            self.handle.set_progress((i * 100 / total) as u8);

            let layer_started = Instant::now();
            let mut report = LayerReport::default();
            match self.publish_layer(name, &mut report).await {
                Ok(true) => accepted.push(name.clone()),
                Ok(false) => {}
                Err(e) => {
                    let (e, log) = e.into_parts();
                    report.absorb(log);
                    let trace = format_error_chain(&e);
                    error!(layer = %name, error = %trace, "Failed to publish layer");
                    report.error(trace);
                }
            }

            metrics::record_layer(
                self.metrics_target(),
                layer_started.elapsed().as_secs_f64(),
                report.has_errors(),
            );
            debug!(
                layer = %name,
                warnings = report.warnings.len(),
                errors = report.errors.len(),
                "Layer processed"
            );
            results.insert(name.clone(), report);
        }

        if let Some(geodata) = &self.geodata {
            let groups = layer_groups(self.project.layer_tree(), &accepted);
            debug!(groups = groups.len(), "Mirroring layer groups");
            let log = geodata
                .create_groups(&groups)
                .await
                .map_err(|source| TaskError::Groups {
                    server: geodata.name().to_string(),
                    source,
                })?;
            log_outside_layers(&log.warnings, &log.errors);

            let log = geodata
                .close_publishing()
                .await
                .map_err(|source| TaskError::Close {
                    server: geodata.name().to_string(),
                    source,
                })?;
            log_outside_layers(&log.warnings, &log.errors);
        }

        Ok(Flow::Completed(results))
    }

    /// Publish one layer; returns whether the geodata server accepted it
    ///
    /// Adapter logs are filed under the layer as they arrive, so whatever
    /// was logged before a failure is kept.
    async fn publish_layer(&self, name: &str, report: &mut LayerReport) -> AdapterResult<bool> {
        let layer = layer_from_name(self.project.as_ref(), name)
            .ok_or_else(|| AdapterError::LayerNotFound(name.to_string()))?;

        let (valid, issues) = self.validator.validate(layer.metadata());
        if !valid {
            debug!(layer = %name, issues = issues.len(), "Layer metadata is not valid");
        }

        let mut accepted = false;
        if let Some(geodata) = &self.geodata {
            if self.request.only_symbology {
                report.absorb(geodata.publish_style(layer.as_ref()).await?);
                accepted = true;
            } else if self.policy.allows_data(valid) {
                let fields = self.request.selected_fields(layer.as_ref());
                report.absorb(geodata.publish_layer(layer.as_ref(), fields.as_deref()).await?);
                accepted = true;

                if let Some(metadata) = &self.metadata {
                    let url = metadata.metadata_url(&uuid_for_layer(layer.as_ref()));
                    report.absorb(geodata.set_layer_metadata_link(name, &url).await?);
                }
            } else {
                warn!(layer = %name, policy = %self.policy, "Data blocked by invalid metadata");
                report.error(format!(
                    "Layer '{name}' has invalid metadata. Layer was not published"
                ));
            }
        }

        if let Some(metadata) = &self.metadata {
            if self.policy.allows_metadata(valid) {
                let wms = self.geodata.as_ref().map(|geodata| {
                    geodata.layer_wms(
                        &[name.to_string()],
                        &service_extent(layer.as_ref()),
                        layer.crs_authid(),
                    )
                });
                report.absorb(
                    metadata
                        .publish_layer_metadata(layer.as_ref(), wms.as_ref())
                        .await?,
                );
            } else {
                warn!(layer = %name, policy = %self.policy, "Metadata blocked by invalid metadata");
                report.error(format!(
                    "Layer '{name}' has invalid metadata. Metadata was not published"
                ));
            }
        }

        Ok(accepted)
    }

    fn metrics_target(&self) -> &'static str {
        match (&self.geodata, self.request.only_symbology) {
            (Some(_), true) => "symbology",
            (Some(_), false) => "data",
            (None, _) => "metadata",
        }
    }

    /// Present the report of a successful run
    ///
    /// Returns whether a report was shown. Unsuccessful runs show nothing;
    /// their exception is surfaced by the caller.
    pub fn finished(
        &self,
        outcome: &PublishOutcome,
        presenter: &dyn ReportPresenter,
    ) -> Result<bool, ReportError> {
        if !outcome.success() {
            if outcome.status == TaskStatus::Failed {
                warn!("{FATAL_MESSAGE}");
            }
            return Ok(false);
        }

        let report = PublishReport::new(
            outcome.results.clone(),
            self.request.only_symbology,
            self.geodata.as_ref().map(|s| s.name().to_string()),
            self.metadata.as_ref().map(|s| s.name().to_string()),
        );
        presenter.present(&report)?;
        Ok(true)
    }
}

/// Logs of group creation and finalization belong to no layer
fn log_outside_layers(warnings: &[String], errors: &[String]) {
    for warning in warnings {
        warn!(stage = "finalize", "{warning}");
    }
    for err in errors {
        error!(stage = "finalize", "{err}");
    }
}
