//! Foreground and background execution of a [`PublishTask`]

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::task::{PublishOutcome, PublishTask, TaskError, TaskHandle, FATAL_MESSAGE};
use super::TaskStatus;
use crate::utils::format_error_chain;

/// Log progress updates until aborted
async fn log_progress(handle: TaskHandle) {
    let mut rx = handle.subscribe_progress();
    while rx.changed().await.is_ok() {
        let progress = *rx.borrow_and_update();
        info!(progress, "Publishing");
    }
}

/// Run the task on the caller's task, blocking until it finishes
///
/// Ctrl-C requests cancellation; the layer in flight still completes.
pub async fn publish(task: &PublishTask) -> PublishOutcome {
    let handle = task.handle();
    let progress = tokio::spawn(log_progress(handle.clone()));

    let run = task.run();
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    warn!("Interrupt received, canceling after the current layer");
                    handle.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
            run.await
        }
    };

    progress.abort();
    outcome
}

/// A task running on the runtime's worker pool
pub struct BackgroundPublish {
    handle: TaskHandle,
    join: JoinHandle<PublishOutcome>,
}

impl BackgroundPublish {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the outcome
    ///
    /// A panicking or aborted task is reported as `Failed`.
    pub async fn wait(self) -> PublishOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = TaskError::Aborted(e.to_string());
                let trace = format_error_chain(&err);
                error!(error = %trace, "{FATAL_MESSAGE}");
                self.handle.set_status(TaskStatus::Failed);
                PublishOutcome::failed(trace)
            }
        }
    }
}

/// Spawn the task and return immediately
pub fn publish_on_background(task: Arc<PublishTask>) -> BackgroundPublish {
    let handle = task.handle();
    let join = tokio::spawn(async move { task.run().await });
    info!("Publish task started in background");
    BackgroundPublish { handle, join }
}
