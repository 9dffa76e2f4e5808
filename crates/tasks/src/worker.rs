//! The single long-lived worker task.
//!
//! Exactly one worker is alive per plugin process; it drains the queue
//! channel serially, which is what enforces the at-most-one-running-task
//! invariant. A job failure is isolated to its task; nothing a job does may
//! kill the loop.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::*;

use crate::{
    config::TaskConfig,
    errors::{JobCanceled, JobTimeout, TaskError, TaskResult},
    manager::ManagerShared,
    queue::QueuedJob,
    record::{TaskState, TaskStatus},
    store::TaskStore,
};

/// Attempts for each storage write on the worker's critical path.
const STORAGE_RETRY_ATTEMPTS: u32 = 3;

/// Initial delay between storage retries, doubled per attempt.
const STORAGE_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

pub(crate) async fn worker_task(
    shared: Arc<ManagerShared>,
    mut queue_rx: mpsc::Receiver<QueuedJob>,
) {
    info!("task worker started");

    while let Some(job) = queue_rx.recv().await {
        process_job(&shared, job).await;
    }

    info!("task worker stopped");
}

async fn process_job(shared: &ManagerShared, job: QueuedJob) {
    let uuid = job.uuid;
    let store = TaskStore::new(job.storage.clone());

    // A task canceled while still queued was already recorded by
    // cancel_task; just drop it.
    if job.scope.is_canceled() {
        debug!(%uuid, "discarding canceled queued task");
        shared.remove_handles(uuid);
        return;
    }

    let started = with_storage_retry("mark task running", || {
        store.move_task(TaskState::Queued, TaskState::Running, uuid, |r| {
            r.mark_running(Utc::now())
        })
    })
    .await;

    match started {
        Ok(Some(_)) => {}
        Ok(None) => {
            // The record left the queued prefix under us; nothing to run.
            debug!(%uuid, "queued record gone before start, skipping");
            shared.remove_handles(uuid);
            return;
        }
        Err(e) => {
            // Leave the record for the next restart's reconciliation.
            error!(%uuid, err = %e, "could not mark task running, skipping");
            shared.remove_handles(uuid);
            return;
        }
    }

    debug!(%uuid, "task running");
    let result = (job.run)().await;
    let (status, reason) = classify_result(result);

    let log_text = shared
        .remove_handles(uuid)
        .map(|h| String::from_utf8_lossy(&h.log.snapshot()).into_owned());

    let completed = with_storage_retry("record task completion", || {
        let reason = reason.clone();
        let log_text = log_text.clone();
        store.move_task(TaskState::Running, TaskState::Completed, uuid, move |r| {
            r.complete(status, reason, Utc::now());
            r.log = log_text.filter(|l| !l.is_empty());
        })
    })
    .await;

    match completed {
        Ok(Some(_)) => info!(%uuid, %status, "task completed"),
        Ok(None) => warn!(%uuid, "running record vanished before completion"),
        Err(e) => error!(%uuid, err = %e, "could not record task completion"),
    }

    if let Err(e) = prune_completed_history(&store).await {
        warn!(err = %e, "failed to prune completed task history");
    }
}

/// Maps a finished job's result onto the terminal status and reason.
fn classify_result(result: anyhow::Result<()>) -> (TaskStatus, String) {
    match result {
        Ok(()) => (TaskStatus::Succeeded, String::new()),
        Err(e) if e.downcast_ref::<JobCanceled>().is_some() => {
            (TaskStatus::Canceled, e.to_string())
        }
        Err(e) if e.downcast_ref::<JobTimeout>().is_some() => {
            (TaskStatus::Failed, e.to_string())
        }
        Err(e) => (TaskStatus::Failed, format!("{e:#}")),
    }
}

/// Retries a storage operation with bounded doubling backoff. Only storage
/// errors are retried; anything else is immediately final.
async fn with_storage_retry<T, F, Fut>(op: &str, mut f: F) -> TaskResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TaskResult<T>>,
{
    let mut delay = STORAGE_RETRY_BASE_DELAY;
    for attempt in 1..=STORAGE_RETRY_ATTEMPTS {
        match f().await {
            Err(TaskError::Storage(e)) if attempt < STORAGE_RETRY_ATTEMPTS => {
                warn!(op, attempt, err = %e, "storage operation failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
    unreachable!("retry loop always returns on the final attempt")
}

/// Prunes completed records down to the currently configured history limit,
/// oldest `finished_at` first.
async fn prune_completed_history(store: &TaskStore) -> TaskResult<()> {
    let config = TaskConfig::load(&store.storage()).await?;
    let limit = config.task_history_limit;

    let mut completed = store.list(TaskState::Completed).await?;
    if completed.len() <= limit {
        return Ok(());
    }

    completed.sort_by_key(|r| r.finished_at);
    let excess = completed.len() - limit;
    for record in completed.into_iter().take(excess) {
        debug!(uuid = %record.uuid, "pruning completed task record");
        store.delete(TaskState::Completed, record.uuid).await?;
    }

    Ok(())
}
