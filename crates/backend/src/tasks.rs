//! `GET /task/{uuid}`, `GET /task/{uuid}/log` and `POST /task/{uuid}/cancel`
//! handlers.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use relforge_kv::KvStorage;
use relforge_release::{ArtifactBuilder, GitSource, Publisher, SignatureVerifier};
use relforge_tasks::{TaskError, TaskRecord, TaskStatus};

use crate::{backend::Backend, errors::BackendResult};

/// Response body of `POST /task/{uuid}/cancel`: the state the task resolves
/// to.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub status: TaskStatus,
}

impl<G, V, B, P> Backend<G, V, B, P>
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    /// Returns the task record, wherever it currently lives.
    pub async fn handle_task_status(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> BackendResult<TaskRecord> {
        let record = self
            .manager
            .task_status(storage, uuid)
            .await?
            .ok_or(TaskError::UnknownTask(uuid))?;
        Ok(record)
    }

    /// Returns the task's log bytes: live while it runs, the persisted
    /// capture afterwards. A task without output yields an empty body.
    pub async fn handle_task_log(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> BackendResult<Vec<u8>> {
        // distinguish "unknown task" from "no log yet"
        if self
            .manager
            .task_status(storage.clone(), uuid)
            .await?
            .is_none()
        {
            return Err(TaskError::UnknownTask(uuid).into());
        }

        let log = self.manager.task_log(storage, uuid).await?;
        Ok(log.unwrap_or_default())
    }

    /// Cancels the task. Idempotent: canceling an already-terminal task
    /// reports its terminal state instead of failing.
    pub async fn handle_task_cancel(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> BackendResult<CancelResponse> {
        match self.manager.cancel_task(storage.clone(), uuid).await {
            Ok(status) => Ok(CancelResponse { status }),
            Err(TaskError::NotCancelable(_)) => {
                let record = self.handle_task_status(storage, uuid).await?;
                Ok(CancelResponse {
                    status: record.status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
