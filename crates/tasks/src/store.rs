//! Typed task store over the host KV.
//!
//! Records live under per-state prefixes (`task/queued/<uuid>`, …). Moving a
//! record between states is a put-into-new + delete-from-old pair. The pair
//! is not atomic; a crash in between leaves the record under both prefixes,
//! which readers resolve by preferring the most advanced state and which the
//! startup reconciler cleans up.

use std::sync::Arc;

use tracing::*;
use uuid::Uuid;

use relforge_kv::{KvError, KvStorage};

use crate::{
    record::{TaskRecord, TaskState},
    TaskResult,
};

/// Typed helpers for task records in the host KV namespace.
#[derive(Clone)]
pub struct TaskStore {
    storage: Arc<dyn KvStorage>,
}

impl TaskStore {
    pub fn new(storage: Arc<dyn KvStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> Arc<dyn KvStorage> {
        self.storage.clone()
    }

    /// Storage prefix for a lifecycle state, e.g. `task/queued/`.
    pub fn state_prefix(state: TaskState) -> String {
        format!("task/{}/", state.as_str())
    }

    /// Full storage key for a record.
    pub fn record_key(state: TaskState, uuid: Uuid) -> String {
        format!("task/{}/{}", state.as_str(), uuid)
    }

    pub async fn put(&self, state: TaskState, record: &TaskRecord) -> TaskResult<()> {
        let data = record.encode()?;
        self.storage
            .put(&Self::record_key(state, record.uuid), data)
            .await?;
        Ok(())
    }

    pub async fn get(&self, state: TaskState, uuid: Uuid) -> TaskResult<Option<TaskRecord>> {
        let key = Self::record_key(state, uuid);
        match self.storage.get(&key).await? {
            Some(data) => Ok(Some(TaskRecord::decode(&data).map_err(|e| {
                KvError::MalformedEntry {
                    key,
                    msg: e.to_string(),
                }
            })?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, state: TaskState, uuid: Uuid) -> TaskResult<()> {
        self.storage
            .delete(&Self::record_key(state, uuid))
            .await?;
        Ok(())
    }

    /// Lists the uuids stored under a state prefix. Suffixes that are not
    /// uuids are skipped with a warning; they cannot be ours.
    pub async fn list_uuids(&self, state: TaskState) -> TaskResult<Vec<Uuid>> {
        let suffixes = self.storage.list(&Self::state_prefix(state)).await?;
        let mut uuids = Vec::with_capacity(suffixes.len());
        for suffix in suffixes {
            match suffix.parse::<Uuid>() {
                Ok(uuid) => uuids.push(uuid),
                Err(_) => warn!(%state, %suffix, "skipping foreign entry under task prefix"),
            }
        }
        Ok(uuids)
    }

    /// Loads every record under a state prefix.
    pub async fn list(&self, state: TaskState) -> TaskResult<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for uuid in self.list_uuids(state).await? {
            if let Some(record) = self.get(state, uuid).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Moves a record between state prefixes, applying `mutate` in between.
    ///
    /// Writes the record under the new prefix before deleting the old key,
    /// so a partial failure leaves the record in the more advanced state. A
    /// failed delete is reported but does not fail the move.
    ///
    /// Returns `None` when there is nothing under the source prefix.
    pub async fn move_task(
        &self,
        from: TaskState,
        to: TaskState,
        uuid: Uuid,
        mutate: impl FnOnce(&mut TaskRecord),
    ) -> TaskResult<Option<TaskRecord>> {
        let Some(mut record) = self.get(from, uuid).await? else {
            return Ok(None);
        };

        mutate(&mut record);
        self.put(to, &record).await?;

        if let Err(e) = self.delete(from, uuid).await {
            warn!(%uuid, %from, %to, err = %e, "failed to delete moved task record from old prefix");
        }

        Ok(Some(record))
    }

    /// Looks a uuid up across all state prefixes, preferring the most
    /// advanced state when it appears in more than one (possible only
    /// mid-move).
    pub async fn find(&self, uuid: Uuid) -> TaskResult<Option<(TaskState, TaskRecord)>> {
        for state in [TaskState::Completed, TaskState::Running, TaskState::Queued] {
            if let Some(record) = self.get(state, uuid).await? {
                return Ok(Some((state, record)));
            }
        }
        Ok(None)
    }
}
