//! Task manager configuration record.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use relforge_kv::{KvError, KvStorage};

use crate::TaskResult;

/// Storage key of the singleton configuration record.
pub const STORAGE_KEY_CONFIGURATION: &str = "configuration/tasks_manager";

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default number of completed records kept before pruning.
pub const DEFAULT_TASK_HISTORY_LIMIT: usize = 10;

/// Tunable task manager settings, loaded on every submission so changes take
/// effect without a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Per-task timeout in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Completed-task records retained before pruning, oldest first.
    #[serde(default = "default_task_history_limit")]
    pub task_history_limit: usize,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT.as_secs()
}

fn default_task_history_limit() -> usize {
    DEFAULT_TASK_HISTORY_LIMIT
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            task_history_limit: default_task_history_limit(),
            extra: serde_json::Map::new(),
        }
    }
}

impl TaskConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Loads the configuration record, falling back to defaults when none
    /// has been written yet.
    pub async fn load(storage: &Arc<dyn KvStorage>) -> TaskResult<Self> {
        match storage.get(STORAGE_KEY_CONFIGURATION).await? {
            Some(data) => Ok(serde_json::from_slice(&data).map_err(|e| {
                KvError::MalformedEntry {
                    key: STORAGE_KEY_CONFIGURATION.to_owned(),
                    msg: e.to_string(),
                }
            })?),
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, storage: &Arc<dyn KvStorage>) -> TaskResult<()> {
        let data = serde_json::to_vec(self)?;
        storage.put(STORAGE_KEY_CONFIGURATION, data).await?;
        Ok(())
    }
}
