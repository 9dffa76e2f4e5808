//! `GET|POST /configure` handlers for task manager and release settings.

use std::sync::Arc;

use serde::Deserialize;

use relforge_kv::KvStorage;
use relforge_release::{
    put_trusted_pgp_public_key, ArtifactBuilder, GitSource, Publisher, ReleaseConfig,
    SignatureVerifier,
};
use relforge_tasks::TaskConfig;

use crate::{
    backend::Backend,
    errors::{BackendError, BackendResult},
};

/// Request body of `POST /configure`. Absent fields keep their current
/// values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureTasksRequest {
    pub task_timeout_secs: Option<u64>,
    pub task_history_limit: Option<usize>,
}

/// Request body of `POST /configure/release`. A full replacement; releases
/// are refused until this has been set once.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigureReleaseRequest {
    pub git_repo_url: String,
    pub from_image: String,
    pub required_signatures: usize,
}

impl<G, V, B, P> Backend<G, V, B, P>
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    pub async fn handle_configure_tasks_read(
        &self,
        storage: Arc<dyn KvStorage>,
    ) -> BackendResult<TaskConfig> {
        Ok(TaskConfig::load(&storage).await?)
    }

    pub async fn handle_configure_tasks_write(
        &self,
        storage: Arc<dyn KvStorage>,
        req: ConfigureTasksRequest,
    ) -> BackendResult<TaskConfig> {
        let mut config = TaskConfig::load(&storage).await?;

        if let Some(timeout_secs) = req.task_timeout_secs {
            if timeout_secs == 0 {
                return Err(BackendError::validation("task_timeout_secs must be positive"));
            }
            config.task_timeout_secs = timeout_secs;
        }
        if let Some(limit) = req.task_history_limit {
            config.task_history_limit = limit;
        }

        config.save(&storage).await?;
        Ok(config)
    }

    pub async fn handle_configure_release_read(
        &self,
        storage: Arc<dyn KvStorage>,
    ) -> BackendResult<ReleaseConfig> {
        Ok(ReleaseConfig::load(&storage).await?)
    }

    pub async fn handle_configure_release_write(
        &self,
        storage: Arc<dyn KvStorage>,
        req: ConfigureReleaseRequest,
    ) -> BackendResult<ReleaseConfig> {
        if req.git_repo_url.is_empty() {
            return Err(BackendError::validation("missing git_repo_url"));
        }
        if req.from_image.is_empty() {
            return Err(BackendError::validation("missing from_image"));
        }

        let config = ReleaseConfig {
            git_repo_url: req.git_repo_url,
            from_image: req.from_image,
            required_signatures: req.required_signatures,
            extra: serde_json::Map::new(),
        };
        config.save(&storage).await?;
        Ok(config)
    }

    /// Registers a trusted PGP public key under `id`.
    pub async fn handle_add_trusted_pgp_public_key(
        &self,
        storage: Arc<dyn KvStorage>,
        id: &str,
        body: &str,
    ) -> BackendResult<()> {
        if id.is_empty() {
            return Err(BackendError::validation("missing key id"));
        }
        if body.is_empty() {
            return Err(BackendError::validation("missing key body"));
        }
        put_trusted_pgp_public_key(&storage, id, body).await?;
        Ok(())
    }
}
