//! `POST /release` handler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::*;
use uuid::Uuid;

use relforge_kv::KvStorage;
use relforge_release::{
    list_trusted_pgp_public_keys, release_job, ArtifactBuilder, GitSource, Publisher,
    ReleaseConfig, ReleaseParams, SignatureVerifier,
};

use crate::{
    backend::Backend,
    errors::{BackendError, BackendResult},
};

/// Request body of `POST /release`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseRequest {
    /// Project git repository tag which should be released.
    #[serde(rename = "git-tag", default)]
    pub git_tag: String,

    /// Command run in the root of the project at that tag; expected to
    /// leave the release artifacts in the container's artifacts directory.
    #[serde(default)]
    pub command: String,
}

/// Response body of `POST /release`.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResponse {
    #[serde(rename = "TaskID")]
    pub task_id: Uuid,
}

impl<G, V, B, P> Backend<G, V, B, P>
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    /// Validates the request, resolves the release configuration and
    /// trusted keys, and enqueues the release job. At most one release can
    /// be queued or running at a time.
    pub async fn handle_release(
        &self,
        storage: Arc<dyn KvStorage>,
        req: ReleaseRequest,
    ) -> BackendResult<ReleaseResponse> {
        if req.git_tag.is_empty() {
            return Err(BackendError::validation("missing git-tag"));
        }
        if req.command.is_empty() {
            return Err(BackendError::validation("missing command"));
        }

        let config = ReleaseConfig::load(&storage).await?;
        let trusted_pgp_public_keys = list_trusted_pgp_public_keys(&storage).await?;

        let params = ReleaseParams {
            git_url: config.git_repo_url,
            git_tag: req.git_tag.clone(),
            from_image: config.from_image,
            commands: vec![req.command],
            trusted_pgp_public_keys,
            required_signatures: config.required_signatures,
        };

        let job = release_job(
            params,
            self.git.clone(),
            self.verifier.clone(),
            self.builder.clone(),
            self.publisher.clone(),
        );

        let task_id = self.manager.run_task(storage, job).await?;
        info!(%task_id, tag = %req.git_tag, "release task enqueued");

        Ok(ReleaseResponse { task_id })
    }
}
