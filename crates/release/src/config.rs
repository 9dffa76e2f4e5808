//! Release pipeline configuration record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use relforge_kv::KvStorage;

use crate::{ReleaseError, ReleaseResult};

/// Storage key of the singleton release configuration record.
pub const STORAGE_KEY_RELEASE_CONFIGURATION: &str = "configuration/release";

/// Operator-provided release settings, loaded on every submission. There is
/// no built-in fallback: releases from an unconfigured plugin are refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// URL of the project git repository.
    pub git_repo_url: String,

    /// Base image of the build container.
    pub from_image: String,

    /// How many distinct trusted keys must have signed the tag.
    pub required_signatures: usize,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReleaseConfig {
    /// Loads the configuration record; a missing record is an error.
    pub async fn load(storage: &Arc<dyn KvStorage>) -> ReleaseResult<Self> {
        match storage.get(STORAGE_KEY_RELEASE_CONFIGURATION).await? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Err(ReleaseError::Config(
                "release configuration is not set".to_owned(),
            )),
        }
    }

    pub async fn save(&self, storage: &Arc<dyn KvStorage>) -> ReleaseResult<()> {
        let data = serde_json::to_vec(self)?;
        storage.put(STORAGE_KEY_RELEASE_CONFIGURATION, data).await?;
        Ok(())
    }
}
