//! # relforge-release
//!
//! The release pipeline: given a signed tag, clone the project in memory,
//! verify the tag's detached signatures against the trusted key set, stream
//! the worktree into a container build, recover the framed artifact tar from
//! the build output, and publish every artifact into the update repository.
//!
//! The pipeline's collaborators (git, signature verification, the container
//! builder, the publisher) are consumed interfaces; this crate owns the
//! composition and the wire formats between the stages.

mod config;
mod context;
mod dockerfile;
mod errors;
mod extract;
mod job;
mod pgp;
mod traits;

pub use config::{ReleaseConfig, STORAGE_KEY_RELEASE_CONFIGURATION};
pub use context::spawn_context_tar;
pub use dockerfile::{
    generate_service_dockerfile, CONTAINER_ARTIFACTS_DIR, CONTAINER_SOURCE_DIR,
    SERVICE_DIR_IN_CONTEXT_TAR, SERVICE_DOCKERFILE_IN_CONTEXT_TAR,
};
pub use errors::{ExtractError, ReleaseError, ReleaseResult};
pub use extract::{
    extract_artifact_stream, Base64StreamDecoder, FrameDecoder, ARTIFACTS_TAR_START_CODE,
    ARTIFACTS_TAR_STOP_CODE,
};
pub use job::{release_job, ReleaseParams};
pub use pgp::{
    list_trusted_pgp_public_keys, put_trusted_pgp_public_key,
    STORAGE_KEY_PREFIX_TRUSTED_PGP_PUBLIC_KEY,
};
pub use traits::{
    ArtifactBuilder, BuildMessage, GitRepo, GitSource, Publisher, SignatureVerifier,
    WorktreeEntry,
};
