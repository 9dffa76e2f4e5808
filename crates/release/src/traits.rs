//! Consumed collaborator interfaces of the release pipeline.
//!
//! The pipeline is parameterized over these traits; production wiring binds
//! them to real git, PGP, container-build and update-repository backends,
//! tests bind them to mocks.

use std::{io::Read, sync::Arc};

use async_trait::async_trait;
use tokio::{io::AsyncRead, sync::mpsc};

use relforge_tasks::TaskScope;

/// A single entry of a cloned repository's worktree.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    /// Path relative to the worktree root.
    pub path: String,

    /// Unix file mode.
    pub mode: u32,

    /// Symlink target when the entry is a symlink. Symlinks carry no
    /// content.
    pub link: Option<String>,

    /// File content for regular files.
    pub content: Vec<u8>,
}

/// Read view of a repository cloned at a tag.
pub trait GitRepo: Send + Sync {
    /// Visits every worktree entry in path order.
    fn for_each_worktree_entry(
        &self,
        visit: &mut dyn FnMut(WorktreeEntry) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>;
}

/// Clones project repositories.
#[async_trait]
pub trait GitSource: Send + Sync + 'static {
    /// Clones `url` at `tag` in memory, submodules included.
    async fn clone_at_tag(
        &self,
        scope: &TaskScope,
        url: &str,
        tag: &str,
    ) -> anyhow::Result<Arc<dyn GitRepo>>;
}

/// Verifies detached tag signatures.
pub trait SignatureVerifier: Send + Sync + 'static {
    /// Succeeds only when at least `required` distinct trusted keys have
    /// produced valid signatures over the tag object.
    fn verify_tag_signatures(
        &self,
        repo: &dyn GitRepo,
        tag: &str,
        trusted_keys: &[String],
        required: usize,
    ) -> anyhow::Result<()>;
}

/// One message of the builder's response stream.
#[derive(Debug, Clone)]
pub enum BuildMessage {
    /// Interleaved log and payload bytes of the build output.
    Stream(Vec<u8>),

    /// Out-of-band status line; forwarded to the task log.
    Aux(String),

    /// Builder-reported failure; aborts extraction immediately.
    Error(String),
}

/// Runs container builds.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync + 'static {
    /// Starts a build with `context` as the build-context tar stream and
    /// `dockerfile_path` naming the Dockerfile inside it. Build output
    /// arrives on the returned channel; the channel closing marks the end
    /// of the stream.
    async fn build(
        &self,
        scope: &TaskScope,
        context: Box<dyn AsyncRead + Send + Unpin>,
        dockerfile_path: &str,
    ) -> anyhow::Result<mpsc::Receiver<BuildMessage>>;
}

/// The downstream update repository.
///
/// `commit` atomically finalizes the repository metadata; until then no
/// published target is observable.
pub trait Publisher: Send + Sync + 'static {
    fn publish_release_target(
        &self,
        tag: &str,
        name: &str,
        content: &mut dyn Read,
    ) -> anyhow::Result<()>;

    fn commit(&self) -> anyhow::Result<()>;
}
