//! The backend value wiring the task manager to the release collaborators.

use std::sync::Arc;

use relforge_release::{ArtifactBuilder, GitSource, Publisher, SignatureVerifier};
use relforge_tasks::TaskManager;

/// Plugin backend: owns the task manager (with its worker) and the release
/// pipeline's collaborators. Created once at plugin initialization and
/// shared immutably with every request handler.
pub struct Backend<G, V, B, P> {
    pub(crate) manager: TaskManager,
    pub(crate) git: Arc<G>,
    pub(crate) verifier: Arc<V>,
    pub(crate) builder: Arc<B>,
    pub(crate) publisher: Arc<P>,
}

impl<G, V, B, P> Backend<G, V, B, P>
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    /// Creates the backend and attaches the single worker task. Must be
    /// called from within the host's async runtime.
    pub fn new(git: Arc<G>, verifier: Arc<V>, builder: Arc<B>, publisher: Arc<P>) -> Self {
        let (manager, queue_rx) = TaskManager::new();
        manager.spawn_worker(queue_rx);

        Self {
            manager,
            git,
            verifier,
            builder,
            publisher,
        }
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }
}
