//! Cooperative cancellation scopes.

use tokio_util::sync::CancellationToken;

/// Hierarchical cancellation scope threaded through a job and every I/O
/// operation it performs. Canceling a scope cancels all of its children;
/// canceling a child leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct TaskScope {
    token: CancellationToken,
}

impl TaskScope {
    /// Creates a root scope.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derives a child scope.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signals cancellation to this scope and all children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the scope is canceled.
    pub async fn canceled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token, for interop with collaborators that take one.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_propagates_to_child() {
        let parent = TaskScope::new();
        let child = parent.child();
        assert!(!child.is_canceled());

        parent.cancel();
        assert!(child.is_canceled());
        child.canceled().await;
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent() {
        let parent = TaskScope::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }
}
