//! Task manager error types.

use uuid::Uuid;

use relforge_kv::KvError;

/// The main error type for task manager operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Admission saw an existing queued or running task.
    #[error("queue busy: a task is already queued or running")]
    Busy,

    /// Cancel was requested on a task in a terminal state.
    #[error("task {0} is not cancelable")]
    NotCancelable(Uuid),

    /// No record exists for the uuid under any state prefix.
    #[error("unknown task {0}")]
    UnknownTask(Uuid),

    /// The worker loop is gone, nothing will drain the queue.
    #[error("task worker exited")]
    WorkerExited,

    /// KV read/write failed.
    #[error("storage: {0}")]
    Storage(#[from] KvError),

    /// A persisted record could not be decoded or encoded.
    #[error("malformed task record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A type alias for `Result<T, TaskError>`.
pub type TaskResult<T> = Result<T, TaskError>;

/// Sentinel returned by a wrapped job whose scope was canceled before the
/// closure finished. The worker records `Canceled` instead of `Failed` when
/// it finds this at the root of the error chain.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("job canceled before completion")]
pub struct JobCanceled;

/// Sentinel returned by a wrapped job whose timeout elapsed. Surfaces as
/// `Failed` with this message as the reason.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("task timeout elapsed")]
pub struct JobTimeout;
