//! # relforge-tasks
//!
//! The `relforge-tasks` crate provides the durable, single-worker job queue
//! embedded inside the plugin process. It owns task identity, state
//! transitions, persistence across restarts, cancellation, timeouts, and the
//! at-most-one-running-task invariant. Job closures are opaque to this crate;
//! the release pipeline hands them in through the manager.

mod config;
mod errors;
mod logbuf;
mod manager;
mod queue;
mod record;
mod scope;
mod store;
mod worker;

pub use config::{TaskConfig, DEFAULT_TASK_HISTORY_LIMIT, DEFAULT_TASK_TIMEOUT};
pub use errors::{JobCanceled, JobTimeout, TaskError, TaskResult};
pub use logbuf::{TaskLogBuffer, TaskLogHandle, TASK_LOG_CAPACITY};
pub use manager::TaskManager;
pub use queue::{JobContext, JobFn, JobFuture, JobResult, QueuedJob, TASK_QUEUE_CAPACITY};
pub use record::{TaskRecord, TaskState, TaskStatus, REASON_INVALIDATED_TASK};
pub use scope::TaskScope;
pub use store::TaskStore;
