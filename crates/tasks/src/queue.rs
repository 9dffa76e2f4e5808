//! Queue channel types: the handoff between submitters and the worker.

use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use relforge_kv::KvStorage;

use crate::{logbuf::TaskLogHandle, scope::TaskScope};

/// Queue channel capacity. Admission keeps the effective depth at one for
/// `run_task`; the slack exists so `add_task` submissions can stack without
/// the submitter blocking immediately.
pub const TASK_QUEUE_CAPACITY: usize = 16;

/// What a job closure returns.
pub type JobResult = anyhow::Result<()>;

/// Boxed job future.
pub type JobFuture = BoxFuture<'static, JobResult>;

/// A job closure as submitted by callers. Invoked once by the worker with
/// the task's context.
pub type JobFn = Box<dyn FnOnce(JobContext) -> JobFuture + Send + 'static>;

/// Fully wrapped job ready for the worker: timeout bound, log sink
/// injected, cancellation mapped to the [`crate::JobCanceled`] sentinel.
pub(crate) type WrappedJobFn = Box<dyn FnOnce() -> JobFuture + Send + 'static>;

/// Everything a job closure gets to work with.
#[derive(Clone)]
pub struct JobContext {
    scope: TaskScope,
    storage: Arc<dyn KvStorage>,
    log: TaskLogHandle,
}

impl JobContext {
    /// Assembles a context. The worker does this for real tasks; job
    /// implementations use it to drive their closures directly in tests.
    pub fn new(
        scope: TaskScope,
        storage: Arc<dyn KvStorage>,
        log: TaskLogHandle,
    ) -> Self {
        Self {
            scope,
            storage,
            log,
        }
    }

    /// The task's cancellation scope. Every I/O operation the job performs
    /// should observe it.
    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    /// The host storage handle remembered by the manager.
    pub fn storage(&self) -> &Arc<dyn KvStorage> {
        &self.storage
    }

    /// The task's log sink.
    pub fn log(&self) -> &TaskLogHandle {
        &self.log
    }

    /// Appends a progress line to the task log.
    pub fn log_line(&self, line: &str) {
        self.log.append_line(line);
    }
}

/// One queued unit of work, owned by the channel message.
pub struct QueuedJob {
    pub(crate) uuid: Uuid,
    pub(crate) scope: TaskScope,
    pub(crate) storage: Arc<dyn KvStorage>,
    pub(crate) run: WrappedJobFn,
}

impl QueuedJob {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}
