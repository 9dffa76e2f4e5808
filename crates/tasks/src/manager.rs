//! The task manager: admission, reconciliation, cancellation, status reads.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use chrono::Utc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::*;
use uuid::Uuid;

use relforge_kv::KvStorage;

use crate::{
    config::TaskConfig,
    errors::{JobCanceled, JobTimeout, TaskError, TaskResult},
    logbuf::TaskLogHandle,
    queue::{JobContext, JobFn, QueuedJob, WrappedJobFn, TASK_QUEUE_CAPACITY},
    record::{TaskRecord, TaskState, TaskStatus, REASON_INVALIDATED_TASK},
    scope::TaskScope,
    store::TaskStore,
    worker,
};

/// Live handles for a queued or running task: the scope to signal and the
/// log ring both the job and the log endpoint see.
#[derive(Clone)]
pub(crate) struct TaskHandles {
    pub(crate) scope: TaskScope,
    pub(crate) log: TaskLogHandle,
}

/// State shared between the manager API and the worker task.
pub(crate) struct ManagerShared {
    /// Serializes admission: the busy check, record creation and the channel
    /// send happen under this lock so `Busy` is a truthful global answer.
    /// Never held across a job's own I/O.
    admission: tokio::sync::Mutex<AdmissionState>,

    /// Handles of tasks that are queued or running right now.
    handles: StdMutex<HashMap<Uuid, TaskHandles>>,
}

#[derive(Default)]
struct AdmissionState {
    /// Remembered on the first submission; the worker and cancel paths use
    /// the same namespace afterwards.
    storage: Option<Arc<dyn KvStorage>>,

    /// Whether startup reconciliation has run in this process.
    reconciled: bool,
}

impl ManagerShared {
    fn new() -> Self {
        Self {
            admission: tokio::sync::Mutex::new(AdmissionState::default()),
            handles: StdMutex::new(HashMap::new()),
        }
    }

    fn register_handles(&self, uuid: Uuid, handles: TaskHandles) {
        self.handles
            .lock()
            .expect("task handle lock poisoned")
            .insert(uuid, handles);
    }

    pub(crate) fn get_handles(&self, uuid: Uuid) -> Option<TaskHandles> {
        self.handles
            .lock()
            .expect("task handle lock poisoned")
            .get(&uuid)
            .cloned()
    }

    pub(crate) fn remove_handles(&self, uuid: Uuid) -> Option<TaskHandles> {
        self.handles
            .lock()
            .expect("task handle lock poisoned")
            .remove(&uuid)
    }
}

/// Process-wide coordinator for asynchronous plugin work.
///
/// Created once at plugin initialization and handed to every request handler
/// behind a shared reference. [`TaskManager::new`] returns the queue receiver
/// separately so callers (and tests) decide when to attach the worker via
/// [`TaskManager::spawn_worker`].
pub struct TaskManager {
    shared: Arc<ManagerShared>,
    queue_tx: mpsc::Sender<QueuedJob>,
}

impl TaskManager {
    pub fn new() -> (Self, mpsc::Receiver<QueuedJob>) {
        let (queue_tx, queue_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let manager = Self {
            shared: Arc::new(ManagerShared::new()),
            queue_tx,
        };
        (manager, queue_rx)
    }

    /// Launches the single worker task over the queue receiver.
    pub fn spawn_worker(&self, queue_rx: mpsc::Receiver<QueuedJob>) -> JoinHandle<()> {
        tokio::spawn(worker::worker_task(self.shared.clone(), queue_rx))
    }

    /// Submits a job if no other task is queued or running, otherwise
    /// returns [`TaskError::Busy`].
    pub async fn run_task(
        &self,
        storage: Arc<dyn KvStorage>,
        job: JobFn,
    ) -> TaskResult<Uuid> {
        let mut adm = self.shared.admission.lock().await;
        self.initialize_on_first_use(&mut adm, &storage).await?;

        let config = TaskConfig::load(&storage).await?;
        let store = TaskStore::new(storage.clone());

        if !store.list_uuids(TaskState::Queued).await?.is_empty()
            || !store.list_uuids(TaskState::Running).await?.is_empty()
        {
            return Err(TaskError::Busy);
        }

        self.enqueue(&store, &config, storage, job).await
    }

    /// Submits a job unconditionally; submissions stack in the queue FIFO.
    pub async fn add_task(
        &self,
        storage: Arc<dyn KvStorage>,
        job: JobFn,
    ) -> TaskResult<Uuid> {
        let mut adm = self.shared.admission.lock().await;
        self.initialize_on_first_use(&mut adm, &storage).await?;

        let config = TaskConfig::load(&storage).await?;
        let store = TaskStore::new(storage.clone());

        self.enqueue(&store, &config, storage, job).await
    }

    /// Like [`TaskManager::run_task`] but maps `Busy` to `(None, false)`
    /// instead of an error. No other error is swallowed.
    pub async fn add_optional_task(
        &self,
        storage: Arc<dyn KvStorage>,
        job: JobFn,
    ) -> TaskResult<(Option<Uuid>, bool)> {
        match self.run_task(storage, job).await {
            Ok(uuid) => Ok((Some(uuid), true)),
            Err(TaskError::Busy) => Ok((None, false)),
            Err(e) => Err(e),
        }
    }

    /// Cancels a task. A queued task is recorded canceled immediately; a
    /// running one has its scope signaled and the worker records the final
    /// state when the job returns. Terminal tasks are not cancelable.
    pub async fn cancel_task(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> TaskResult<TaskStatus> {
        let _adm = self.shared.admission.lock().await;
        let store = TaskStore::new(storage);

        let Some((state, record)) = store.find(uuid).await? else {
            return Err(TaskError::UnknownTask(uuid));
        };

        match state {
            TaskState::Completed => Err(TaskError::NotCancelable(uuid)),

            TaskState::Queued => {
                let handles = self.shared.remove_handles(uuid);
                if let Some(h) = &handles {
                    // The worker discards the queued item when it sees the
                    // canceled scope.
                    h.scope.cancel();
                }
                let log_text = handles
                    .map(|h| String::from_utf8_lossy(&h.log.snapshot()).into_owned())
                    .filter(|l| !l.is_empty());

                store
                    .move_task(TaskState::Queued, TaskState::Completed, uuid, |r| {
                        r.complete(TaskStatus::Canceled, "canceled before start", Utc::now());
                        r.log = log_text;
                    })
                    .await?;

                info!(%uuid, "queued task canceled");
                Ok(TaskStatus::Canceled)
            }

            TaskState::Running => match self.shared.get_handles(uuid) {
                Some(h) => {
                    h.scope.cancel();
                    info!(%uuid, "running task cancellation signaled");
                    Ok(TaskStatus::Canceled)
                }
                None => {
                    // A running record with no live scope belongs to a dead
                    // process; reconciliation will invalidate it.
                    warn!(%uuid, "no live scope for running task, cannot cancel");
                    Ok(record.status)
                }
            },
        }
    }

    /// Reads a task record, wherever it currently lives.
    pub async fn task_status(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> TaskResult<Option<TaskRecord>> {
        let store = TaskStore::new(storage);
        Ok(store.find(uuid).await?.map(|(_, record)| record))
    }

    /// Reads a task's log: the live ring while the task is queued/running,
    /// the persisted capture afterwards.
    pub async fn task_log(
        &self,
        storage: Arc<dyn KvStorage>,
        uuid: Uuid,
    ) -> TaskResult<Option<Vec<u8>>> {
        if let Some(h) = self.shared.get_handles(uuid) {
            return Ok(Some(h.log.snapshot()));
        }

        let store = TaskStore::new(storage);
        Ok(store
            .find(uuid)
            .await?
            .and_then(|(_, record)| record.log.map(String::into_bytes)))
    }

    /// Lists every known task across all state prefixes, oldest first. A
    /// uuid mid-move shows up once, in its most advanced state.
    pub async fn list_tasks(
        &self,
        storage: Arc<dyn KvStorage>,
    ) -> TaskResult<Vec<TaskRecord>> {
        let store = TaskStore::new(storage);

        let mut seen: HashMap<Uuid, TaskRecord> = HashMap::new();
        for state in [TaskState::Completed, TaskState::Running, TaskState::Queued] {
            for record in store.list(state).await? {
                seen.entry(record.uuid).or_insert(record);
            }
        }

        let mut records: Vec<_> = seen.into_values().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// First-use initialization: remember the storage handle and invalidate
    /// every queued/running record left behind by a previous process. No
    /// worker is executing those, so they can never progress.
    async fn initialize_on_first_use(
        &self,
        adm: &mut AdmissionState,
        storage: &Arc<dyn KvStorage>,
    ) -> TaskResult<()> {
        if adm.storage.is_none() {
            adm.storage = Some(storage.clone());
        }
        if adm.reconciled {
            return Ok(());
        }

        let store = TaskStore::new(storage.clone());
        for state in [TaskState::Queued, TaskState::Running] {
            for uuid in store.list_uuids(state).await? {
                let moved = store
                    .move_task(state, TaskState::Completed, uuid, |r| {
                        r.complete(TaskStatus::Canceled, REASON_INVALIDATED_TASK, Utc::now())
                    })
                    .await;
                match moved {
                    Ok(Some(_)) => info!(%uuid, from = %state, "invalidated stale task"),
                    Ok(None) => {}
                    // Keep sweeping; whatever is left gets another chance on
                    // the next restart.
                    Err(e) => warn!(%uuid, from = %state, err = %e, "failed to invalidate stale task"),
                }
            }
        }

        adm.reconciled = true;
        Ok(())
    }

    /// Persists a fresh queued record and hands the wrapped job to the
    /// worker. Called with the admission lock held; if the channel is full
    /// the submitter waits here.
    async fn enqueue(
        &self,
        store: &TaskStore,
        config: &TaskConfig,
        storage: Arc<dyn KvStorage>,
        job: JobFn,
    ) -> TaskResult<Uuid> {
        let record = TaskRecord::new();
        let uuid = record.uuid;
        store.put(TaskState::Queued, &record).await?;

        let scope = TaskScope::new();
        let log = TaskLogHandle::new();
        self.shared.register_handles(
            uuid,
            TaskHandles {
                scope: scope.clone(),
                log: log.clone(),
            },
        );

        let run = wrap_job(job, scope.clone(), storage.clone(), log, config.task_timeout());
        let queued = QueuedJob {
            uuid,
            scope,
            storage,
            run,
        };

        if self.queue_tx.send(queued).await.is_err() {
            self.shared.remove_handles(uuid);
            return Err(TaskError::WorkerExited);
        }

        debug!(%uuid, "task queued");
        Ok(uuid)
    }
}

/// Wraps a user job closure for the worker: binds the task timeout, injects
/// the log sink, and turns scope cancellation into the [`JobCanceled`]
/// sentinel so the worker records `Canceled` rather than `Failed`.
///
/// The user closure runs in its own spawned task. When the scope is canceled
/// or the timeout fires, the wrapper returns immediately and the closure
/// finishes in the background with its result discarded; a late business
/// error cannot overwrite the recorded outcome.
pub(crate) fn wrap_job(
    job: JobFn,
    scope: TaskScope,
    storage: Arc<dyn KvStorage>,
    log: TaskLogHandle,
    timeout: Duration,
) -> WrappedJobFn {
    Box::new(move || {
        Box::pin(async move {
            let ctx = JobContext::new(scope.clone(), storage, log);
            let mut inner = tokio::spawn((job)(ctx));

            tokio::select! {
                res = &mut inner => match res {
                    Ok(job_result) => job_result,
                    Err(e) => Err(anyhow::anyhow!("job panicked: {e}")),
                },
                () = scope.canceled() => Err(JobCanceled.into()),
                () = tokio::time::sleep(timeout) => {
                    scope.cancel();
                    Err(JobTimeout.into())
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relforge_kv::MemKv;

    use super::*;

    fn noop_job() -> JobFn {
        Box::new(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn mem_storage() -> Arc<dyn KvStorage> {
        Arc::new(MemKv::new())
    }

    async fn seed_record(
        storage: &Arc<dyn KvStorage>,
        state: TaskState,
        status: TaskStatus,
    ) -> Uuid {
        let store = TaskStore::new(storage.clone());
        let mut record = TaskRecord::new();
        if status == TaskStatus::Running {
            record.mark_running(Utc::now());
        }
        store.put(state, &record).await.unwrap();
        record.uuid
    }

    #[tokio::test]
    async fn test_run_task_busy_rejection() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let first = manager
            .run_task(storage.clone(), noop_job())
            .await
            .unwrap();

        let second = manager.run_task(storage.clone(), noop_job()).await;
        assert!(matches!(second, Err(TaskError::Busy)));

        // the only queued item is the first submission
        let queued = queue_rx.recv().await.unwrap();
        assert_eq!(queued.uuid(), first);

        let store = TaskStore::new(storage);
        let record = store.get(TaskState::Queued, first).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_run_task_busy_with_preexisting_running_record() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        // prime the manager so reconciliation does not sweep the seed away
        let warmup = manager
            .run_task(storage.clone(), noop_job())
            .await
            .unwrap();
        assert_eq!(queue_rx.recv().await.unwrap().uuid(), warmup);
        let store = TaskStore::new(storage.clone());
        store.delete(TaskState::Queued, warmup).await.unwrap();

        let running = seed_record(&storage, TaskState::Running, TaskStatus::Running).await;

        let rejected = manager.run_task(storage.clone(), noop_job()).await;
        assert!(matches!(rejected, Err(TaskError::Busy)));

        store.delete(TaskState::Running, running).await.unwrap();

        let accepted = manager
            .run_task(storage.clone(), noop_job())
            .await
            .unwrap();
        assert_eq!(queue_rx.recv().await.unwrap().uuid(), accepted);
    }

    #[tokio::test]
    async fn test_first_use_reconciles_stale_records() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let stale_queued = seed_record(&storage, TaskState::Queued, TaskStatus::Queued).await;
        let stale_running =
            seed_record(&storage, TaskState::Running, TaskStatus::Running).await;

        let fresh = manager
            .run_task(storage.clone(), noop_job())
            .await
            .unwrap();

        let store = TaskStore::new(storage);
        for stale in [stale_queued, stale_running] {
            let (state, record) = store.find(stale).await.unwrap().unwrap();
            assert_eq!(state, TaskState::Completed);
            assert_eq!(record.status, TaskStatus::Canceled);
            assert_eq!(record.reason, REASON_INVALIDATED_TASK);
            assert!(record.finished_at.is_some());
        }

        let (state, _) = store.find(fresh).await.unwrap().unwrap();
        assert_eq!(state, TaskState::Queued);
        assert_eq!(queue_rx.recv().await.unwrap().uuid(), fresh);
    }

    #[tokio::test]
    async fn test_add_task_stacks_fifo() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let first = manager.add_task(storage.clone(), noop_job()).await.unwrap();
        let second = manager.add_task(storage.clone(), noop_job()).await.unwrap();
        assert_ne!(first, second);

        assert_eq!(queue_rx.recv().await.unwrap().uuid(), first);
        assert_eq!(queue_rx.recv().await.unwrap().uuid(), second);
    }

    #[tokio::test]
    async fn test_add_optional_task_maps_busy() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let (first, added) = manager
            .add_optional_task(storage.clone(), noop_job())
            .await
            .unwrap();
        assert!(added);
        let first = first.unwrap();

        let (second, added) = manager
            .add_optional_task(storage.clone(), noop_job())
            .await
            .unwrap();
        assert!(!added);
        assert!(second.is_none());

        assert_eq!(queue_rx.recv().await.unwrap().uuid(), first);
    }

    #[tokio::test]
    async fn test_wrapped_job_maps_cancellation() {
        let storage = mem_storage();
        let scope = TaskScope::new();
        let log = TaskLogHandle::new();

        // a job that ignores its scope and blocks until told otherwise
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<anyhow::Error>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let job: JobFn = Box::new(move |_ctx| {
            Box::pin(async move {
                let err = release_rx.await.expect("release channel dropped");
                let _ = done_tx.send(());
                Err(err)
            })
        });

        let wrapped = wrap_job(
            job,
            scope.clone(),
            storage,
            log,
            Duration::from_secs(60),
        );
        let wrapped_handle = tokio::spawn(wrapped());

        scope.cancel();
        let result = wrapped_handle.await.unwrap();
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<JobCanceled>().is_some());

        // the underlying closure is still alive in the background; its late
        // business error goes nowhere
        release_tx
            .send(anyhow::anyhow!("late business error"))
            .unwrap();
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrapped_job_timeout_cancels_scope() {
        let storage = mem_storage();
        let scope = TaskScope::new();
        let log = TaskLogHandle::new();

        let job: JobFn = Box::new(|ctx| {
            Box::pin(async move {
                ctx.scope().canceled().await;
                Ok(())
            })
        });

        let wrapped = wrap_job(
            job,
            scope.clone(),
            storage,
            log,
            Duration::from_millis(20),
        );
        let err = wrapped().await.unwrap_err();
        assert!(err.downcast_ref::<JobTimeout>().is_some());
        assert!(scope.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_task_on_queued_record() {
        let (manager, mut queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let uuid = manager
            .run_task(storage.clone(), noop_job())
            .await
            .unwrap();

        let status = manager.cancel_task(storage.clone(), uuid).await.unwrap();
        assert_eq!(status, TaskStatus::Canceled);

        let store = TaskStore::new(storage.clone());
        let (state, record) = store.find(uuid).await.unwrap().unwrap();
        assert_eq!(state, TaskState::Completed);
        assert_eq!(record.status, TaskStatus::Canceled);

        // canceling again hits the terminal record
        let again = manager.cancel_task(storage.clone(), uuid).await;
        assert!(matches!(again, Err(TaskError::NotCancelable(u)) if u == uuid));

        // the queued item carries a canceled scope for the worker to discard
        let queued = queue_rx.recv().await.unwrap();
        assert!(queued.scope.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let (manager, _queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let missing = Uuid::new_v4();
        let res = manager.cancel_task(storage, missing).await;
        assert!(matches!(res, Err(TaskError::UnknownTask(u)) if u == missing));
    }

    #[tokio::test]
    async fn test_task_status_and_list() {
        let (manager, _queue_rx) = TaskManager::new();
        let storage = mem_storage();

        let first = manager.add_task(storage.clone(), noop_job()).await.unwrap();
        let second = manager.add_task(storage.clone(), noop_job()).await.unwrap();

        let record = manager
            .task_status(storage.clone(), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TaskStatus::Queued);

        let all = manager.list_tasks(storage.clone()).await.unwrap();
        let uuids: Vec<_> = all.iter().map(|r| r.uuid).collect();
        assert_eq!(uuids, vec![first, second]);

        assert!(manager
            .task_status(storage, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
