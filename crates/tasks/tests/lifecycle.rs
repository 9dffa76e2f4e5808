//! End-to-end lifecycle tests running the manager together with its worker.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use relforge_kv::{KvStorage, MemKv};
use relforge_tasks::{
    JobFn, TaskConfig, TaskManager, TaskRecord, TaskState, TaskStatus, TaskStore,
};
use uuid::Uuid;

fn mem_storage() -> Arc<dyn KvStorage> {
    Arc::new(MemKv::new())
}

fn started_manager() -> TaskManager {
    let (manager, queue_rx) = TaskManager::new();
    manager.spawn_worker(queue_rx);
    manager
}

/// Polls until the record shows up under `task/completed/` or the deadline
/// passes.
async fn wait_for_completed(storage: &Arc<dyn KvStorage>, uuid: Uuid) -> TaskRecord {
    let store = TaskStore::new(storage.clone());
    for _ in 0..500 {
        if let Some(record) = store.get(TaskState::Completed, uuid).await.unwrap() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {uuid} did not complete in time");
}

async fn wait_for_running(storage: &Arc<dyn KvStorage>, uuid: Uuid) {
    let store = TaskStore::new(storage.clone());
    for _ in 0..500 {
        if store
            .get(TaskState::Running, uuid)
            .await
            .unwrap()
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {uuid} never started running");
}

#[tokio::test]
async fn test_successful_task_reaches_completed() {
    let manager = started_manager();
    let storage = mem_storage();

    let job: JobFn = Box::new(|ctx| {
        Box::pin(async move {
            ctx.log_line("doing the work");
            Ok(())
        })
    });
    let uuid = manager.run_task(storage.clone(), job).await.unwrap();

    let record = wait_for_completed(&storage, uuid).await;
    assert_eq!(record.status, TaskStatus::Succeeded);
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert!(record.log.unwrap().contains("doing the work"));

    // nothing is left pending
    let store = TaskStore::new(storage.clone());
    assert!(store.list(TaskState::Queued).await.unwrap().is_empty());
    assert!(store.list(TaskState::Running).await.unwrap().is_empty());

    // and the log endpoint serves the persisted capture
    let log = manager.task_log(storage, uuid).await.unwrap().unwrap();
    assert!(String::from_utf8(log).unwrap().contains("doing the work"));
}

#[tokio::test]
async fn test_failing_task_records_reason() {
    let manager = started_manager();
    let storage = mem_storage();

    let job: JobFn = Box::new(|_ctx| {
        Box::pin(async { Err(anyhow::anyhow!("unable to clone git repository")) })
    });
    let uuid = manager.run_task(storage.clone(), job).await.unwrap();

    let record = wait_for_completed(&storage, uuid).await;
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.reason.contains("unable to clone git repository"));
}

#[tokio::test]
async fn test_cancel_running_task_records_canceled() {
    let manager = started_manager();
    let storage = mem_storage();

    let job: JobFn = Box::new(|_ctx| {
        Box::pin(async {
            futures::future::pending::<()>().await;
            Ok(())
        })
    });
    let uuid = manager.run_task(storage.clone(), job).await.unwrap();
    wait_for_running(&storage, uuid).await;

    let status = manager.cancel_task(storage.clone(), uuid).await.unwrap();
    assert_eq!(status, TaskStatus::Canceled);

    let record = wait_for_completed(&storage, uuid).await;
    assert_eq!(record.status, TaskStatus::Canceled);
    assert!(record.reason.contains("canceled"));
}

#[tokio::test]
async fn test_timeout_records_failed_with_timeout_reason() {
    let manager = started_manager();
    let storage = mem_storage();

    TaskConfig {
        task_timeout_secs: 1,
        task_history_limit: 10,
        extra: serde_json::Map::new(),
    }
    .save(&storage)
    .await
    .unwrap();

    let job: JobFn = Box::new(|_ctx| {
        Box::pin(async {
            futures::future::pending::<()>().await;
            Ok(())
        })
    });
    let uuid = manager.run_task(storage.clone(), job).await.unwrap();

    let record = wait_for_completed(&storage, uuid).await;
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.reason.contains("timeout"));
}

#[tokio::test]
async fn test_add_task_executes_in_submission_order() {
    let manager = started_manager();
    let storage = mem_storage();

    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let mut uuids = Vec::new();
    for i in 0..3u32 {
        let order = order.clone();
        let job: JobFn = Box::new(move |_ctx| {
            Box::pin(async move {
                order.lock().unwrap().push(i);
                Ok(())
            })
        });
        uuids.push(manager.add_task(storage.clone(), job).await.unwrap());
    }

    for uuid in &uuids {
        wait_for_completed(&storage, *uuid).await;
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_completed_history_pruned_to_limit() {
    let manager = started_manager();
    let storage = mem_storage();

    TaskConfig {
        task_timeout_secs: 600,
        task_history_limit: 2,
        extra: serde_json::Map::new(),
    }
    .save(&storage)
    .await
    .unwrap();

    let mut uuids = Vec::new();
    for _ in 0..4 {
        let job: JobFn = Box::new(|_ctx| Box::pin(async { Ok(()) }));
        let uuid = manager.add_task(storage.clone(), job).await.unwrap();
        wait_for_completed(&storage, uuid).await;
        uuids.push(uuid);
    }

    // pruning runs just after the completion move lands; give it a moment
    let store = TaskStore::new(storage.clone());
    let mut completed = store.list(TaskState::Completed).await.unwrap();
    for _ in 0..500 {
        if completed.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        completed = store.list(TaskState::Completed).await.unwrap();
    }
    assert_eq!(completed.len(), 2);

    // the survivors are the most recent submissions
    let survivors: Vec<_> = completed.iter().map(|r| r.uuid).collect();
    assert!(survivors.contains(&uuids[2]));
    assert!(survivors.contains(&uuids[3]));
}

#[tokio::test]
async fn test_canceled_queued_task_is_discarded_by_worker() {
    let manager = started_manager();
    let storage = mem_storage();

    // occupy the worker so the next submission stays queued
    let gate = Arc::new(AtomicBool::new(false));
    let release = gate.clone();
    let blocker: JobFn = Box::new(move |ctx| {
        Box::pin(async move {
            while !release.load(Ordering::SeqCst) {
                if ctx.scope().is_canceled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        })
    });
    let first = manager.add_task(storage.clone(), blocker).await.unwrap();
    wait_for_running(&storage, first).await;

    let second = manager
        .add_task(
            storage.clone(),
            Box::new(|_ctx| Box::pin(async { Ok(()) })),
        )
        .await
        .unwrap();

    let status = manager.cancel_task(storage.clone(), second).await.unwrap();
    assert_eq!(status, TaskStatus::Canceled);

    gate.store(true, Ordering::SeqCst);
    wait_for_completed(&storage, first).await;

    let record = wait_for_completed(&storage, second).await;
    assert_eq!(record.status, TaskStatus::Canceled);
    assert_eq!(record.reason, "canceled before start");
}
