//! End-to-end scenarios through `QueueManager`, run against both backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;
use serde_json::json;
use spool_core::impls::InMemoryKvStore;
use spool_core::ports::Adapter;
use spool_core::{
    AdapterBinding, EventStatus, ManagerConfig, Priority, QueueManager, QueueOptions, TaskEvent,
    TaskId, TaskOptions, TaskStatus, listener, sync_task_fn, task_fn,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Durable,
}

fn manager_with(backend: Backend, options: QueueOptions) -> QueueManager {
    let manager = QueueManager::new(ManagerConfig {
        stop_poll_interval_ms: 5,
        ..ManagerConfig::default()
    });
    let options = match backend {
        Backend::Memory => options,
        Backend::Durable => {
            manager.set_shared_store(Arc::new(InMemoryKvStore::new()));
            options.adapter(AdapterBinding::durable())
        }
    };
    manager.add_queue("jobs", options).unwrap();
    manager
}

fn events(manager: &QueueManager) -> mpsc::UnboundedReceiver<TaskEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager
        .on("jobs", listener(move |e| {
            let _ = tx.send(e.clone());
        }))
        .unwrap();
    rx
}

async fn wait_until_running(manager: &QueueManager, n: usize) {
    for _ in 0..200 {
        if manager.get_queue_status("jobs").await.unwrap().running == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never reached {n} running");
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::durable(Backend::Durable)]
#[tokio::test]
async fn urgent_overtakes_waiting_normal(#[case] backend: Backend) {
    let manager = manager_with(backend, QueueOptions::new().concurrency(1));
    let mut rx = events(&manager);
    let order = Arc::new(Mutex::new(Vec::new()));

    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(tokio::sync::Mutex::new(Some(gate)));
    manager
        .submit(
            "jobs",
            task_fn(move |_| {
                let gate = Arc::clone(&gate);
                async move {
                    if let Some(gate) = gate.lock().await.take() {
                        let _ = gate.await;
                    }
                    Ok(None)
                }
            }),
            TaskOptions::new(),
        )
        .await
        .unwrap();
    wait_until_running(&manager, 1).await;

    for (name, priority) in [("A", Priority::Normal), ("B", Priority::Urgent)] {
        let order = Arc::clone(&order);
        manager
            .submit(
                "jobs",
                sync_task_fn(move |_| {
                    order.lock().unwrap().push(name);
                    Ok(None)
                }),
                TaskOptions::new().priority(priority),
            )
            .await
            .unwrap();
    }

    release.send(()).unwrap();
    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::durable(Backend::Durable)]
#[tokio::test(start_paused = true)]
async fn always_failing_task_ends_failed_after_three_runs(#[case] backend: Backend) {
    let manager = manager_with(
        backend,
        QueueOptions::new()
            .max_retries(2)
            .retry_interval(Duration::from_millis(50)),
    );
    let mut rx = events(&manager);
    let runs = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&runs);
    let id = manager
        .submit(
            "jobs",
            sync_task_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("boom".into())
            }),
            TaskOptions::new(),
        )
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.task_id, id);
    assert_eq!(event.status, EventStatus::Failed);
    assert_eq!(event.retry_count, 3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    let queue = manager.get_queue("jobs").unwrap();
    let record = queue.get_task(&id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.retry_count, 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.try_recv().is_err(), "failure event must be emitted once");
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::durable(Backend::Durable)]
#[tokio::test]
async fn explicit_id_is_readable_as_pending(#[case] backend: Backend) {
    let manager = manager_with(backend, QueueOptions::new().concurrency(1));
    let queue = manager.get_queue("jobs").unwrap();

    // 実行枠を埋めておき、次のタスクを pending のままにする
    let (_release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(tokio::sync::Mutex::new(Some(gate)));
    manager
        .submit(
            "jobs",
            task_fn(move |_| {
                let gate = Arc::clone(&gate);
                async move {
                    if let Some(gate) = gate.lock().await.take() {
                        let _ = gate.await;
                    }
                    Ok(None)
                }
            }),
            TaskOptions::new(),
        )
        .await
        .unwrap();
    wait_until_running(&manager, 1).await;

    let id = manager
        .submit(
            "jobs",
            sync_task_fn(|_| Ok(None)),
            TaskOptions::new()
                .id("report-7")
                .priority(Priority::Low)
                .data(json!({"page": 7})),
        )
        .await
        .unwrap();

    let record = queue.adapter().get_task(&id).await.unwrap().unwrap();
    assert_eq!(record.id, TaskId::new("report-7"));
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.priority, Priority::Low);
    assert_eq!(record.data, Some(json!({"page": 7})));
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::durable(Backend::Durable)]
#[tokio::test]
async fn clear_empties_every_bucket(#[case] backend: Backend) {
    let manager = manager_with(
        backend,
        QueueOptions::new()
            .concurrency(2)
            .max_retries(0)
            .retry_interval(Duration::ZERO),
    );
    let mut rx = events(&manager);

    manager
        .submit("jobs", sync_task_fn(|_| Ok(None)), TaskOptions::new())
        .await
        .unwrap();
    manager
        .submit("jobs", sync_task_fn(|_| Err("no".into())), TaskOptions::new())
        .await
        .unwrap();
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();

    let queue = manager.get_queue("jobs").unwrap();
    queue.clear().await.unwrap();

    let adapter = queue.adapter();
    assert!(adapter.get_pending_tasks("jobs").await.unwrap().is_empty());
    assert!(adapter.get_running_tasks("jobs").await.unwrap().is_empty());
    assert!(adapter.get_completed_tasks("jobs", 100).await.unwrap().is_empty());
    assert!(adapter.get_failed_tasks("jobs", 100).await.unwrap().is_empty());
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::durable(Backend::Durable)]
#[tokio::test]
async fn stop_resolves_only_after_running_work_finishes(#[case] backend: Backend) {
    let manager = manager_with(backend, QueueOptions::new().concurrency(2));
    let finished = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let finished = Arc::clone(&finished);
        manager
            .submit(
                "jobs",
                task_fn(move |_| {
                    let finished = Arc::clone(&finished);
                    async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
                TaskOptions::new(),
            )
            .await
            .unwrap();
    }
    wait_until_running(&manager, 2).await;

    manager.stop().await;
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(manager.get_queue_status("jobs").await.unwrap().running, 0);
    assert!(
        manager
            .submit("jobs", sync_task_fn(|_| Ok(None)), TaskOptions::new())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn restarted_durable_queue_fails_tasks_it_cannot_run() {
    let store = Arc::new(InMemoryKvStore::new());

    // 1 つ目の "プロセス"：タスクを受け付けたまま dispatch されずに終わる
    let first = QueueManager::new(ManagerConfig::default());
    first.set_shared_store(store.clone());
    first
        .add_queue(
            "jobs",
            QueueOptions::new()
                .concurrency(1)
                .adapter(AdapterBinding::durable()),
        )
        .unwrap();
    let (_release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(tokio::sync::Mutex::new(Some(gate)));
    first
        .submit(
            "jobs",
            task_fn(move |_| {
                let gate = Arc::clone(&gate);
                async move {
                    if let Some(gate) = gate.lock().await.take() {
                        let _ = gate.await;
                    }
                    Ok(None)
                }
            }),
            TaskOptions::new().id("stuck"),
        )
        .await
        .unwrap();
    wait_until_running(&first, 1).await;
    first
        .submit("jobs", sync_task_fn(|_| Ok(None)), TaskOptions::new().id("queued"))
        .await
        .unwrap();
    // 以後 1 つ目は dispatch しない（プロセスが落ちた状態を模す）
    let _drain = first.get_queue("jobs").unwrap().stop();

    // 2 つ目の "プロセス"：同じ store、callable は空
    let second = QueueManager::new(ManagerConfig::default());
    second.set_shared_store(store);
    second
        .add_queue("jobs", QueueOptions::new().adapter(AdapterBinding::durable()))
        .unwrap();
    let mut rx = events(&second);

    assert_eq!(second.recover_all().await.unwrap(), 1);
    let mut failed = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    failed.sort_by(|a, b| a.task_id.cmp(&b.task_id));

    assert_eq!(failed[0].task_id, TaskId::new("queued"));
    assert_eq!(failed[1].task_id, TaskId::new("stuck"));
    for event in &failed {
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.error.as_deref(), Some(spool_core::queue::LOST_CALLABLE_MESSAGE));
        assert_eq!(event.retry_count, 0);
    }
    assert_eq!(second.get_queue_status("jobs").await.unwrap().failed, 2);
}
