//! Queue: per-name scheduler.
//!
//! # フロー
//! 1. `add_task()` で pending record を保存し、callable を登録して dispatch を起こす
//! 2. `process_queue()` が running 数 < concurrency の間、priority 順に pending を running にする
//! 3. `execute_task()` が callable を実行し、結果で record を更新してイベントを出す
//! 4. 終端に達した settle の後は `process_queue()` を再評価する（level-triggered）。
//!    retry の場合は `retry_interval` 後の trigger に任せる
//!
//! # 既知の race
//! retry 対象のタスクは即座に pending に戻るため、`retry_interval` 経過前でも
//! 別の trigger（新規 admission や他タスクの settle）から dispatch されうる。

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use super::callable::{CallableRegistry, Task, TaskFn, TaskOptions};
use super::listeners::{Listener, ListenerId, ListenerRegistry, notify_listeners, panic_message};
use super::retry::{RetryDecision, RetryPolicy};
use super::{DrainHandle, QueueConfig, QueueStatus};
use crate::domain::{EventStatus, QueueError, TaskEvent, TaskId, TaskPatch, TaskRecord, TaskStatus};
use crate::ports::{Adapter, Clock, IdGenerator, SystemClock, UlidGenerator};

/// Error recorded for a pending/running record whose callable is not in this process.
pub const LOST_CALLABLE_MESSAGE: &str = "task callable is not registered in this process";

/// Error recorded by `recover` for a running record this process is not executing.
pub const ORPHANED_TASK_MESSAGE: &str = "task is marked running but is not executing in this process";

/// Attempts for writing a settlement before giving up on the record.
const SETTLE_WRITE_ATTEMPTS: u32 = 3;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // poison は無視する（map の中身は 1 操作ごとに完結している）
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueueInner {
    config: QueueConfig,
    adapter: Arc<dyn Adapter>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,

    callables: Mutex<CallableRegistry>,
    listeners: Mutex<ListenerRegistry>,

    /// Tasks this process is executing right now (dispatched, not yet settled).
    in_flight: Mutex<HashSet<TaskId>>,

    stopping: AtomicBool,
    drain: OnceLock<DrainHandle>,

    /// Serializes check-and-promote so redundant triggers never exceed concurrency.
    dispatch_lock: tokio::sync::Mutex<()>,

    /// Signalled on every settlement; wakes the drain watcher early.
    settled: Notify,
}

/// A named scheduler with one concurrency limit and one storage binding.
///
/// `Clone` は同じ queue を指す（内部は `Arc`）。
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("config", &self.inner.config)
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}

impl Queue {
    pub fn new(config: QueueConfig, adapter: Arc<dyn Adapter>) -> Self {
        Self::with_ports(
            config,
            adapter,
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    pub fn with_ports(
        config: QueueConfig,
        adapter: Arc<dyn Adapter>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let retry = RetryPolicy::fixed(config.max_retries, config.retry_interval);
        Self {
            inner: Arc::new(QueueInner {
                config,
                adapter,
                retry,
                clock,
                ids,
                callables: Mutex::new(CallableRegistry::default()),
                listeners: Mutex::new(ListenerRegistry::default()),
                in_flight: Mutex::new(HashSet::new()),
                stopping: AtomicBool::new(false),
                drain: OnceLock::new(),
                dispatch_lock: tokio::sync::Mutex::new(()),
                settled: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    fn ensure_accepting(&self) -> Result<(), QueueError> {
        if self.is_stopping() {
            return Err(QueueError::Stopping(self.name().to_string()));
        }
        Ok(())
    }

    // ========================================
    // Admission
    // ========================================

    /// Admit a task and return its id (not its result).
    ///
    /// `options.delay` は admission を遅らせる：待っている間は record も存在しない。
    /// 待ち終わった時点で stop されていれば、そのタスクも拒否する。
    pub async fn add_task(&self, callable: TaskFn, options: TaskOptions) -> Result<TaskId, QueueError> {
        self.ensure_accepting()?;

        let TaskOptions {
            priority,
            data,
            delay,
            id,
        } = options;
        let id = id.unwrap_or_else(|| self.inner.ids.generate_task_id());

        if let Some(delay) = delay {
            debug!(queue = %self.name(), task_id = %id, ?delay, "delaying admission");
            tokio::time::sleep(delay).await;
            self.ensure_accepting()?;
        }

        let config = &self.inner.config;
        let record = TaskRecord::new(
            id.clone(),
            config.name.clone(),
            priority.unwrap_or(config.default_priority),
            data,
            config.max_retries,
            self.inner.clock.now(),
        );
        let priority = record.priority;

        // dispatch が record を見つけた時点で callable が引けるよう、先に登録する
        lock(&self.inner.callables).insert(id.clone(), callable);
        if let Err(e) = self.inner.adapter.add_task(record).await {
            lock(&self.inner.callables).remove(&id);
            return Err(e.into());
        }

        debug!(queue = %self.name(), task_id = %id, %priority, "task admitted");
        self.trigger();
        Ok(id)
    }

    /// Run `process_queue` in the background.
    fn trigger(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.process_queue().await {
                error!(queue = %queue.name(), error = %e, "dispatch failed");
            }
        });
    }

    // ========================================
    // Dispatch
    // ========================================

    /// Promote pending tasks to running while capacity allows.
    ///
    /// 何度呼んでも安全（満杯 or pending なしなら何もしない）。
    /// stopping 中は dispatch せず、drain watcher に再確認させるだけ。
    pub async fn process_queue(&self) -> Result<(), QueueError> {
        if self.is_stopping() {
            self.inner.settled.notify_one();
            return Ok(());
        }

        let _guard = self.inner.dispatch_lock.lock().await;
        let adapter = &self.inner.adapter;
        let name = self.name();

        loop {
            if self.is_stopping() {
                break;
            }

            let running = adapter.get_running_tasks(name).await?.len();
            if running >= self.inner.config.concurrency {
                break;
            }

            let Some(head) = adapter.get_pending_tasks(name).await?.into_iter().next() else {
                break;
            };

            let callable = lock(&self.inner.callables).get(&head.id);
            let Some(callable) = callable else {
                self.fail_lost(head).await?;
                continue;
            };

            // 読んでから更新するまでの間に消された / 別の queue に移った record は触らない
            match adapter.get_task(&head.id).await? {
                None => continue,
                Some(current)
                    if current.queue_name == name && current.status == TaskStatus::Pending => {}
                Some(current) => {
                    warn!(
                        queue = %name,
                        task_id = %head.id,
                        owner = %current.queue_name,
                        status = %current.status,
                        "pending head is not a pending task of this queue, skipping dispatch"
                    );
                    break;
                }
            }

            // drain が running と in-flight の間を見ないよう、先に in-flight に入れる
            lock(&self.inner.in_flight).insert(head.id.clone());
            let updated = adapter
                .update_task(&head.id, TaskPatch::running(self.inner.clock.now()))
                .await;
            let record = match updated {
                Ok(Some(record)) => record,
                Ok(None) => {
                    lock(&self.inner.in_flight).remove(&head.id);
                    continue;
                }
                Err(e) => {
                    lock(&self.inner.in_flight).remove(&head.id);
                    return Err(e.into());
                }
            };

            debug!(
                queue = %name,
                task_id = %record.id,
                priority = %record.priority,
                retry_count = record.retry_count,
                running = running + 1,
                "dispatching task"
            );
            tokio::spawn(self.clone().execute_task(Task { record, callable }));
        }
        Ok(())
    }

    /// Execute one dispatched task and settle it.
    ///
    /// 戻り値の型を明示した `BoxFuture` にしているのは、
    /// process_queue -> spawn(execute_task) -> process_queue の再帰で型が決まらなくなるため。
    fn execute_task(self, task: Task) -> BoxFuture<'static, ()> {
        async move {
            let Task { record, callable } = task;
            let data = record.data.clone();
            let started = Instant::now();

            let outcome = AssertUnwindSafe(async move { callable(data).await })
                .catch_unwind()
                .await;
            let duration = started.elapsed();

            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };

            let id = record.id.clone();
            let redispatch = self.settle(record, result, duration).await;

            lock(&self.inner.in_flight).remove(&id);
            self.inner.settled.notify_one();
            if redispatch {
                if let Err(e) = self.process_queue().await {
                    error!(queue = %self.name(), error = %e, "dispatch failed");
                }
            }
        }
        .boxed()
    }

    /// Write a settlement, retrying a few times on storage errors.
    async fn persist(&self, id: &TaskId, patch: TaskPatch) -> Result<(), QueueError> {
        let mut attempt = 1;
        loop {
            match self.inner.adapter.update_task(id, patch.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < SETTLE_WRITE_ATTEMPTS => {
                    warn!(
                        queue = %self.name(),
                        task_id = %id,
                        attempt,
                        error = %e,
                        "settlement write failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.inner.config.stop_poll_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Persist the outcome of one attempt and emit its event. Returns whether to re-dispatch right away.
    ///
    /// 終端の書き込みに失敗しても結果は分かっているので、イベントは出す。
    /// その record は storage 上 running のまま残る（`recover()` で片付ける）。
    async fn settle(
        &self,
        record: TaskRecord,
        result: Result<Option<serde_json::Value>, String>,
        duration: Duration,
    ) -> bool {
        let now = self.inner.clock.now();

        match result {
            Ok(value) => {
                if let Err(e) = self.persist(&record.id, TaskPatch::completed(now)).await {
                    error!(queue = %self.name(), task_id = %record.id, error = %e, "failed to record completion");
                }
                info!(
                    queue = %self.name(),
                    task_id = %record.id,
                    duration_ms = duration.as_millis() as u64,
                    "task completed"
                );
                self.emit(TaskEvent {
                    task_id: record.id,
                    queue_name: record.queue_name,
                    status: EventStatus::Completed,
                    data: record.data,
                    result: value,
                    error: None,
                    duration,
                    retry_count: record.retry_count,
                });
            }
            Err(message) => {
                let retry_count = record.retry_count + 1;
                match self.inner.retry.decide(retry_count, record.max_retries) {
                    RetryDecision::Retry { delay } => {
                        if let Err(e) = self
                            .persist(&record.id, TaskPatch::requeue(retry_count))
                            .await
                        {
                            error!(
                                queue = %self.name(),
                                task_id = %record.id,
                                error = %e,
                                "failed to requeue task, it stays running until recovered"
                            );
                            return true;
                        }
                        warn!(
                            queue = %self.name(),
                            task_id = %record.id,
                            retry_count,
                            max_retries = record.max_retries,
                            error = %message,
                            "task failed, retry scheduled"
                        );
                        self.schedule_retry(delay);
                        return false;
                    }
                    RetryDecision::GiveUp => {
                        if let Err(e) = self
                            .persist(&record.id, TaskPatch::failed(now, message.clone(), retry_count))
                            .await
                        {
                            error!(queue = %self.name(), task_id = %record.id, error = %e, "failed to record failure");
                        }
                        error!(
                            queue = %self.name(),
                            task_id = %record.id,
                            retry_count,
                            error = %message,
                            "task failed, retries exhausted"
                        );
                        self.emit(TaskEvent {
                            task_id: record.id,
                            queue_name: record.queue_name,
                            status: EventStatus::Failed,
                            data: record.data,
                            result: None,
                            error: Some(message),
                            duration,
                            retry_count,
                        });
                    }
                }
            }
        }
        true
    }

    fn schedule_retry(&self, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.process_queue().await {
                error!(queue = %queue.name(), error = %e, "dispatch failed");
            }
        });
    }

    /// Force a record whose callable is gone to `failed` (no retry budget used).
    async fn fail_lost(&self, record: TaskRecord) -> Result<(), QueueError> {
        self.force_fail(record, LOST_CALLABLE_MESSAGE).await
    }

    async fn force_fail(&self, record: TaskRecord, message: &str) -> Result<(), QueueError> {
        self.inner
            .adapter
            .update_task(
                &record.id,
                TaskPatch::failed(self.inner.clock.now(), message, record.retry_count),
            )
            .await?;
        warn!(
            queue = %self.name(),
            task_id = %record.id,
            status = %record.status,
            error = message,
            "marking task failed"
        );
        self.emit(TaskEvent {
            task_id: record.id,
            queue_name: record.queue_name,
            status: EventStatus::Failed,
            data: record.data,
            result: None,
            error: Some(message.to_string()),
            duration: Duration::ZERO,
            retry_count: record.retry_count,
        });
        Ok(())
    }

    /// Fail this queue's `running` records that this process is not executing.
    ///
    /// 前回のプロセスが実行中のまま落ちた record や、settle の書き込みに失敗した record は
    /// concurrency の枠を占有し続けるので、これで解放する。
    /// callable がなければ lost callable、あれば orphaned として failed にする。
    /// pending のものは dispatch 時に同じ扱いになる。
    /// Returns how many records were failed.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let guard = self.inner.dispatch_lock.lock().await;
        let running = self.inner.adapter.get_running_tasks(self.name()).await?;
        let mut recovered = 0;
        for record in running {
            if lock(&self.inner.in_flight).contains(&record.id) {
                continue;
            }
            let known = lock(&self.inner.callables).get(&record.id).is_some();
            let message = if known {
                ORPHANED_TASK_MESSAGE
            } else {
                LOST_CALLABLE_MESSAGE
            };
            self.force_fail(record, message).await?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(queue = %self.name(), recovered, "recovered orphaned running tasks");
        }
        drop(guard);
        self.trigger();
        Ok(recovered)
    }

    // ========================================
    // Queries
    // ========================================

    /// Best-effort snapshot from four independent reads.
    pub async fn get_status(&self) -> Result<QueueStatus, QueueError> {
        let adapter = &self.inner.adapter;
        let name = self.name();
        Ok(QueueStatus {
            name: name.to_string(),
            pending: adapter.get_pending_tasks(name).await?.len(),
            running: adapter.get_running_tasks(name).await?.len(),
            completed: adapter.get_completed_tasks(name, usize::MAX).await?.len(),
            failed: adapter.get_failed_tasks(name, usize::MAX).await?.len(),
            concurrency: self.inner.config.concurrency,
        })
    }

    /// Look up a record by bare id (may belong to another queue on the same adapter).
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.inner.adapter.get_task(id).await?)
    }

    /// Delete a record and forget its callable.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), QueueError> {
        self.inner.adapter.delete_task(id).await?;
        lock(&self.inner.callables).remove(id);
        Ok(())
    }

    // ========================================
    // Events
    // ========================================

    /// Subscribe to every terminal event of this queue.
    pub fn on(&self, listener: Listener) -> ListenerId {
        lock(&self.inner.listeners).add_global(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove_global(id)
    }

    /// Subscribe to the terminal event of one task.
    pub fn on_task(&self, task_id: TaskId, listener: Listener) -> ListenerId {
        lock(&self.inner.listeners).add_task(task_id, listener)
    }

    pub fn off_task(&self, task_id: &TaskId, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove_task(task_id, id)
    }

    fn emit(&self, event: TaskEvent) {
        // listener から on/off を呼べるよう、lock を外してから呼ぶ
        let listeners = lock(&self.inner.listeners).matching(&event.task_id);
        notify_listeners(&listeners, &event);
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Stop admitting tasks and return a handle that resolves at quiescence.
    ///
    /// - 何度呼んでも同じ handle を返す
    /// - 実行中のタスクはキャンセルしない。timeout もない
    /// - pending のまま残ったタスクは dispatch されず、record はそのまま残る
    pub fn stop(&self) -> DrainHandle {
        self.inner
            .drain
            .get_or_init(|| {
                self.inner.stopping.store(true, Ordering::SeqCst);
                info!(queue = %self.name(), "stopping queue");

                let (tx, rx) = watch::channel(false);
                let queue = self.clone();
                tokio::spawn(async move { queue.wait_for_quiescence(tx).await });
                DrainHandle::new(rx)
            })
            .clone()
    }

    async fn wait_for_quiescence(self, tx: watch::Sender<bool>) {
        let poll = self.inner.config.stop_poll_interval;
        loop {
            // storage が読めなくても、settle に失敗しても止まれるよう、この process の実行数で見る
            let running = lock(&self.inner.in_flight).len();
            if running == 0 {
                break;
            }
            debug!(queue = %self.name(), running, "waiting for running tasks");
            tokio::select! {
                _ = self.inner.settled.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
        info!(queue = %self.name(), "queue drained");
        let _ = tx.send(true);
    }

    /// Delete all persisted state of this queue and forget local callables.
    ///
    /// 実行中のタスクは待たない。
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.inner.adapter.clear_queue(self.name()).await?;
        lock(&self.inner.callables).clear();
        info!(queue = %self.name(), "queue cleared");
        Ok(())
    }
}
