//! Callables and the per-queue callable registry.
//!
//! callable は永続化できない。record（TaskRecord）とは別に、queue が
//! `TaskId -> TaskFn` の map として所有する。プロセスが再起動すると空になる。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::domain::{BoxError, Priority, TaskId, TaskRecord};

/// Result of one callable invocation.
pub type TaskResult = Result<Option<Value>, BoxError>;

/// A unit of work: receives the task's data payload, produces a value or nothing.
pub type TaskFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Wrap an async closure as a `TaskFn`.
///
/// # Example
/// ```ignore
/// let f = task_fn(|data| async move {
///     send_mail(data).await?;
///     Ok(None)
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Arc::new(move |data| f(data).boxed())
}

/// Wrap a synchronous closure as a `TaskFn`.
///
/// closure は future の poll 中に呼ばれるので、panic も通常の失敗として扱われる。
pub fn sync_task_fn<F>(f: F) -> TaskFn
where
    F: Fn(Option<Value>) -> TaskResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |data| {
        let f = Arc::clone(&f);
        async move { f(data) }.boxed()
    })
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Defaults to the queue's default priority.
    pub priority: Option<Priority>,

    pub data: Option<Value>,

    /// Wait this long before the task is even persisted (gates admission).
    pub delay: Option<Duration>,

    /// Caller-supplied id; generated when absent.
    pub id: Option<TaskId>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A dispatched task: persisted record plus its in-process callable.
pub(crate) struct Task {
    pub record: TaskRecord,
    pub callable: TaskFn,
}

/// Registry of callables (task id -> callable), owned by one queue.
#[derive(Default)]
pub(crate) struct CallableRegistry {
    callables: HashMap<TaskId, TaskFn>,
}

impl CallableRegistry {
    pub fn insert(&mut self, id: TaskId, callable: TaskFn) {
        self.callables.insert(id, callable);
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskFn> {
        self.callables.get(id).cloned()
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<TaskFn> {
        self.callables.remove(id)
    }

    pub fn clear(&mut self) {
        self.callables.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.callables.len()
    }
}
