//! Queue module: per-queue scheduler, callables, listeners, retry, and drain.

mod callable;
mod config;
mod drain;
mod listeners;
mod retry;
mod scheduler;
mod status;

pub use callable::{TaskFn, TaskOptions, TaskResult, sync_task_fn, task_fn};
pub use config::{AdapterBinding, QueueConfig, QueueOptions};
pub use drain::DrainHandle;
pub use listeners::{Listener, ListenerId, listener};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{LOST_CALLABLE_MESSAGE, ORPHANED_TASK_MESSAGE, Queue};
pub use status::QueueStatus;
