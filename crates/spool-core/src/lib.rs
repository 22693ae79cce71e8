//! spool-core
//!
//! Per-queue async task scheduler: named queues with a concurrency limit,
//! priority ordering, fixed-interval retries, completion events and graceful drain.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, state, record, events, errors）
//! - **ports**: 抽象化レイヤー（Adapter, KvStore, Clock, IdGenerator）
//! - **impls**: 実装（MemoryAdapter, DurableAdapter, InMemoryKvStore, RedisKvStore）
//! - **queue**: Queue 本体（dispatch, retry, listeners, drain）
//! - **manager**: QueueManager（名前 → Queue のレジストリ、submit の入口）
//! - **config**: ManagerConfig（JSON から読み込める default 値）
//!
//! # 使用例
//! ```ignore
//! let manager = QueueManager::new(ManagerConfig::default());
//! manager.add_queue("emails", QueueOptions::new().concurrency(4))?;
//!
//! let id = manager
//!     .submit("emails", task_fn(|data| async move { send(data).await }), TaskOptions::new())
//!     .await?;
//!
//! manager.stop().await;
//! ```

pub mod config;
pub mod domain;
pub mod impls;
pub mod manager;
pub mod ports;
pub mod queue;

pub use config::{ConfigError, ManagerConfig};
pub use domain::{
    AdapterError, BoxError, EventStatus, Priority, QueueError, StoreError, TaskEvent, TaskId,
    TaskPatch, TaskRecord, TaskStatus,
};
pub use manager::{QueueManager, Subscription};
pub use queue::{
    AdapterBinding, DrainHandle, Listener, ListenerId, Queue, QueueConfig, QueueOptions,
    QueueStatus, TaskFn, TaskOptions, TaskResult, listener, sync_task_fn, task_fn,
};
