//! QueueManager - 名前 → Queue のレジストリ
//!
//! - 外部からの submit はここだけを通る（`submit(name, ...)`）
//! - durable queue は明示的な store がなければ shared store を使う
//! - memory queue は 1 つの `MemoryAdapter` を共有する（id は queue をまたいで一意である前提）

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::domain::{QueueError, TaskId};
use crate::impls::{DurableAdapter, MemoryAdapter};
use crate::ports::{Adapter, KvStore};
use crate::queue::{
    AdapterBinding, Listener, ListenerId, Queue, QueueConfig, QueueOptions, QueueStatus, TaskFn,
    TaskOptions,
};

/// One listener registered on one queue by `QueueManager::on_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub queue: String,
    pub id: ListenerId,
}

pub struct QueueManager {
    config: ManagerConfig,
    queues: RwLock<HashMap<String, Queue>>,
    shared_store: RwLock<Option<Arc<dyn KvStore>>>,
    memory: Arc<MemoryAdapter>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl QueueManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            shared_store: RwLock::new(None),
            memory: Arc::new(MemoryAdapter::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Store used by durable queues that were created without their own.
    pub fn set_shared_store(&self, store: Arc<dyn KvStore>) {
        *self
            .shared_store
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(store);
    }

    fn shared_store(&self) -> Option<Arc<dyn KvStore>> {
        self.shared_store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve_adapter(
        &self,
        name: &str,
        binding: &AdapterBinding,
    ) -> Result<Arc<dyn Adapter>, QueueError> {
        match binding {
            AdapterBinding::Memory => {
                let adapter: Arc<dyn Adapter> = self.memory.clone();
                Ok(adapter)
            }
            AdapterBinding::Durable { store, key_prefix } => {
                let store = store
                    .clone()
                    .or_else(|| self.shared_store())
                    .ok_or_else(|| QueueError::MissingStore(name.to_string()))?;
                let prefix = key_prefix
                    .clone()
                    .unwrap_or_else(|| self.config.key_prefix.clone());
                Ok(Arc::new(DurableAdapter::new(store, prefix)))
            }
            AdapterBinding::Custom(adapter) => Ok(Arc::clone(adapter)),
        }
    }

    /// Create and register a queue.
    ///
    /// # Errors
    /// - `DuplicateQueue`: 同名の queue がすでにある
    /// - `MissingStore`: durable 指定だが store も shared store もない
    pub fn add_queue(&self, name: &str, options: QueueOptions) -> Result<Queue, QueueError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(name) {
            return Err(QueueError::DuplicateQueue(name.to_string()));
        }

        let adapter = self.resolve_adapter(name, &options.adapter)?;
        let config = QueueConfig::resolve(name, &options, &self.config);
        info!(
            queue = %name,
            concurrency = config.concurrency,
            max_retries = config.max_retries,
            adapter = ?options.adapter,
            "queue created"
        );

        let queue = Queue::new(config, adapter);
        queues.insert(name.to_string(), queue.clone());
        Ok(queue)
    }

    pub fn get_queue(&self, name: &str) -> Option<Queue> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn queue(&self, name: &str) -> Result<Queue, QueueError> {
        self.get_queue(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    fn all_queues(&self) -> Vec<Queue> {
        let mut queues: Vec<Queue> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        queues.sort_by(|a, b| a.name().cmp(b.name()));
        queues
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.all_queues()
            .iter()
            .map(|q| q.name().to_string())
            .collect()
    }

    /// Submit a task to a named queue. Returns the id at admission.
    pub async fn submit(
        &self,
        queue_name: &str,
        callable: TaskFn,
        options: TaskOptions,
    ) -> Result<TaskId, QueueError> {
        self.queue(queue_name)?.add_task(callable, options).await
    }

    pub async fn get_queue_status(&self, name: &str) -> Result<QueueStatus, QueueError> {
        self.queue(name)?.get_status().await
    }

    /// Status of every queue, ordered by name.
    pub async fn get_all_queues_status(&self) -> Result<Vec<QueueStatus>, QueueError> {
        let mut statuses = Vec::new();
        for queue in self.all_queues() {
            statuses.push(queue.get_status().await?);
        }
        Ok(statuses)
    }

    // ========================================
    // Events
    // ========================================

    pub fn on(&self, queue_name: &str, listener: Listener) -> Result<ListenerId, QueueError> {
        Ok(self.queue(queue_name)?.on(listener))
    }

    pub fn off(&self, queue_name: &str, id: ListenerId) -> Result<bool, QueueError> {
        Ok(self.queue(queue_name)?.off(id))
    }

    pub fn on_task(
        &self,
        queue_name: &str,
        task_id: TaskId,
        listener: Listener,
    ) -> Result<ListenerId, QueueError> {
        Ok(self.queue(queue_name)?.on_task(task_id, listener))
    }

    pub fn off_task(
        &self,
        queue_name: &str,
        task_id: &TaskId,
        id: ListenerId,
    ) -> Result<bool, QueueError> {
        Ok(self.queue(queue_name)?.off_task(task_id, id))
    }

    /// Register one global listener on every queue that exists right now.
    ///
    /// 後から追加された queue には付かない。
    pub fn on_all(&self, listener: Listener) -> Vec<Subscription> {
        self.all_queues()
            .into_iter()
            .map(|queue| Subscription {
                id: queue.on(Arc::clone(&listener)),
                queue: queue.name().to_string(),
            })
            .collect()
    }

    /// Undo `on_all`. Subscriptions for queues that were removed are ignored.
    pub fn off_all(&self, subscriptions: &[Subscription]) {
        for sub in subscriptions {
            if let Some(queue) = self.get_queue(&sub.queue) {
                queue.off(sub.id);
            }
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Clear a queue's persisted state and deregister it.
    pub async fn remove_queue(&self, name: &str) -> Result<(), QueueError> {
        let queue = self.queue(name)?;
        queue.clear().await?;
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        info!(queue = %name, "queue removed");
        Ok(())
    }

    /// Force-fail orphaned running records on every queue. Returns the total.
    pub async fn recover_all(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        for queue in self.all_queues() {
            total += queue.recover().await?;
        }
        Ok(total)
    }

    /// Stop every queue and wait until all of them are drained. No timeout.
    pub async fn stop(&self) {
        let drains: Vec<_> = self
            .all_queues()
            .iter()
            .map(|queue| queue.stop().wait())
            .collect();
        info!(queues = drains.len(), "stopping all queues");
        futures::future::join_all(drains).await;
        info!("all queues drained");
    }

    /// Close the shared store. Persisted records are left as they are.
    pub async fn destroy(&self) -> Result<(), QueueError> {
        let store = self
            .shared_store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match store {
            Some(store) => {
                store.close().await?;
                info!("shared store closed");
            }
            None => warn!("destroy called without a shared store"),
        }
        Ok(())
    }
}
