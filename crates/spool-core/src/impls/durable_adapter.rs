//! DurableAdapter - KvStore 上に task record を永続化する Adapter
//!
//! # キー構成
//! - `{prefix}task:{id}`: record 本体（JSON）
//! - `{prefix}queue:{queue}:pending`: list（LPUSH で先頭に積む）
//! - `{prefix}queue:{queue}:running`: set
//! - `{prefix}queue:{queue}:completed`: list（最大 100 件）
//! - `{prefix}queue:{queue}:failed`: list（最大 100 件）
//! - `{prefix}queue:{queue}:ids`: set（queue の全 id。`clear_queue` 用）
//!
//! pending は先頭に積むため、同一 priority 内の並びは新しい順になる。
//! memory adapter（古い順）とは意図的に揃えていない。
//!
//! completed / failed の list は 100 件で切り詰めるが、record 本体は消さない
//! （消えるのは `delete_task` と `clear_queue` のときだけ）。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{AdapterError, TaskId, TaskPatch, TaskRecord, TaskStatus};
use crate::ports::{Adapter, KvStore};

/// Hard cap of completed / failed entries kept per queue.
pub const TERMINAL_BUCKET_CAP: usize = 100;

pub const DEFAULT_KEY_PREFIX: &str = "spool:";

/// Adapter backed by a key/list/set store.
pub struct DurableAdapter {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl DurableAdapter {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn with_default_prefix(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, DEFAULT_KEY_PREFIX)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn task_key(&self, id: &str) -> String {
        format!("{}task:{}", self.prefix, id)
    }

    fn bucket_key(&self, queue_name: &str, status: TaskStatus) -> String {
        format!("{}queue:{}:{}", self.prefix, queue_name, status.as_str())
    }

    fn ids_key(&self, queue_name: &str) -> String {
        format!("{}queue:{}:ids", self.prefix, queue_name)
    }

    async fn load(&self, id: &str) -> Result<Option<TaskRecord>, AdapterError> {
        match self.store.get(&self.task_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &TaskRecord) -> Result<(), AdapterError> {
        let raw = serde_json::to_string(record)?;
        self.store.set(&self.task_key(record.id.as_str()), raw).await?;
        Ok(())
    }

    /// Load the records listed in one bucket.
    ///
    /// record が消えている id や、すでに別の queue / status に移った id は飛ばす。
    async fn load_bucket(
        &self,
        queue_name: &str,
        status: TaskStatus,
        ids: Vec<String>,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(&id).await? {
                if record.queue_name == queue_name && record.status == status {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn bucket_ids(
        &self,
        queue_name: &str,
        status: TaskStatus,
    ) -> Result<Vec<String>, AdapterError> {
        let key = self.bucket_key(queue_name, status);
        let ids = match status {
            TaskStatus::Running => self.store.smembers(&key).await?,
            _ => self.store.lrange(&key, 0, -1).await?,
        };
        Ok(ids)
    }

    async fn index(&self, record: &TaskRecord) -> Result<(), AdapterError> {
        let key = self.bucket_key(&record.queue_name, record.status);
        let id = record.id.to_string();
        match record.status {
            TaskStatus::Pending => self.store.lpush(&key, id).await?,
            TaskStatus::Running => self.store.sadd(&key, id).await?,
            TaskStatus::Completed | TaskStatus::Failed => {
                self.store.lpush(&key, id).await?;
                self.trim_terminal(&key).await?;
            }
        }
        Ok(())
    }

    async fn unindex(
        &self,
        queue_name: &str,
        status: TaskStatus,
        id: &str,
    ) -> Result<(), AdapterError> {
        let key = self.bucket_key(queue_name, status);
        match status {
            TaskStatus::Running => self.store.srem(&key, id).await?,
            _ => self.store.lrem(&key, id).await?,
        }
        Ok(())
    }

    /// Trim a terminal list to the cap. The records themselves stay.
    async fn trim_terminal(&self, key: &str) -> Result<(), AdapterError> {
        debug!(bucket = key, cap = TERMINAL_BUCKET_CAP, "trimming terminal bucket");
        self.store
            .ltrim(key, 0, TERMINAL_BUCKET_CAP as isize - 1)
            .await?;
        Ok(())
    }

    async fn recent(
        &self,
        queue_name: &str,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // usize::MAX などは「全部」として扱う
        let stop = isize::try_from(limit - 1).unwrap_or(-1);
        let ids = self
            .store
            .lrange(&self.bucket_key(queue_name, status), 0, stop)
            .await?;
        self.load_bucket(queue_name, status, ids).await
    }
}

#[async_trait]
impl Adapter for DurableAdapter {
    async fn add_task(&self, record: TaskRecord) -> Result<(), AdapterError> {
        // 同じ id の再投入は置き換え。古い index から外しておく
        if let Some(previous) = self.load(record.id.as_str()).await? {
            self.unindex(&previous.queue_name, previous.status, previous.id.as_str())
                .await?;
            self.store
                .srem(&self.ids_key(&previous.queue_name), previous.id.as_str())
                .await?;
        }
        self.save(&record).await?;
        self.store
            .sadd(&self.ids_key(&record.queue_name), record.id.to_string())
            .await?;
        self.index(&record).await
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, AdapterError> {
        self.load(id.as_str()).await
    }

    async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Option<TaskRecord>, AdapterError> {
        let Some(mut record) = self.load(id.as_str()).await? else {
            return Ok(None);
        };
        let previous = record.status;
        record.apply(&patch);
        self.save(&record).await?;

        if previous != record.status {
            self.unindex(&record.queue_name, previous, id.as_str())
                .await?;
            self.index(&record).await?;
        }
        Ok(Some(record))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), AdapterError> {
        if let Some(record) = self.load(id.as_str()).await? {
            self.unindex(&record.queue_name, record.status, id.as_str())
                .await?;
            self.store
                .srem(&self.ids_key(&record.queue_name), id.as_str())
                .await?;
        }
        self.store.del(&self.task_key(id.as_str())).await?;
        Ok(())
    }

    async fn get_pending_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError> {
        let ids = self.bucket_ids(queue_name, TaskStatus::Pending).await?;
        let mut pending = self
            .load_bucket(queue_name, TaskStatus::Pending, ids)
            .await?;
        // stable sort: 同一 priority は list の並び（新しい順）のまま
        pending.sort_by_key(|r| r.priority.rank());
        Ok(pending)
    }

    async fn get_running_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError> {
        let ids = self.bucket_ids(queue_name, TaskStatus::Running).await?;
        self.load_bucket(queue_name, TaskStatus::Running, ids).await
    }

    async fn get_completed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        self.recent(queue_name, TaskStatus::Completed, limit).await
    }

    async fn get_failed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        self.recent(queue_name, TaskStatus::Failed, limit).await
    }

    async fn clear_queue(&self, queue_name: &str) -> Result<(), AdapterError> {
        // list から trim 済みの record も含めて消す
        let ids_key = self.ids_key(queue_name);
        for id in self.store.smembers(&ids_key).await? {
            self.store.del(&self.task_key(&id)).await?;
        }
        self.store.del(&ids_key).await?;
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            self.store.del(&self.bucket_key(queue_name, status)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::impls::InMemoryKvStore;
    use chrono::{Duration, TimeZone, Utc};

    fn adapter() -> (Arc<InMemoryKvStore>, DurableAdapter) {
        let store = Arc::new(InMemoryKvStore::new());
        let adapter = DurableAdapter::new(store.clone(), "test:");
        (store, adapter)
    }

    fn record(id: &str, queue: &str, priority: Priority) -> TaskRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TaskRecord::new(TaskId::new(id), queue, priority, None, 3, t)
    }

    #[tokio::test]
    async fn record_is_stored_as_json_under_prefixed_key() {
        let (store, adapter) = adapter();
        adapter.add_task(record("a", "q", Priority::High)).await.unwrap();

        let raw = store.get("test:task:a").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["queueName"], "q");
        assert_eq!(value["priority"], "high");
        assert_eq!(store.lrange("test:queue:q:pending", 0, -1).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn pending_ties_are_reverse_chronological() {
        let (_, adapter) = adapter();
        adapter.add_task(record("n1", "q", Priority::Normal)).await.unwrap();
        adapter.add_task(record("l1", "q", Priority::Low)).await.unwrap();
        adapter.add_task(record("n2", "q", Priority::Normal)).await.unwrap();
        adapter.add_task(record("u1", "q", Priority::Urgent)).await.unwrap();

        let ids: Vec<String> = adapter
            .get_pending_tasks("q")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["u1", "n2", "n1", "l1"]);
    }

    #[tokio::test]
    async fn status_change_moves_between_buckets() {
        let (store, adapter) = adapter();
        adapter.add_task(record("a", "q", Priority::Normal)).await.unwrap();

        adapter
            .update_task(&TaskId::new("a"), TaskPatch::running(Utc::now()))
            .await
            .unwrap();
        assert!(adapter.get_pending_tasks("q").await.unwrap().is_empty());
        assert_eq!(store.smembers("test:queue:q:running").await.unwrap(), vec!["a"]);

        adapter
            .update_task(&TaskId::new("a"), TaskPatch::completed(Utc::now()))
            .await
            .unwrap();
        assert!(adapter.get_running_tasks("q").await.unwrap().is_empty());
        let done = adapter.get_completed_tasks("q", 10).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn terminal_buckets_are_capped_at_100() {
        let (store, adapter) = adapter();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..120 {
            let id = format!("t{i}");
            adapter.add_task(record(&id, "q", Priority::Normal)).await.unwrap();
            adapter
                .update_task(
                    &TaskId::new(id),
                    TaskPatch::failed(base + Duration::seconds(i), "nope", 4),
                )
                .await
                .unwrap();
        }

        let failed = adapter.get_failed_tasks("q", usize::MAX).await.unwrap();
        assert_eq!(failed.len(), TERMINAL_BUCKET_CAP);
        assert_eq!(failed[0].id.as_str(), "t119");
        assert_eq!(failed[99].id.as_str(), "t20");

        assert_eq!(
            store.lrange("test:queue:q:failed", 0, -1).await.unwrap().len(),
            TERMINAL_BUCKET_CAP
        );

        // list から落ちても record 本体は残る
        assert!(store.get("test:task:t0").await.unwrap().is_some());
        let old = adapter.get_task(&TaskId::new("t19")).await.unwrap().unwrap();
        assert_eq!(old.status, TaskStatus::Failed);

        // clear は trim 済みの record も消す
        adapter.clear_queue("q").await.unwrap();
        assert!(store.get("test:task:t0").await.unwrap().is_none());
        assert!(store.smembers("test:queue:q:ids").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_adding_an_id_replaces_record_and_index() {
        let (store, adapter) = adapter();
        adapter.add_task(record("job", "q", Priority::Normal)).await.unwrap();
        adapter
            .update_task(&TaskId::new("job"), TaskPatch::completed(Utc::now()))
            .await
            .unwrap();

        adapter.add_task(record("job", "q", Priority::High)).await.unwrap();

        assert!(adapter.get_completed_tasks("q", 10).await.unwrap().is_empty());
        assert!(store.lrange("test:queue:q:completed", 0, -1).await.unwrap().is_empty());
        let pending = adapter.get_pending_tasks("q").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn queue_named_task_does_not_collide_with_records() {
        let (store, adapter) = adapter();
        adapter.add_task(record("pending", "task", Priority::Normal)).await.unwrap();
        adapter.add_task(record("other", "task", Priority::Low)).await.unwrap();

        let record = adapter.get_task(&TaskId::new("pending")).await.unwrap().unwrap();
        assert_eq!(record.queue_name, "task");
        assert_eq!(adapter.get_pending_tasks("task").await.unwrap().len(), 2);
        assert_eq!(
            store.lrange("test:queue:task:pending", 0, -1).await.unwrap(),
            vec!["other", "pending"]
        );
    }

    #[tokio::test]
    async fn delete_removes_record_and_index() {
        let (store, adapter) = adapter();
        adapter.add_task(record("a", "q", Priority::Normal)).await.unwrap();
        adapter.delete_task(&TaskId::new("a")).await.unwrap();

        assert!(adapter.get_task(&TaskId::new("a")).await.unwrap().is_none());
        assert!(store.lrange("test:queue:q:pending", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_queue_empties_every_bucket() {
        let (store, adapter) = adapter();
        for (id, patch) in [
            ("p", None),
            ("r", Some(TaskPatch::running(Utc::now()))),
            ("c", Some(TaskPatch::completed(Utc::now()))),
            ("f", Some(TaskPatch::failed(Utc::now(), "x", 1))),
        ] {
            adapter.add_task(record(id, "q", Priority::Normal)).await.unwrap();
            if let Some(patch) = patch {
                adapter.update_task(&TaskId::new(id), patch).await.unwrap();
            }
        }
        adapter.add_task(record("other", "q2", Priority::Normal)).await.unwrap();

        adapter.clear_queue("q").await.unwrap();

        assert!(adapter.get_pending_tasks("q").await.unwrap().is_empty());
        assert!(adapter.get_running_tasks("q").await.unwrap().is_empty());
        assert!(adapter.get_completed_tasks("q", 100).await.unwrap().is_empty());
        assert!(adapter.get_failed_tasks("q", 100).await.unwrap().is_empty());
        assert!(store.get("test:task:r").await.unwrap().is_none());
        assert_eq!(adapter.get_pending_tasks("q2").await.unwrap().len(), 1);
    }
}
