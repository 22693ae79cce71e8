//! In-memory adapter implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{AdapterError, TaskId, TaskPatch, TaskRecord, TaskStatus};
use crate::ports::Adapter;

struct Entry {
    /// Insertion sequence; re-adding an id gives it a new one.
    seq: u64,
    record: TaskRecord,
}

/// In-memory adapter state.
///
/// record は bare id で 1 件だけ持つ（同じ id を add すると置き換え）。
/// queue ごとの bucket は読み出し時に filter して作る（別の index は持たない）。
#[derive(Default)]
struct MemoryState {
    records: HashMap<TaskId, Entry>,
    next_seq: u64,
}

impl MemoryState {
    /// Records of one queue in one status, in insertion order.
    fn with_status(&self, queue_name: &str, status: TaskStatus) -> Vec<TaskRecord> {
        let mut entries: Vec<&Entry> = self
            .records
            .values()
            .filter(|e| e.record.queue_name == queue_name && e.record.status == status)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    /// Terminal records, most recent first, limited at read time.
    fn recent(&self, queue_name: &str, status: TaskStatus, limit: usize) -> Vec<TaskRecord> {
        let mut records = self.with_status(queue_name, status);
        records.reverse();
        // stable: 同じ completed_at なら後から入ったものが先
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        records.truncate(limit);
        records
    }
}

/// Process-local adapter backed by a map.
///
/// - pending の同一 priority 内は挿入順（古いものが先）
/// - completed / failed は無制限に溜まる。limit は読み出し時のみ
/// - 複数の queue で 1 インスタンスを共有できる。id は queue をまたいで 1 件
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn add_task(&self, record: TaskRecord) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        state.records.insert(record.id.clone(), Entry { seq, record });
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state.records.get(id).map(|e| e.record.clone()))
    }

    async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Option<TaskRecord>, AdapterError> {
        let mut state = self.state.lock().await;
        Ok(state.records.get_mut(id).map(|e| {
            e.record.apply(&patch);
            e.record.clone()
        }))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        state.records.remove(id);
        Ok(())
    }

    async fn get_pending_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError> {
        let state = self.state.lock().await;
        let mut pending = state.with_status(queue_name, TaskStatus::Pending);
        pending.sort_by_key(|r| r.priority.rank());
        Ok(pending)
    }

    async fn get_running_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state.with_status(queue_name, TaskStatus::Running))
    }

    async fn get_completed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state.recent(queue_name, TaskStatus::Completed, limit))
    }

    async fn get_failed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state.recent(queue_name, TaskStatus::Failed, limit))
    }

    async fn clear_queue(&self, queue_name: &str) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        state
            .records
            .retain(|_, e| e.record.queue_name != queue_name);
        Ok(())
    }
}
