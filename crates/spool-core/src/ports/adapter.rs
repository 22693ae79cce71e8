//! Adapter port - タスクメタデータの永続化
//!
//! # 実装
//! - `MemoryAdapter`: プロセス内の map（開発・テスト・単一プロセス向け）
//! - `DurableAdapter`: `KvStore`（key / list / set）を使う永続実装
//!
//! 両実装は同じ trait を満たすが、観測可能な違いがある：
//! - 同一 priority の pending の並び: memory は古い順、durable は新しい順
//! - running の並び: memory は挿入順、durable は順序なし
//! - completed / failed の保持数: memory は読み出し時に limit を適用するだけ、
//!   durable は書き込みごとに 100 件に trim する

use async_trait::async_trait;

use crate::domain::{AdapterError, TaskId, TaskPatch, TaskRecord};

/// Storage abstraction for task metadata.
///
/// # 設計原則
/// - ID は queue 名で修飾しない。`get_task` / `update_task` / `delete_task` は
///   このインスタンスが知っているすべての queue を対象にする
/// - `update_task` は read-modify-write で、atomic ではない（last writer wins）
/// - `Send + Sync` を要求（複数の queue / tokio task から共有される）
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Insert a record and index it under its status bucket.
    async fn add_task(&self, record: TaskRecord) -> Result<(), AdapterError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, AdapterError>;

    /// Shallow-merge `patch` onto the stored record.
    ///
    /// Returns the merged record, or `None` when the id is unknown.
    async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Option<TaskRecord>, AdapterError>;

    async fn delete_task(&self, id: &TaskId) -> Result<(), AdapterError>;

    /// Pending records sorted ascending by priority rank (stable).
    async fn get_pending_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError>;

    async fn get_running_tasks(&self, queue_name: &str) -> Result<Vec<TaskRecord>, AdapterError>;

    /// Most recent first.
    async fn get_completed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError>;

    /// Most recent first.
    async fn get_failed_tasks(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, AdapterError>;

    /// Remove every record and bucket index of one queue.
    async fn clear_queue(&self, queue_name: &str) -> Result<(), AdapterError>;
}
