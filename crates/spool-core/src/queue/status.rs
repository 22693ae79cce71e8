use serde::{Deserialize, Serialize};

/// Point-in-time counts for one queue.
///
/// 4 回の独立した読み出しから作るので、フィールド間の整合性は保証しない。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub concurrency: usize,
}
