//! Events - タスクの終端イベント
//!
//! TaskEvent は terminal settlement（成功 or retry 枯渇）ごとに 1 回だけ発行される。
//! retry の各試行では発行されない。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::TaskId;

/// Terminal outcome carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Completed,
    Failed,
}

/// TaskEvent は listener に渡されるイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub queue_name: String,
    pub status: EventStatus,

    /// The task's input payload.
    pub data: Option<serde_json::Value>,

    /// Value returned by the callable (completed only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time spent in the final attempt.
    pub duration: Duration,

    pub retry_count: u32,
}

impl TaskEvent {
    pub fn is_failure(&self) -> bool {
        self.status == EventStatus::Failed
    }
}
