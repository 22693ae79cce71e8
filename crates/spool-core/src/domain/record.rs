//! Task record: the persisted twin of a task (everything except the callable).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Priority, TaskId, TaskStatus};

/// Persisted metadata for a task.
///
/// Design:
/// - Adapter が保存・取得する唯一の型。callable は含まない。
/// - `error` は構造化されたエラーではなくメッセージ文字列のみ。
/// - JSON は camelCase、時刻は epoch millis。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub queue_name: String,
    pub status: TaskStatus,
    pub priority: Priority,

    #[serde(default)]
    pub data: Option<serde_json::Value>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failed attempts so far.
    pub retry_count: u32,

    pub max_retries: u32,
}

impl TaskRecord {
    /// A freshly admitted, pending record.
    pub fn new(
        id: TaskId,
        queue_name: impl Into<String>,
        priority: Priority,
        data: Option<serde_json::Value>,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue_name: queue_name.into(),
            status: TaskStatus::Pending,
            priority,
            data,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Apply a shallow patch in place.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(error) = &patch.error {
            self.error = error.clone();
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
    }
}

/// Partial update merged onto a stored record by `Adapter::update_task`.
///
/// `None` のフィールドは変更しない。`Some(None)` はフィールドをクリアする。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<String>>,
    pub retry_count: Option<u32>,
}

impl TaskPatch {
    /// Mark as running.
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Running),
            started_at: Some(Some(now)),
            ..Self::default()
        }
    }

    /// Mark as completed.
    pub fn completed(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            completed_at: Some(Some(now)),
            ..Self::default()
        }
    }

    /// Move back to pending for another attempt.
    pub fn requeue(retry_count: u32) -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            started_at: Some(None),
            error: Some(None),
            retry_count: Some(retry_count),
            ..Self::default()
        }
    }

    /// Mark as failed (terminal).
    pub fn failed(now: DateTime<Utc>, error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            completed_at: Some(Some(now)),
            error: Some(Some(error.into())),
            retry_count: Some(retry_count),
            ..Self::default()
        }
    }
}
