//! Errors - エラー型と分類
//!
//! - `StoreError`: KvStore（Redis など）の I/O エラー
//! - `AdapterError`: Adapter の永続化エラー
//! - `QueueError`: 管理系のエラー（重複 queue、未知の queue、stop 後の submit）
//!
//! タスク自体の失敗はここには含まれない。retry の状態機械で処理され、
//! 最終的に TaskEvent（Failed）として通知される。

use thiserror::Error;

/// Error type returned by task callables.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection is closed")]
    Closed,

    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to (de)serialize task record: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{0}' already exists")]
    DuplicateQueue(String),

    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error("queue '{0}' is stopping and no longer accepts tasks")]
    Stopping(String),

    #[error("queue '{0}' requests a durable adapter but no store was supplied")]
    MissingStore(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        QueueError::Adapter(AdapterError::Store(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_queue() {
        let e = QueueError::Stopping("emails".to_string());
        assert!(e.to_string().contains("emails"));

        let e: QueueError = StoreError::Closed.into();
        assert_eq!(e.to_string(), "store connection is closed");
    }
}
