//! KvStore port - durable adapter が必要とする最小限の key / list / set 操作
//!
//! Redis のコマンド体系に合わせているが、同じ意味論を持つ backend なら何でもよい。
//!
//! # 実装
//! - `InMemoryKvStore`: 開発・テスト用
//! - `RedisKvStore`: `redis` feature で有効（本番用）

use async_trait::async_trait;

use crate::domain::StoreError;

/// Narrow key-value/list/set capability.
///
/// list の index は Redis と同じく負数で末尾から数える（`-1` は最後の要素）。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Inclusive range, like `LRANGE`.
    async fn lrange(&self, key: &str, start: isize, stop: isize)
    -> Result<Vec<String>, StoreError>;

    /// Prepend, like `LPUSH`.
    async fn lpush(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Keep only the inclusive range, like `LTRIM`.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError>;

    /// Remove every occurrence of `value`, like `LREM key 0 value`.
    async fn lrem(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: String) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Release the underlying connection. Further calls may fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
