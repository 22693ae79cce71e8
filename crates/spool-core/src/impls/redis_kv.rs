//! RedisKvStore - Redis 上の KvStore 実装（`redis` feature）
//!
//! `ConnectionManager` は clone が安価で、切断時に自動で再接続する。
//! `close()` 後は内部の接続を捨て、以降の呼び出しは `StoreError::Closed` を返す。

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::ports::KvStore;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub struct RedisKvStore {
    conn: Mutex<Option<ConnectionManager>>,
}

impl RedisKvStore {
    /// Connect to `redis://host:port/db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    async fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.lock().await.clone().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn lpush(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.ltrim::<_, ()>(key, start, stop).await?;
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.lrem::<_, _, ()>(key, 0, value).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: String) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.conn.lock().await.take();
        Ok(())
    }
}
