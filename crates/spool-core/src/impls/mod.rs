//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryAdapter**: プロセス内の Adapter
//! - **DurableAdapter**: KvStore 上の Adapter
//! - **InMemoryKvStore**: 開発・テスト用の KvStore
//! - **RedisKvStore**: `redis` feature で有効な本番用 KvStore

pub mod durable_adapter;
pub mod memory_adapter;
pub mod memory_kv;

#[cfg(feature = "redis")]
pub mod redis_kv;

pub use self::durable_adapter::{DEFAULT_KEY_PREFIX, DurableAdapter, TERMINAL_BUCKET_CAP};
pub use self::memory_adapter::MemoryAdapter;
pub use self::memory_kv::InMemoryKvStore;

#[cfg(feature = "redis")]
pub use self::redis_kv::RedisKvStore;
