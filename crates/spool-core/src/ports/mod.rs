//! Ports - 抽象化レイヤー
//!
//! 各 trait はストレージや時刻などの外部依存へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。実装は `impls` にあります。

pub mod adapter;
pub mod clock;
pub mod id_generator;
pub mod kv_store;

pub use self::adapter::Adapter;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv_store::KvStore;
