//! Domain model (ids, priority, status, records, events, errors).
//!
//! queue / adapter / manager から共通に使う型だけを置く。
//! ここには I/O も非同期処理も含めない。

pub mod errors;
pub mod events;
pub mod ids;
pub mod priority;
pub mod record;
pub mod state;

pub use self::errors::{AdapterError, BoxError, QueueError, StoreError};
pub use self::events::{EventStatus, TaskEvent};
pub use self::ids::TaskId;
pub use self::priority::{ParsePriorityError, Priority};
pub use self::record::{TaskPatch, TaskRecord};
pub use self::state::TaskStatus;
