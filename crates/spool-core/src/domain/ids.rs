//! Task identifier.
//!
//! TaskId は queue 名で修飾されない「素の」ID です。
//! 呼び出し側が任意の文字列を渡すことも、`IdGenerator` に生成させることもできます。
//!
//! # 注意
//! 同じ Adapter インスタンスに属する複数の queue の間で ID が衝突した場合の
//! 挙動は未定義です（lookup は queue をまたいで最初に見つかったものを返す）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a Task (one submitted unit of work).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_serializes_as_bare_string() {
        let id = TaskId::new("invoice-42");
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "\"invoice-42\"");

        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_is_the_raw_value() {
        let id: TaskId = "abc".into();
        assert_eq!(id.to_string(), "abc");
        assert_eq!(id.as_str(), "abc");
    }
}
