//! InMemoryKvStore - 開発・テスト用の KvStore
//!
//! Redis の LRANGE / LTRIM の index 規則（負数は末尾から、範囲外は切り詰め）を再現する。
//! プロセスが終われば消えるので、durable adapter の挙動確認専用。

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::ports::KvStore;

#[derive(Default)]
struct KvState {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    closed: bool,
}

impl KvState {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// Resolve a Redis-style inclusive range against a list of `len` items.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Process-local implementation of the `KvStore` capability.
#[derive(Default)]
pub struct InMemoryKvStore {
    state: Mutex<KvState>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_open()?;
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.strings.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.strings.remove(key);
        state.lists.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_open()?;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((s, e)) => list.range(s..=e).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lpush(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value);
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(());
        };
        match resolve_range(list.len(), start, stop) {
            Some((s, e)) => {
                list.truncate(e + 1);
                list.drain(..s);
            }
            None => {
                state.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        if let Some(list) = state.lists.get_mut(key) {
            list.retain(|v| v != value);
            if list.is_empty() {
                state.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.sets.entry(key.to_string()).or_default().insert(member);
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_open()?;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        Ok(())
    }
}
