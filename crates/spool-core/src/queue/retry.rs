//! Retry policy: decides whether a failed attempt is retried, and when.

use std::time::Duration;

/// Retry policy for failed tasks.
///
/// Fixed interval: 何回目の失敗でも同じ `interval` だけ待つ（backoff なし）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before a failed task is offered to dispatch again.
    pub interval: Duration,
}

/// The next action after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the task back to pending and re-trigger dispatch after `delay`.
    Retry { delay: Duration },

    /// Retries exhausted: mark the task failed.
    GiveUp,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Delay before the retry following failure number `retry_count`.
    pub fn next_delay(&self, _retry_count: u32) -> Duration {
        self.interval
    }

    /// Decide what happens after a failure.
    ///
    /// # Arguments
    /// * `retry_count` - failures so far, including the one just observed (1-indexed).
    /// * `max_retries` - the record's own budget (persisted at admission).
    ///
    /// `retry_count <= max_retries` なら retry、超えたら give up。
    /// つまり callable は最大 `max_retries + 1` 回実行される。
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count <= max_retries {
            RetryDecision::Retry {
                delay: self.next_delay(retry_count),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
