//! Bounded exponential backoff for transport failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

/// Outcome of a single attempt that did not succeed.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth retrying (connect error, timeout, 5xx, 429).
    Transient(String),
    /// Retrying will not help; surface immediately.
    Fatal(E),
}

/// Final failure after the retry loop.
#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: String },
    Fatal { attempts: u32, error: E },
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based; the first attempt has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, AttemptError<E>>,
    ) -> Result<T, RetryError<E>> {
        let max = self.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=max {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(error)) => {
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        error,
                    })
                }
                Err(AttemptError::Transient(reason)) => {
                    tracing::warn!(attempt, max, %reason, "transient failure");
                    last = reason;
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: max,
            last,
        })
    }
}
