// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Retry helper with exponential backoff.
//!
//! Idempotent calls opt in through [`with_retry`]; non-idempotent
//! ones (heartbeats, progress updates) never retry — a lost heartbeat
//! is better than a stale backlog.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry policy: attempt count and backoff base.
///
/// The delay before attempt `n + 1` is `backoff_secs ^ n` seconds
/// (2 s, 4 s with the defaults).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Backoff base in seconds
    pub backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 2,
        }
    }
}

/// Run `op` under `policy`, returning `None` once every attempt has
/// failed. Callers must tolerate the `None`.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, name: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                if attempt < policy.max_attempts {
                    let delay = policy.backoff_secs.pow(attempt);
                    warn!(
                        "{name} failed (attempt {attempt}/{}): {e}; retrying in {delay}s",
                        policy.max_attempts
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                } else {
                    error!("{name} failed after {} attempts: {e}", policy.max_attempts);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(7) }
        })
        .await;
        assert_eq!(result, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast_policy(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let calls = AtomicU32::new(0);
        let result: Option<u32> = with_retry(fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
