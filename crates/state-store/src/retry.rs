//! Conflict retry loop
//!
//! Read-modify-write sequences against the store are wrapped in
//! `retry_on_conflict`: the closure is re-run after a jittered delay whenever it
//! fails with a conflict, up to `Backoff::steps` attempts.

use crate::error::IsConflict;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Number of attempts
    pub steps: u32,
    /// Initial delay
    pub duration: Duration,
    /// Delay multiplier per attempt
    pub factor: f64,
    /// Random extra delay as a fraction of the delay
    pub jitter: f64,
}

impl Backoff {
    /// 10 attempts, 10ms apart, with 10% jitter
    pub const DEFAULT_RETRY: Backoff = Backoff {
        steps: 10,
        duration: Duration::from_millis(10),
        factor: 1.0,
        jitter: 0.1,
    };

    /// Delay before attempt `attempt + 1`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.duration.as_secs_f64() * self.factor.powi(exp);
        let jitter = if self.jitter > 0.0 {
            base * self.jitter * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::DEFAULT_RETRY
    }
}

/// Run `f` until it succeeds, fails with a non-conflict error, or the attempts
/// run out
///
/// `f` gets the attempt number starting at zero, so the first attempt can use a
/// cached object and later attempts re-read it.
pub async fn retry_on_conflict<T, E, F, Fut>(backoff: Backoff, mut f: F) -> Result<T, E>
where
    E: IsConflict + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay(attempt);
                debug!("Conflict on attempt {}: {}, retrying in {:?}", attempt + 1, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            kind: "DHCPSubnet".to_string(),
            name: "vpc-1--default".to_string(),
            message: "stale".to_string(),
        }
    }

    #[test]
    fn test_delay_with_jitter_bounds() {
        let backoff = Backoff::DEFAULT_RETRY;
        for attempt in 0..10 {
            let d = backoff.delay(attempt);
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(11));
        }
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = retry_on_conflict(Backoff::DEFAULT_RETRY, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(conflict())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_steps() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_on_conflict(Backoff::DEFAULT_RETRY, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_on_conflict(Backoff::DEFAULT_RETRY, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::NotFound {
                    kind: "DHCPSubnet".to_string(),
                    name: "x".to_string(),
                })
            }
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
