//! # Exponential Backoff
//!
//! Requeue delays for reconciliation errors. Fabric objects are usually fixed
//! within seconds (a missing namespace gets created, a switch shows up), so the
//! sequence starts short and doubles up to a cap.
//!
//! Sequence with the defaults: 5s, 10s, 20s, 40s, 80s, 160s, 300s (max).

use std::time::Duration;

/// Default first requeue delay in seconds
pub const DEFAULT_MIN_SECONDS: u64 = 5;

/// Default requeue cap in seconds
pub const DEFAULT_MAX_SECONDS: u64 = 300;

/// Exponential backoff calculator
///
/// Each backoff is double the previous one, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SECONDS, DEFAULT_MAX_SECONDS)
    }
}

impl ExponentialBackoff {
    /// Create a new backoff with specified minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - First backoff duration (also the reset value)
    /// * `max_seconds` - Cap for the sequence
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        self.current_seconds = self
            .current_seconds
            .saturating_mul(2)
            .min(self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current_seconds = self.min_seconds;
    }

    /// Calculate the backoff for a given error count without keeping state
    ///
    /// Error count 0 and 1 both map to `min_seconds`; every further error
    /// doubles the delay until `max_seconds`.
    #[must_use]
    pub fn calculate_for_error_count(
        error_count: u32,
        min_seconds: u64,
        max_seconds: u64,
    ) -> Duration {
        let doublings = error_count.saturating_sub(1).min(32);
        let seconds = min_seconds
            .saturating_mul(1u64 << doublings)
            .min(max_seconds);
        Duration::from_secs(seconds)
    }
}
