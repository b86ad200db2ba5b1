//! # Exponential Backoff
//!
//! Provides the per-Ingress requeue delay used after failed reconciles.
//! Sequence: 5s, 10s, 20s, 40s, 80s, 160s, 300s (max).

/// Exponential backoff calculator
///
/// Each backoff doubles the previous one, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value in seconds (first value and value after reset)
    min_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - First backoff duration (typically 5)
    /// * `max_seconds` - Cap for the sequence (typically 300)
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
        self.current_seconds = std::cmp::min(self.current_seconds.saturating_mul(2), self.max_seconds);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current_seconds = self.min_seconds;
    }
}
