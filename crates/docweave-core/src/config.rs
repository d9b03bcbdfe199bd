//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of retries after a connectivity failure.
pub const DEFAULT_RECONNECT_TRIES: u32 = 5;

/// Default fixed delay between retries.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Default maximum depth of a cascading removal.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Bounded retry policy for transient connectivity failures.
///
/// An operation is attempted once and then retried up to `tries` more times,
/// sleeping `backoff` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub tries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(tries: u32, backoff: Duration) -> Self {
        Self { tries, backoff }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.tries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_TRIES, DEFAULT_RECONNECT_BACKOFF)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy applied to every database operation.
    pub retry: RetryPolicy,

    /// Maximum nesting of CASCADE rules followed by a single removal.
    pub max_cascade_depth: usize,
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Disable retries.
    pub fn without_retry(mut self) -> Self {
        self.retry = RetryPolicy::none();
        self
    }

    /// Set the maximum cascade depth.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
