use std::time::Duration;

use weft_core::error::WeftError;
use weft_core::node::Node;

/// Per-node retry schedule for action attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl RetryPolicy {
    pub fn for_node(node: &Node, max_backoff_secs: u64) -> Self {
        Self {
            max_retries: node.retry_count,
            initial_backoff_secs: node.retry_delay_seconds,
            max_backoff_secs,
        }
    }

    /// Backoff before attempt `attempt + 1`: `initial * 2^attempt`, capped,
    /// then scaled by a 0.8x to 1.2x jitter. Saturates instead of overflowing.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.base_backoff_secs(attempt);
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::try_from_secs_f64(secs as f64 * jitter).unwrap_or(Duration::MAX)
    }

    fn base_backoff_secs(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs)
    }
}

/// Whether another attempt could change the outcome.
///
/// Unknown or unregistered action kinds, rejected action input, and bad node
/// config fail the same way every time.
pub fn is_retryable(e: &WeftError) -> bool {
    matches!(
        e,
        WeftError::ActionFailed { .. } | WeftError::ActionTimeout { .. } | WeftError::Io(_)
    )
}
