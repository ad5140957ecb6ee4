//! Rejections raised by [`HarnessConfig::validate`](crate::HarnessConfig::validate).

use thiserror::Error;

/// A loaded configuration that cannot drive a harness run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The allocator would have no ports to hand out.
    #[error("port range {start}..{end} is empty")]
    EmptyPortRange { start: u16, end: u16 },

    /// A zero first backoff never grows, so retries could not reach their deadline.
    #[error("retry.initial_backoff_ms must be >= 1")]
    ZeroBackoff,

    #[error("retry.multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// A count that must allow at least one attempt or worker.
    #[error("{field} must be >= 1")]
    ZeroCount { field: &'static str },
}
