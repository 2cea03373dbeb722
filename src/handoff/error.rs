//! Error types for handoff delivery.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while handing a brief off to a human channel.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The collaborator failed in a way that may succeed on retry.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Rate limit exceeded.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Every allowed attempt failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error reported by the last attempt.
        last_error: String,
    },

    /// The work queue has no free slot.
    #[error("handoff queue is full")]
    QueueFull,

    /// The worker is gone.
    #[error("handoff queue is closed")]
    QueueClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HandoffError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Transient(_)
                | Self::RateLimited(_)
                | Self::Exhausted { .. }
                | Self::QueueFull
        )
    }

    /// Delay requested by the remote side, if any.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(seconds) => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

/// Convenience result alias for handoff operations.
pub type HandoffResult<T> = Result<T, HandoffError>;
