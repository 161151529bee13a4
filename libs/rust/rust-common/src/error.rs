//! Retryability classification shared by downstream clients.
//!
//! Errors returned by store and provider clients are classified as either
//! transient or permanent so [`RetryPolicy`](crate::RetryPolicy) can decide
//! whether another attempt is worthwhile.

use std::time::Duration;
use thiserror::Error;

/// Classifies an error as transient (worth retrying) or permanent.
pub trait Retryable {
    /// Check if this error is retryable.
    ///
    /// Retryable errors are transient failures that may succeed on retry,
    /// such as dropped connections or an attempt that ran past its deadline.
    fn is_retryable(&self) -> bool;
}

/// A single attempt exceeded its deadline.
///
/// Converted into the caller's error type through `From`, so every client
/// chooses how a timed-out attempt is reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("attempt timed out after {0:?}")]
pub struct AttemptTimedOut(pub Duration);

impl AttemptTimedOut {
    /// The deadline that was exceeded.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_display() {
        let err = AttemptTimedOut(Duration::from_millis(500));
        assert_eq!(err.to_string(), "attempt timed out after 500ms");
        assert_eq!(err.deadline(), Duration::from_millis(500));
    }
}
