use thiserror::Error;

/// Result type for timer operations.
pub type TimerResult<T> = Result<T, TimerError>;

/// Errors surfaced synchronously by [`Timer`](crate::Timer) mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },

    #[error("cannot enable a disposed timer")]
    ObjectDisposed,
}
