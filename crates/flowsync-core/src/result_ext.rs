//! Logging for results whose errors are not returned to a caller.
//!
//! Background tasks (screenshot polling, persisting executor reports) have no
//! one to hand a [`FlowError`](crate::error::FlowError) to. `log` records it with the caller's source
//! location: retryable errors at `warn`, everything else at `error`.

use crate::error::FlowResult;

/// Extension trait for logging a [`FlowResult`] error with context.
pub trait ResultExt<T> {
    /// Log the error with context if this is an `Err` variant.
    ///
    /// Returns the original `Result` unchanged.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use flowsync_core::ResultExt;
    ///
    /// let _ = transport.send(&message).await.log("requesting screenshot");
    /// ```
    fn log<S: ToString>(self, context: S) -> FlowResult<T>;
}

impl<T> ResultExt<T> for FlowResult<T> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> FlowResult<T> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            let file = format!("{}:{}", caller_location.file(), caller_location.line());
            let context = context.to_string();
            if e.is_retryable() {
                tracing::warn!(
                    target: "flowsync",
                    error = %e,
                    file = %file,
                    context = %context,
                    "Operation failed, may succeed on retry"
                );
            } else {
                tracing::error!(
                    target: "flowsync",
                    error = %e,
                    file = %file,
                    context = %context,
                    "Operation failed"
                );
            }
        }
        self
    }
}
