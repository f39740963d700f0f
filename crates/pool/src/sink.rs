//! Where teardown errors go.

use crate::error::Error;

/// Receives errors that happen off the caller's path: destructor failures
/// from release, reaping and close.
///
/// Any `Fn(&Error) + Send + Sync` closure is a sink.
pub trait ErrorSink: Send + Sync + 'static {
    /// Report one error. Must not block.
    fn report(&self, error: &Error);
}

impl<F> ErrorSink for F
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn report(&self, error: &Error) {
        self(error);
    }
}

/// Default sink: logs through `tracing` at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, error: &Error) {
        match error {
            Error::Destroy { resource_id, .. } => {
                tracing::warn!(resource_id, error = %error, "Pooled resource teardown failed");
            }
            _ => tracing::warn!(error = %error, "Pool background error"),
        }
    }
}
