//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Boxed error coming from a [`Manager`](crate::Manager) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the pool.
///
/// `Closed`, `Timeout`, `Cancelled`, `Exhausted` and `Create` are returned
/// synchronously from acquisition. `Destroy` never reaches a caller: teardown
/// happens after ownership was given up, so it is only delivered to the
/// [`ErrorSink`](crate::ErrorSink).
#[derive(Error, Debug)]
pub enum Error {
    /// The pool has been closed and will never hand out resources again.
    #[error("Pool is closed")]
    Closed,

    /// The deadline passed before a resource became available.
    #[error("Timed out after {}ms waiting for a pooled resource", waited.as_millis())]
    Timeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The caller's cancellation token fired while waiting.
    #[error("Acquire was cancelled")]
    Cancelled,

    /// No idle resource and no spare capacity (non-blocking acquire only).
    #[error("Pool exhausted: all {max_active} resources are in use")]
    Exhausted {
        /// Configured capacity of the pool.
        max_active: usize,
    },

    /// The manager failed to create a resource.
    #[error("Failed to create resource: {source}")]
    Create {
        /// The manager's error
        #[source]
        source: BoxError,
    },

    /// The manager failed to destroy a resource.
    #[error("Failed to destroy resource {resource_id}: {source}")]
    Destroy {
        /// Pool-assigned id of the resource being destroyed.
        resource_id: u64,
        /// The manager's error
        #[source]
        source: BoxError,
    },

    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn create<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Create {
            source: Box::new(source),
        }
    }

    pub(crate) fn destroy<E>(resource_id: u64, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Destroy {
            resource_id,
            source: Box::new(source),
        }
    }

    /// Check if a caller may sensibly retry the failed operation.
    ///
    /// A closed pool stays closed and a broken configuration stays broken;
    /// everything else is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::Cancelled
            | Self::Exhausted { .. }
            | Self::Create { .. } => true,
            Self::Closed | Self::Destroy { .. } | Self::Configuration { .. } => false,
        }
    }

    /// Whether the error is terminal for the pool that produced it.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
