//! Engine error types.

use std::error::Error as StdError;

/// Errors surfaced by the context manager and engine lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// VM properties were submitted after the manager activated
    #[error("cannot configure after activation")]
    ConfigurationAfterActivation,

    /// The engine was used before any activation path succeeded
    #[error("engine is not initialized; call activate() first")]
    EngineNotInitialized,

    /// A guest context could not be allocated or entered
    #[error(transparent)]
    ContextAllocation(#[from] ContextError),

    /// A guest operation failed; always propagated to the acquiring caller
    #[error(transparent)]
    Guest(#[from] GuestError),

    /// Dispatch-layer failure
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors raised by a guest execution context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A second thread attempted to enter a context that is already entered
    #[error("context is entered by another thread")]
    ConcurrentEntry,

    /// The context has been closed and can no longer be entered
    #[error("context is closed")]
    Closed,

    /// The underlying language state could not be built
    #[error("context allocation failed: {0}")]
    Allocation(String),
}

/// Errors raised by the dispatcher layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Pool sizes must be a power of two for bitmask sequence sharding
    #[error("pool size must be a power of two, got {0}")]
    PoolSizeNotPowerOfTwo(usize),

    /// Ring capacities must be a power of two for index masking
    #[error("ring capacity must be a power of two, got {0}")]
    RingCapacityNotPowerOfTwo(usize),

    /// The ring must hold at least one slot per worker
    #[error("ring capacity {capacity} is smaller than pool size {pool_size}")]
    RingTooSmall {
        /// Requested ring capacity
        capacity: usize,
        /// Configured pool size
        pool_size: usize,
    },

    /// A per-thread context could not be allocated for a dispatch
    #[error(transparent)]
    Allocation(#[from] ContextError),

    /// Work was submitted before the dispatcher started
    #[error("dispatcher is not started")]
    NotStarted,

    /// Work was submitted while the dispatcher was shutting down
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Failure produced by guest code during an acquired operation.
///
/// Guest failures are opaque to the engine: they are propagated to the
/// caller of `acquire` after the context is released, never swallowed.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GuestError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl GuestError {
    /// Create a guest error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error with a message.
    pub fn wrap(message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Convert a caught panic payload into a guest error.
    ///
    /// Panics inside guest operations are caught on the executing thread so
    /// the context is still released and pool workers stay alive.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("guest operation panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("guest operation panicked: {s}")
        } else {
            "guest operation panicked".to_string()
        };
        Self {
            message,
            source: None,
        }
    }
}

impl From<std::io::Error> for GuestError {
    fn from(err: std::io::Error) -> Self {
        Self::wrap("guest I/O failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_error_message() {
        let err = GuestError::msg("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_guest_error_from_panic_payload() {
        let err = GuestError::from_panic(Box::new("exploded"));
        assert!(err.to_string().contains("exploded"));

        let err = GuestError::from_panic(Box::new(42_u64));
        assert_eq!(err.to_string(), "guest operation panicked");
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::ConfigurationAfterActivation;
        assert_eq!(err.to_string(), "cannot configure after activation");

        let err = EngineError::from(DispatchError::PoolSizeNotPowerOfTwo(6));
        assert_eq!(err.to_string(), "pool size must be a power of two, got 6");
    }
}
