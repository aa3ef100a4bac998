//! Context request dispatch.
//!
//! A [`Dispatcher`] routes "run this inside a context" requests to guest
//! contexts while preserving thread confinement. Two interchangeable
//! strategies are provided, chosen at activation time:
//!
//! - [`ThreadConfinedDispatcher`]: one context per calling thread, requests
//!   run inline (trivially FIFO per thread)
//! - [`PooledDispatcher`]: a fixed pool of workers fed by a bounded ring
//!   buffer, sharded by sequence bitmask so each request is executed by
//!   exactly one worker

mod confined;
mod pool;
mod ring;
mod wait;
mod worker;

pub use confined::ThreadConfinedDispatcher;
pub use pool::{PoolOptions, PooledDispatcher};
pub use ring::{RingBuffer, DEFAULT_RING_CAPACITY};
pub use wait::WaitStrategy;

use crate::context::GuestContext;
use crate::error::DispatchError;

/// Work executed against an exclusively-held guest context.
///
/// The context is handed over held but not entered, so the continuation can
/// run per-call setup before opening the entry window itself.
pub type Continuation = Box<dyn FnOnce(&GuestContext) + Send + 'static>;

/// A queued unit of work destined for dispatch to a context.
pub struct ContextRequest {
    continuation: Continuation,
}

impl ContextRequest {
    /// Wrap a continuation into a request.
    pub fn new(continuation: impl FnOnce(&GuestContext) + Send + 'static) -> Self {
        Self {
            continuation: Box::new(continuation),
        }
    }

    pub(crate) fn into_continuation(self) -> Continuation {
        self.continuation
    }
}

/// Counters describing a dispatcher's activity.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Live workers (pooled) or allocated per-thread contexts (confined)
    pub workers: usize,

    /// Requests accepted so far
    pub submitted: u64,

    /// Requests fully executed so far
    pub completed: u64,
}

/// Strategy interface for routing context requests.
pub trait Dispatcher: Send + Sync {
    /// Start the dispatcher. Idempotent.
    fn start(&self) -> Result<(), DispatchError>;

    /// Submit a request; returns its sequence number.
    ///
    /// For the pooled strategy this enqueues and returns immediately; for
    /// the thread-confined strategy the request runs inline before this
    /// returns.
    fn dispatch(&self, request: ContextRequest) -> Result<u64, DispatchError>;

    /// Stop the dispatcher, releasing owned contexts. Best-effort: close
    /// failures are logged, never propagated.
    fn shutdown(&self);

    /// Activity counters.
    fn stats(&self) -> DispatcherStats;
}
