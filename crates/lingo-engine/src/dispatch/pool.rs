//! Pooled dispatch strategy.
//!
//! A fixed-size set of worker threads, each exclusively owning one guest
//! context, fed through a bounded ring buffer and sharded by sequence
//! bitmask. Pool size must be a power of two; this is what makes
//! `sequence & (pool_size - 1)` a valid ownership rule, and it is validated
//! at construction rather than discovered at dispatch time.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ring::{RingBuffer, DEFAULT_RING_CAPACITY};
use super::worker::ContextWorker;
use super::{ContextRequest, Dispatcher, DispatcherStats, WaitStrategy};
use crate::context::ContextAllocator;
use crate::error::{DispatchError, GuestError};

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Configuration for a [`PooledDispatcher`].
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Worker count; 0 means the CPU count rounded down to a power of two.
    /// Must be a power of two.
    pub pool_size: usize,

    /// Ring capacity; 0 means [`DEFAULT_RING_CAPACITY`]. Must be a power of
    /// two and at least the pool size.
    pub ring_capacity: usize,

    /// How workers and producers wait on the ring.
    pub wait: WaitStrategy,
}

impl PoolOptions {
    /// Resolve defaults and validate. Returns `(pool_size, ring_capacity)`.
    pub fn resolved(&self) -> Result<(usize, usize), DispatchError> {
        let pool_size = if self.pool_size == 0 {
            floor_pow2(num_cpus::get())
        } else {
            self.pool_size
        };
        if !pool_size.is_power_of_two() {
            return Err(DispatchError::PoolSizeNotPowerOfTwo(pool_size));
        }

        let capacity = if self.ring_capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            self.ring_capacity
        };
        if !capacity.is_power_of_two() {
            return Err(DispatchError::RingCapacityNotPowerOfTwo(capacity));
        }
        if capacity < pool_size {
            return Err(DispatchError::RingTooSmall {
                capacity,
                pool_size,
            });
        }

        Ok((pool_size, capacity))
    }
}

fn floor_pow2(n: usize) -> usize {
    if n <= 1 {
        1
    } else if n.is_power_of_two() {
        n
    } else {
        n.next_power_of_two() >> 1
    }
}

/// Counters and the last-error slot shared between the pool and its workers.
pub(crate) struct PoolShared {
    submitted: AtomicU64,
    completed: AtomicU64,
    last_error: Mutex<Option<GuestError>>,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn record_error(&self, err: GuestError) {
        *self.last_error.lock() = Some(err);
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fixed worker pool fed by a bounded, sharded ring buffer.
pub struct PooledDispatcher {
    pool_size: usize,
    ring: Arc<RingBuffer>,
    allocator: Arc<ContextAllocator>,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<ContextWorker>>,
    state: AtomicU8,
}

impl PooledDispatcher {
    /// Create a pool from validated options. Workers are not spawned until
    /// [`Dispatcher::start`].
    pub fn new(
        options: PoolOptions,
        allocator: Arc<ContextAllocator>,
    ) -> Result<Self, DispatchError> {
        let (pool_size, capacity) = options.resolved()?;
        let ring = Arc::new(RingBuffer::with_capacity(capacity, options.wait)?);

        Ok(Self {
            pool_size,
            ring,
            allocator,
            shared: Arc::new(PoolShared::new()),
            workers: Mutex::new(Vec::with_capacity(pool_size)),
            state: AtomicU8::new(STATE_CREATED),
        })
    }

    /// Number of workers in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Last continuation failure observed by a worker, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .as_ref()
            .map(|err| err.to_string())
    }

    /// Wait until every accepted request has been executed.
    pub fn drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let submitted = self.shared.submitted.load(Ordering::Acquire);
            let completed = self.shared.completed.load(Ordering::Acquire);
            if submitted == completed {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Dispatcher for PooledDispatcher {
    fn start(&self) -> Result<(), DispatchError> {
        if self
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return match self.state.load(Ordering::Acquire) {
                STATE_STARTED => Ok(()),
                _ => Err(DispatchError::ShuttingDown),
            };
        }

        let mut workers = self.workers.lock();
        for ordinal in 0..self.pool_size {
            workers.push(ContextWorker::spawn(
                ordinal,
                self.pool_size,
                self.ring.clone(),
                self.allocator.clone(),
                self.shared.clone(),
            ));
        }
        tracing::debug!(pool_size = self.pool_size, "dispatch pool started");
        Ok(())
    }

    fn dispatch(&self, request: ContextRequest) -> Result<u64, DispatchError> {
        match self.state.load(Ordering::Acquire) {
            STATE_STARTED => {}
            STATE_CREATED => return Err(DispatchError::NotStarted),
            _ => return Err(DispatchError::ShuttingDown),
        }

        let sequence = self.ring.publish(request.into_continuation())?;
        self.shared.submitted.fetch_add(1, Ordering::Release);
        Ok(sequence)
    }

    fn shutdown(&self) {
        let previous = self.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if previous != STATE_STARTED {
            return;
        }

        self.ring.close();
        for worker in self.workers.lock().iter_mut() {
            worker.join();
        }
        tracing::debug!(pool_size = self.pool_size, "dispatch pool stopped");
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.workers.lock().len(),
            submitted: self.shared.submitted.load(Ordering::Acquire),
            completed: self.shared.completed.load(Ordering::Acquire),
        }
    }
}

impl Drop for PooledDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultContextFactory;
    use crate::engine::{Engine, EngineSettings, LanguageId};
    use std::sync::atomic::AtomicUsize;

    fn test_allocator() -> Arc<ContextAllocator> {
        let engine = Engine::build([LanguageId::Js], vec![], EngineSettings::default());
        Arc::new(ContextAllocator::new(
            engine,
            Arc::new(Vec::new()),
            Arc::new(DefaultContextFactory),
            None,
            None,
        ))
    }

    fn pool_with_size(pool_size: usize) -> Result<PooledDispatcher, DispatchError> {
        let options = PoolOptions {
            pool_size,
            ring_capacity: 64,
            wait: WaitStrategy::Sleeping,
        };
        PooledDispatcher::new(options, test_allocator())
    }

    #[test]
    fn test_power_of_two_sizes_accepted() {
        for size in [1, 2, 4, 8] {
            assert_eq!(pool_with_size(size).unwrap().pool_size(), size);
        }
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        for size in [3, 6, 12] {
            assert!(matches!(
                pool_with_size(size),
                Err(DispatchError::PoolSizeNotPowerOfTwo(_))
            ));
        }
    }

    #[test]
    fn test_ring_capacity_validation() {
        let options = PoolOptions {
            pool_size: 4,
            ring_capacity: 100,
            wait: WaitStrategy::Sleeping,
        };
        assert!(matches!(
            PooledDispatcher::new(options, test_allocator()),
            Err(DispatchError::RingCapacityNotPowerOfTwo(100))
        ));

        let options = PoolOptions {
            pool_size: 8,
            ring_capacity: 4,
            wait: WaitStrategy::Sleeping,
        };
        assert!(matches!(
            PooledDispatcher::new(options, test_allocator()),
            Err(DispatchError::RingTooSmall { .. })
        ));
    }

    #[test]
    fn test_defaults_resolve_to_powers_of_two() {
        let (pool_size, capacity) = PoolOptions::default().resolved().unwrap();
        assert!(pool_size.is_power_of_two());
        assert_eq!(capacity, DEFAULT_RING_CAPACITY);
    }

    #[test]
    fn test_floor_pow2() {
        assert_eq!(floor_pow2(0), 1);
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(3), 2);
        assert_eq!(floor_pow2(4), 4);
        assert_eq!(floor_pow2(6), 4);
        assert_eq!(floor_pow2(12), 8);
    }

    #[test]
    fn test_dispatch_before_start_rejected() {
        let pool = pool_with_size(2).unwrap();
        let result = pool.dispatch(ContextRequest::new(|_ctx| {}));
        assert!(matches!(result, Err(DispatchError::NotStarted)));
    }

    #[test]
    fn test_start_is_idempotent() {
        let pool = pool_with_size(2).unwrap();
        pool.start().unwrap();
        pool.start().unwrap();
        assert_eq!(pool.stats().workers, 2);
        pool.shutdown();
    }

    #[test]
    fn test_requests_execute_and_drain() {
        let pool = pool_with_size(2).unwrap();
        pool.start().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let hits = hits.clone();
            pool.dispatch(ContextRequest::new(move |_ctx| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert!(pool.drain(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 32);
        pool.shutdown();
    }

    #[test]
    fn test_dispatch_after_shutdown_rejected() {
        let pool = pool_with_size(2).unwrap();
        pool.start().unwrap();
        pool.shutdown();

        let result = pool.dispatch(ContextRequest::new(|_ctx| {}));
        assert!(matches!(result, Err(DispatchError::ShuttingDown)));
    }

    #[test]
    fn test_continuation_panic_recorded_not_rethrown() {
        let pool = pool_with_size(1).unwrap();
        pool.start().unwrap();

        pool.dispatch(ContextRequest::new(|_ctx| panic!("guest exploded")))
            .unwrap();
        assert!(pool.drain(Duration::from_secs(5)));

        let last = pool.last_error().unwrap();
        assert!(last.contains("guest exploded"));

        // The worker survived and keeps executing
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        pool.dispatch(ContextRequest::new(move |_ctx| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        assert!(pool.drain(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        pool.shutdown();
    }
}
