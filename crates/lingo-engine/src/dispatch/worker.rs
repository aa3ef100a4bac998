//! Pool worker thread.
//!
//! Each worker exclusively owns one guest context for its whole lifetime.
//! The worker allocates the context eagerly on startup (ready, not
//! entered), then consumes its sequence shard from the ring: for pool size
//! `P` and ordinal `k`, exactly the sequences where
//! `sequence & (P - 1) == k`. Continuations receive the context exclusively
//! held but not entered; failures are recorded in the pool's last-error
//! slot, never rethrown on the dispatcher thread. On shutdown the worker
//! closes its own context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use super::pool::PoolShared;
use super::ring::RingBuffer;
use crate::context::ContextAllocator;
use crate::error::GuestError;

pub(crate) struct ContextWorker {
    ordinal: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl ContextWorker {
    /// Spawn a worker thread for the given ordinal.
    pub(crate) fn spawn(
        ordinal: usize,
        pool_size: usize,
        ring: Arc<RingBuffer>,
        allocator: Arc<ContextAllocator>,
        shared: Arc<PoolShared>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name(format!("lingo-worker-{}", ordinal))
            .spawn(move || run_loop(ordinal, pool_size, ring, allocator, shared))
            .expect("failed to spawn context worker thread");

        Self {
            ordinal,
            handle: Some(handle),
        }
    }

    /// Join the worker thread; panics on the worker are already recorded,
    /// so a join failure is only logged.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(ordinal = self.ordinal, "worker thread terminated abnormally");
            }
        }
    }
}

fn run_loop(
    ordinal: usize,
    pool_size: usize,
    ring: Arc<RingBuffer>,
    allocator: Arc<ContextAllocator>,
    shared: Arc<PoolShared>,
) {
    let context = match allocator.allocate() {
        Ok(context) => context,
        Err(err) => {
            tracing::warn!(ordinal, error = %err, "context allocation failed; worker exiting");
            shared.record_error(GuestError::wrap("context allocation failed", err));
            return;
        }
    };
    context.bind("worker.ordinal", ordinal.to_string());
    tracing::debug!(
        ordinal,
        context_id = context.id().as_u64(),
        thread = ?thread::current().id(),
        "context worker online"
    );

    let mut sequence = ordinal as u64;
    while let Some(continuation) = ring.take(sequence) {
        // The context is handed over exclusively held but not entered:
        // entry is the continuation's job, so per-call setup can run
        // before the entry window opens.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| continuation(&context)));
        if let Err(payload) = outcome {
            let err = GuestError::from_panic(payload);
            tracing::warn!(ordinal, sequence, error = %err, "continuation failed");
            shared.record_error(err);
        }

        shared.mark_completed();
        sequence += pool_size as u64;
    }

    if let Err(err) = context.close() {
        tracing::warn!(ordinal, error = %err, "context close failed during shutdown");
    }
    tracing::debug!(ordinal, "context worker offline");
}
