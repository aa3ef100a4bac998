//! Wait strategies for the dispatch ring.
//!
//! The strategy trades CPU for latency: busy-spinning pins a core for the
//! lowest latency, sleeping bounds the spin before yielding the core, and
//! blocking parks on a condvar until signalled.

use std::hint;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const SPIN_LIMIT: u32 = 128;
const YIELD_LIMIT: u32 = 256;
const PARK_INTERVAL: Duration = Duration::from_micros(100);
const BLOCK_INTERVAL: Duration = Duration::from_millis(1);

/// How ring producers and workers wait for their turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Spin without yielding; lowest latency, one core fully pinned
    BusySpin,

    /// Bounded spins, then yields, then short parks; the default
    #[default]
    Sleeping,

    /// Park on a condvar until signalled; lowest CPU, highest latency
    Blocking,
}

impl WaitStrategy {
    /// Perform one wait step. `attempts` carries the caller's retry count.
    pub(crate) fn idle(&self, attempts: &mut u32, gate: &Gate) {
        match self {
            WaitStrategy::BusySpin => hint::spin_loop(),
            WaitStrategy::Sleeping => {
                if *attempts < SPIN_LIMIT {
                    hint::spin_loop();
                } else if *attempts < YIELD_LIMIT {
                    thread::yield_now();
                } else {
                    thread::sleep(PARK_INTERVAL);
                }
                *attempts = attempts.saturating_add(1);
            }
            WaitStrategy::Blocking => gate.wait_brief(),
        }
    }
}

/// Signal point for the blocking strategy.
pub(crate) struct Gate {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Park until notified or a short timeout elapses; the caller re-checks
    /// its condition either way, so a missed notify cannot deadlock.
    pub(crate) fn wait_brief(&self) {
        let mut guard = self.lock.lock();
        let _ = self.cond.wait_for(&mut guard, BLOCK_INTERVAL);
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }
}
