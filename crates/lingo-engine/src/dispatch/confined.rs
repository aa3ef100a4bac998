//! Thread-confined dispatch strategy.
//!
//! Each calling thread gets its own guest context, allocated lazily on the
//! thread's first dispatch and reused for the thread's lifetime. Requests
//! run inline on the calling thread, so per-thread ordering is simply call
//! order and no cross-thread handoff ever happens.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use super::{ContextRequest, Dispatcher, DispatcherStats};
use crate::context::{ContextAllocator, GuestContext};
use crate::error::DispatchError;

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Dispatcher that confines each context to the thread that first used it.
pub struct ThreadConfinedDispatcher {
    allocator: Arc<ContextAllocator>,
    contexts: DashMap<ThreadId, Arc<GuestContext>>,
    state: AtomicU8,
    sequence: AtomicU64,
    completed: AtomicU64,
}

impl ThreadConfinedDispatcher {
    /// Create a dispatcher backed by the given allocator.
    pub fn new(allocator: Arc<ContextAllocator>) -> Self {
        Self {
            allocator,
            contexts: DashMap::new(),
            state: AtomicU8::new(STATE_CREATED),
            sequence: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// The context bound to the current thread, allocating it on first use.
    pub fn context_for_current_thread(&self) -> Result<Arc<GuestContext>, DispatchError> {
        let id = thread::current().id();
        if let Some(context) = self.contexts.get(&id) {
            return Ok(context.value().clone());
        }

        let context = Arc::new(self.allocator.allocate()?);
        self.contexts.insert(id, context.clone());
        Ok(context)
    }
}

impl Dispatcher for ThreadConfinedDispatcher {
    fn start(&self) -> Result<(), DispatchError> {
        match self.state.compare_exchange(
            STATE_CREATED,
            STATE_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(STATE_STARTED) => Ok(()),
            Err(_) => Err(DispatchError::ShuttingDown),
        }
    }

    fn dispatch(&self, request: ContextRequest) -> Result<u64, DispatchError> {
        match self.state.load(Ordering::Acquire) {
            STATE_STARTED => {}
            STATE_CREATED => return Err(DispatchError::NotStarted),
            _ => return Err(DispatchError::ShuttingDown),
        }

        let context = self.context_for_current_thread()?;
        request.into_continuation()(&context);

        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    fn shutdown(&self) {
        let previous = self.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if previous == STATE_STOPPED {
            return;
        }

        // Owning threads may be gone; dropping the registry closes the
        // contexts best-effort.
        self.contexts.clear();
        tracing::debug!("thread-confined dispatcher stopped");
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.contexts.len(),
            submitted: self.sequence.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ThreadConfinedDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultContextFactory;
    use crate::engine::{Engine, EngineSettings, LanguageId};
    use crate::props::VmProperty;
    use std::sync::atomic::AtomicUsize;

    fn test_dispatcher() -> ThreadConfinedDispatcher {
        let engine = Engine::build([LanguageId::Js], vec![], EngineSettings::default());
        let allocator = Arc::new(ContextAllocator::new(
            engine,
            Arc::new(vec![VmProperty::of("conf.opt", "yes")]),
            Arc::new(DefaultContextFactory),
            None,
            None,
        ));
        ThreadConfinedDispatcher::new(allocator)
    }

    #[test]
    fn test_dispatch_runs_inline() {
        let dispatcher = test_dispatcher();
        dispatcher.start().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        dispatcher
            .dispatch(ContextRequest::new(move |_ctx| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        // Inline execution: complete before dispatch returns
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_thread_reuses_context() {
        let dispatcher = test_dispatcher();
        dispatcher.start().unwrap();

        let first = dispatcher.context_for_current_thread().unwrap().id();
        let second = dispatcher.context_for_current_thread().unwrap().id();
        assert_eq!(first, second);
        assert_eq!(dispatcher.stats().workers, 1);
    }

    #[test]
    fn test_distinct_threads_get_distinct_contexts() {
        let dispatcher = Arc::new(test_dispatcher());
        dispatcher.start().unwrap();

        let here = dispatcher.context_for_current_thread().unwrap().id();
        let dispatcher2 = dispatcher.clone();
        let there = thread::spawn(move || dispatcher2.context_for_current_thread().unwrap().id())
            .join()
            .unwrap();

        assert_ne!(here, there);
        assert_eq!(dispatcher.stats().workers, 2);
    }

    #[test]
    fn test_properties_applied_to_confined_context() {
        let dispatcher = test_dispatcher();
        dispatcher.start().unwrap();

        let context = dispatcher.context_for_current_thread().unwrap();
        assert_eq!(context.property("conf.opt"), Some("yes".to_string()));
    }

    #[test]
    fn test_dispatch_after_shutdown_rejected() {
        let dispatcher = test_dispatcher();
        dispatcher.start().unwrap();
        dispatcher.shutdown();

        let result = dispatcher.dispatch(ContextRequest::new(|_ctx| {}));
        assert!(matches!(result, Err(DispatchError::ShuttingDown)));
    }
}
