//! Guest execution contexts.
//!
//! A [`GuestContext`] wraps the language-level execution state derived from
//! the shared engine. Contexts are not safe for concurrent entry: at most
//! one thread may be inside a context at any instant. Entry is re-entrant on
//! the owning thread and every enter must be matched by a leave; the
//! [`ContextGuard`] returned by [`GuestContext::enter_scoped`] guarantees the
//! matching leave on every exit path, including panics.

mod factory;

pub use factory::{
    BuilderHook, ContextAllocator, ContextFactory, DefaultContextFactory, SpawnHook,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::engine::{EngineHandle, GuestStreams};
use crate::error::ContextError;
use crate::props::VmProperty;

/// Unique identifier for a guest context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Builder for a guest context.
///
/// Collects the engine handle, the accumulated VM properties and a binding
/// seed; a [`ContextFactory`] produces builders from the engine and
/// finalizes them into ready contexts.
pub struct ContextBuilder {
    engine: EngineHandle,
    properties: Vec<VmProperty>,
    bindings: FxHashMap<String, String>,
}

impl ContextBuilder {
    /// Start a builder for the given engine.
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            properties: Vec::new(),
            bindings: FxHashMap::default(),
        }
    }

    /// Add a single property.
    pub fn property(mut self, property: VmProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a batch of properties, applied in order.
    pub fn properties(mut self, properties: impl IntoIterator<Item = VmProperty>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Seed a guest binding.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// The engine this builder derives from.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Finalize into a ready (not entered) context.
    ///
    /// Properties are resolved exactly once here; later reads see the
    /// configuration frozen at allocation time.
    pub fn build(self) -> Result<GuestContext, ContextError> {
        let mut config = FxHashMap::default();
        for property in &self.properties {
            config.insert(property.symbol().to_string(), property.value());
        }

        Ok(GuestContext {
            id: ContextId::next(),
            engine: self.engine,
            config,
            bindings: Mutex::new(self.bindings),
            entry: Mutex::new(EntryState::default()),
            closed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug, Default)]
struct EntryState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// An isolated, thread-confined unit of guest-code execution state.
#[derive(Debug)]
pub struct GuestContext {
    id: ContextId,
    engine: EngineHandle,
    config: FxHashMap<String, Option<String>>,
    bindings: Mutex<FxHashMap<String, String>>,
    entry: Mutex<EntryState>,
    closed: AtomicBool,
}

impl GuestContext {
    /// Unique id of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The engine this context derives from.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Configuration applied at allocation, by symbol.
    pub fn property(&self, symbol: &str) -> Option<String> {
        self.config.get(symbol).cloned().flatten()
    }

    /// Standard streams visible to guest code in this context.
    pub fn streams(&self) -> GuestStreams {
        self.engine.guest_streams()
    }

    /// Set a guest binding.
    pub fn bind(&self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.lock().insert(name.into(), value.into());
    }

    /// Read a guest binding.
    pub fn binding(&self, name: &str) -> Option<String> {
        self.bindings.lock().get(name).cloned()
    }

    /// Enter the context on the current thread.
    ///
    /// Fails with [`ContextError::ConcurrentEntry`] if another thread is
    /// inside. Re-entrant on the owning thread; each enter must be matched
    /// by a [`leave`](Self::leave).
    pub fn enter(&self) -> Result<(), ContextError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ContextError::Closed);
        }

        let current = thread::current().id();
        let mut entry = self.entry.lock();
        match entry.owner {
            Some(owner) if owner != current => Err(ContextError::ConcurrentEntry),
            _ => {
                entry.owner = Some(current);
                entry.depth += 1;
                Ok(())
            }
        }
    }

    /// Leave the context.
    pub fn leave(&self) {
        let mut entry = self.entry.lock();
        assert!(entry.depth > 0, "context left more times than entered");
        entry.depth -= 1;
        if entry.depth == 0 {
            entry.owner = None;
        }
    }

    /// Enter with a guard that leaves on drop, on every exit path.
    pub fn enter_scoped(&self) -> Result<ContextGuard<'_>, ContextError> {
        self.enter()?;
        Ok(ContextGuard { context: self })
    }

    /// Current entry depth (0 when nobody is inside).
    pub fn entry_depth(&self) -> usize {
        self.entry.lock().depth
    }

    /// Close the context. Further entry fails with [`ContextError::Closed`].
    ///
    /// A context is only closed by its owning worker/thread during
    /// shutdown; closing while another thread is inside is refused.
    pub fn close(&self) -> Result<(), ContextError> {
        let entry = self.entry.lock();
        if entry.depth > 0 && entry.owner != Some(thread::current().id()) {
            return Err(ContextError::ConcurrentEntry);
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the context has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for GuestContext {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// RAII guard for a context entry; leaves the context on drop.
pub struct ContextGuard<'a> {
    context: &'a GuestContext,
}

impl ContextGuard<'_> {
    /// The entered context.
    pub fn context(&self) -> &GuestContext {
        self.context
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.leave();
    }
}
