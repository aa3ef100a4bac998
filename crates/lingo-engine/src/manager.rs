//! Context manager lifecycle and the `acquire` entry point.
//!
//! The [`ContextManager`] owns the shared engine, the accumulated VM
//! properties and the dispatch strategy. Its lifecycle has exactly two
//! states, `Configuring -> Active`, with no path back: properties and
//! factory hooks are collected while configuring, frozen at activation, and
//! every execution after that flows through [`ContextManager::acquire`] or
//! [`ContextManager::acquire_async`].

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::context::{
    BuilderHook, ContextAllocator, ContextBuilder, ContextFactory, DefaultContextFactory,
    GuestContext, SpawnHook,
};
use crate::dispatch::{
    ContextRequest, Dispatcher, DispatcherStats, PoolOptions, PooledDispatcher,
    ThreadConfinedDispatcher,
};
use crate::engine::{static_engine_options, Engine, EngineHandle, EngineSettings, LanguageId};
use crate::error::{ContextError, DispatchError, EngineError, GuestError};
use crate::props::VmProperty;

const STATE_CONFIGURING: u8 = 0;
const STATE_ACTIVE: u8 = 1;

/// Dispatch strategy selected at activation time.
#[derive(Debug, Clone)]
pub enum DispatchMode {
    /// One context per calling thread, executed inline
    ThreadConfined,

    /// Fixed worker pool fed by the sharded ring buffer
    Pooled(PoolOptions),
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Pooled(PoolOptions::default())
    }
}

/// Construction options for a [`ContextManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Guest languages the engine is built for; empty means the default set
    pub languages: Vec<LanguageId>,

    /// Engine settings feeding the static option table
    pub settings: EngineSettings,

    /// Dispatch strategy
    pub dispatch: DispatchMode,
}

/// Per-call context customization, run before the context is entered.
pub type ContextHook = Box<dyn FnOnce(&GuestContext) -> Result<(), GuestError> + Send + 'static>;

struct FactoryState {
    base: Arc<dyn ContextFactory>,
    build_hook: Option<BuilderHook>,
    spawn_hook: Option<SpawnHook>,
}

/// Orchestrates the engine, context pooling and dispatch.
pub struct ContextManager {
    options: ManagerOptions,
    state: AtomicU8,
    properties: Mutex<BTreeMap<String, VmProperty>>,
    factory: RwLock<FactoryState>,
    engine: OnceCell<EngineHandle>,
    dispatcher: OnceCell<Arc<dyn Dispatcher>>,
}

impl ContextManager {
    /// Manager with default options and factory.
    pub fn new() -> Self {
        Self::with_options(ManagerOptions::default())
    }

    /// Manager with the given options and the default factory.
    pub fn with_options(options: ManagerOptions) -> Self {
        Self::with_factory(options, Arc::new(DefaultContextFactory))
    }

    /// Manager with a caller-supplied context factory.
    pub fn with_factory(options: ManagerOptions, factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            options,
            state: AtomicU8::new(STATE_CONFIGURING),
            properties: Mutex::new(BTreeMap::new()),
            factory: RwLock::new(FactoryState {
                base: factory,
                build_hook: None,
                spawn_hook: None,
            }),
            engine: OnceCell::new(),
            dispatcher: OnceCell::new(),
        }
    }

    /// Whether the manager has activated.
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACTIVE
    }

    /// Merge VM properties into the additional-properties set.
    ///
    /// Duplicate symbols collapse, last write wins. Rejected once the
    /// manager is active.
    pub fn configure_vm(
        &self,
        properties: impl IntoIterator<Item = VmProperty>,
    ) -> Result<(), EngineError> {
        if self.is_active() {
            return Err(EngineError::ConfigurationAfterActivation);
        }

        let mut set = self.properties.lock();
        for property in properties {
            set.insert(property.symbol().to_string(), property);
        }
        Ok(())
    }

    /// Install the callback that builds a context builder from the engine.
    /// A later call overwrites an earlier one.
    pub fn install_context_factory(
        &self,
        build: impl Fn(&EngineHandle) -> ContextBuilder + Send + Sync + 'static,
    ) {
        self.factory.write().build_hook = Some(Arc::new(build));
    }

    /// Install the callback that finalizes a builder into a context.
    /// A later call overwrites an earlier one.
    pub fn install_context_spawn(
        &self,
        spawn: impl Fn(ContextBuilder) -> Result<GuestContext, ContextError> + Send + Sync + 'static,
    ) {
        self.factory.write().spawn_hook = Some(Arc::new(spawn));
    }

    /// Activate the manager: build the engine, freeze the property set and
    /// construct the dispatch strategy. Idempotent; a second call after the
    /// first succeeded is a no-op.
    ///
    /// When `start` is true the dispatcher starts immediately, spawning
    /// pool workers that eagerly allocate their contexts.
    pub fn activate(&self, start: bool) -> Result<(), EngineError> {
        // Validate pure configuration before committing the state switch,
        // so a rejected pool size leaves the manager configurable.
        if let DispatchMode::Pooled(pool_options) = &self.options.dispatch {
            pool_options.resolved().map_err(EngineError::Dispatch)?;
        }

        let _ = self.state.compare_exchange(
            STATE_CONFIGURING,
            STATE_ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let dispatcher = self
            .dispatcher
            .get_or_try_init(|| -> Result<Arc<dyn Dispatcher>, EngineError> {
                let engine = self.engine.get_or_init(|| {
                    Engine::build(
                        self.options.languages.iter().copied(),
                        static_engine_options(&self.options.settings),
                        self.options.settings.clone(),
                    )
                });

                let snapshot: Vec<VmProperty> =
                    self.properties.lock().values().cloned().collect();

                let factory = self.factory.read();
                let allocator = Arc::new(ContextAllocator::new(
                    engine.clone(),
                    Arc::new(snapshot),
                    factory.base.clone(),
                    factory.build_hook.clone(),
                    factory.spawn_hook.clone(),
                ));

                Ok(match &self.options.dispatch {
                    DispatchMode::ThreadConfined => {
                        Arc::new(ThreadConfinedDispatcher::new(allocator))
                    }
                    DispatchMode::Pooled(pool_options) => Arc::new(PooledDispatcher::new(
                        pool_options.clone(),
                        allocator,
                    )?),
                })
            })?;

        if start {
            dispatcher.start()?;
        }
        Ok(())
    }

    /// Read-only engine accessor for collaborators.
    pub fn engine(&self) -> Result<&EngineHandle, EngineError> {
        self.engine.get().ok_or(EngineError::EngineNotInitialized)
    }

    /// Dispatcher activity counters.
    pub fn stats(&self) -> Result<DispatcherStats, EngineError> {
        Ok(self.dispatcher()?.stats())
    }

    /// Run `operation` inside an exclusively-held guest context.
    ///
    /// Callable concurrently from any number of threads. The context is
    /// entered after the optional `hook` runs and left on every exit path;
    /// the operation's result or failure is propagated to the caller after
    /// release. Fails fast with [`EngineError::EngineNotInitialized`] if
    /// the manager has not activated.
    pub fn acquire<R, F>(&self, hook: Option<ContextHook>, operation: F) -> Result<R, EngineError>
    where
        R: Send + 'static,
        F: FnOnce(&GuestContext) -> Result<R, GuestError> + Send + 'static,
    {
        self.acquire_async(hook, operation)?.wait()
    }

    /// Submit `operation` for execution and return immediately with a
    /// handle that resolves to its result.
    ///
    /// The continuation fulfills the handle on completion, so a failure on
    /// the executing side is never lost. There is no cancellation of
    /// in-flight guest code; dropping the handle detaches the result.
    pub fn acquire_async<R, F>(
        &self,
        hook: Option<ContextHook>,
        operation: F,
    ) -> Result<ExecHandle<R>, EngineError>
    where
        R: Send + 'static,
        F: FnOnce(&GuestContext) -> Result<R, GuestError> + Send + 'static,
    {
        let dispatcher = self.dispatcher()?;
        let (sender, receiver) = channel::bounded(1);

        let request = ContextRequest::new(move |context: &GuestContext| {
            let result = run_guarded(context, hook, operation);
            let _ = sender.send(result);
        });

        dispatcher.dispatch(request).map_err(map_dispatch)?;
        Ok(ExecHandle { receiver })
    }

    /// Stop the dispatcher and release owned contexts. Best-effort.
    pub fn shutdown(&self) {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.shutdown();
        }
    }

    fn dispatcher(&self) -> Result<&Arc<dyn Dispatcher>, EngineError> {
        self.dispatcher
            .get()
            .ok_or(EngineError::EngineNotInitialized)
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hook, enter, run, leave. The entry guard drops before the result is
/// handed back, so release precedes observation on every path including
/// panics.
fn run_guarded<R, F>(
    context: &GuestContext,
    hook: Option<ContextHook>,
    operation: F,
) -> Result<R, EngineError>
where
    F: FnOnce(&GuestContext) -> Result<R, GuestError>,
{
    if let Some(hook) = hook {
        hook(context).map_err(EngineError::Guest)?;
    }

    let _guard = context.enter_scoped()?;
    match panic::catch_unwind(AssertUnwindSafe(|| operation(context))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(EngineError::Guest(err)),
        Err(payload) => Err(EngineError::Guest(GuestError::from_panic(payload))),
    }
}

fn map_dispatch(err: DispatchError) -> EngineError {
    match err {
        DispatchError::Allocation(inner) => EngineError::ContextAllocation(inner),
        other => EngineError::Dispatch(other),
    }
}

/// Handle to an asynchronously-dispatched guest operation.
pub struct ExecHandle<R> {
    receiver: Receiver<Result<R, EngineError>>,
}

impl<R> ExecHandle<R> {
    /// Block until the operation completes and return its result.
    pub fn wait(self) -> Result<R, EngineError> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(EngineError::Dispatch(DispatchError::ShuttingDown)))
    }

    /// Non-blocking probe; `None` while the operation is still in flight.
    pub fn try_wait(&self) -> Option<Result<R, EngineError>> {
        self.receiver.try_recv().ok()
    }

    /// Bounded wait; `None` on timeout, after which [`wait`](Self::wait)
    /// may still be called.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<R, EngineError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(EngineError::Dispatch(DispatchError::ShuttingDown)))
            }
        }
    }
}
