//! Context factory injection.
//!
//! The manager never knows language details; callers shape contexts through
//! a [`ContextFactory`] supplied at construction, or through the two
//! installable hooks ([`BuilderHook`] builds a builder from the engine,
//! [`SpawnHook`] finalizes a builder into a context).

use std::sync::Arc;

use super::{ContextBuilder, GuestContext};
use crate::engine::EngineHandle;
use crate::error::ContextError;
use crate::props::VmProperty;

/// Builds a context builder from the shared engine.
pub type BuilderHook = Arc<dyn Fn(&EngineHandle) -> ContextBuilder + Send + Sync>;

/// Finalizes a builder into a ready context.
pub type SpawnHook = Arc<dyn Fn(ContextBuilder) -> Result<GuestContext, ContextError> + Send + Sync>;

/// Capability interface for deriving contexts from the engine.
pub trait ContextFactory: Send + Sync {
    /// Produce a context builder from the engine.
    fn build_from(&self, engine: &EngineHandle) -> ContextBuilder;

    /// Finalize a builder into a ready context.
    fn finalize(&self, builder: ContextBuilder) -> Result<GuestContext, ContextError>;
}

/// Factory used when the caller installs nothing.
#[derive(Debug, Default)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    fn build_from(&self, engine: &EngineHandle) -> ContextBuilder {
        ContextBuilder::new(engine.clone())
    }

    fn finalize(&self, builder: ContextBuilder) -> Result<GuestContext, ContextError> {
        builder.build()
    }
}

/// Allocates ready-to-enter contexts for dispatch workers.
///
/// Built once at activation from the engine, the frozen property snapshot
/// and the factory state in effect; every worker/thread context allocation
/// goes through here, so the accumulated properties are applied exactly
/// once per context lifetime.
pub struct ContextAllocator {
    engine: EngineHandle,
    properties: Arc<Vec<VmProperty>>,
    base: Arc<dyn ContextFactory>,
    build_hook: Option<BuilderHook>,
    spawn_hook: Option<SpawnHook>,
}

impl ContextAllocator {
    /// Assemble an allocator.
    pub fn new(
        engine: EngineHandle,
        properties: Arc<Vec<VmProperty>>,
        base: Arc<dyn ContextFactory>,
        build_hook: Option<BuilderHook>,
        spawn_hook: Option<SpawnHook>,
    ) -> Self {
        Self {
            engine,
            properties,
            base,
            build_hook,
            spawn_hook,
        }
    }

    /// The shared engine.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Allocate one configured, ready (not entered) context.
    pub fn allocate(&self) -> Result<GuestContext, ContextError> {
        let builder = match &self.build_hook {
            Some(hook) => hook(&self.engine),
            None => self.base.build_from(&self.engine),
        };
        let builder = builder.properties(self.properties.iter().cloned());

        match &self.spawn_hook {
            Some(hook) => hook(builder),
            None => self.base.finalize(builder),
        }
    }
}
