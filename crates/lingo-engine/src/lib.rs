//! Lingo Runtime Engine
//!
//! This crate provides the engine core of the Lingo polyglot runtime:
//! - **Engine**: shared, immutable guest-language infrastructure built once
//!   from the static option table (`engine` module)
//! - **Contexts**: isolated, thread-confined guest execution state with
//!   guaranteed-release entry guards (`context` module)
//! - **Dispatch**: thread-confined and pooled strategies for routing
//!   execution requests to contexts (`dispatch` module)
//! - **Manager**: the configure/activate lifecycle and the `acquire` entry
//!   point collaborators call (`manager` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use lingo_engine::{ContextManager, VmProperty};
//!
//! let manager = ContextManager::new();
//! manager.configure_vm([VmProperty::active("engine.strict")])?;
//! manager.activate(true)?;
//!
//! let result = manager.acquire(None, |ctx| {
//!     // run guest code inside the exclusively-held context
//!     Ok(ctx.property("engine.strict"))
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![cfg_attr(test, allow(unused_imports))]

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod manager;
pub mod props;

pub use context::{
    ContextBuilder, ContextFactory, ContextGuard, ContextId, DefaultContextFactory, GuestContext,
};
pub use dispatch::{
    ContextRequest, Dispatcher, DispatcherStats, PoolOptions, PooledDispatcher,
    ThreadConfinedDispatcher, WaitStrategy, DEFAULT_RING_CAPACITY,
};
pub use engine::{Engine, EngineHandle, EngineSettings, LanguageId, StreamPolicy};
pub use error::{ContextError, DispatchError, EngineError, GuestError};
pub use manager::{ContextHook, ContextManager, DispatchMode, ExecHandle, ManagerOptions};
pub use props::VmProperty;
