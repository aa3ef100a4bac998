//! Static engine option table.
//!
//! The table is a list of conditionally-included entries folded into the
//! final option list. It is built once per engine and is pure with respect
//! to its inputs (the [`EngineSettings`] in effect); absent entries are
//! filtered out before the list reaches the engine builder.

use std::env;
use std::path::PathBuf;

use crate::props::VmProperty;

/// Default maximum isolate heap handed to the engine.
pub const DEFAULT_ISOLATE_HEAP_MAX: &str = "4g";

/// Flags and knobs the static option table keys off.
///
/// Settings are plain data; [`EngineSettings::from_env`] fills them from
/// external runtime flags.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Debug mode: disables background compilation, enables engine debug output
    pub debug: bool,

    /// Enable the inspector protocol for guest debugging
    pub inspect: bool,

    /// Allow guest code to perform stream I/O on stdin/stdout/stderr.
    /// Off by default: sealed streams fail loudly.
    pub allow_stream_io: bool,

    /// Compile guest code on background threads
    pub background_compilation: bool,

    /// Enable function inlining in the guest compiler
    pub inlining: bool,

    /// Enable function splitting in the guest compiler
    pub splitting: bool,

    /// Maximum isolate heap, e.g. `"4g"`; `None` omits the sizing entry
    pub isolate_heap_max: Option<String>,

    /// Persist an ahead-of-time engine cache under this directory
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debug: false,
            inspect: false,
            allow_stream_io: false,
            background_compilation: true,
            inlining: true,
            splitting: true,
            isolate_heap_max: Some(DEFAULT_ISOLATE_HEAP_MAX.to_string()),
            cache_dir: Some(env::temp_dir()),
        }
    }
}

impl EngineSettings {
    /// Build settings from environment flags.
    ///
    /// Recognized flags: `LINGO_DEBUG`, `LINGO_INSPECT`, `LINGO_GUEST_IO`.
    pub fn from_env() -> Self {
        Self {
            debug: env_flag("LINGO_DEBUG"),
            inspect: env_flag("LINGO_INSPECT"),
            allow_stream_io: env_flag("LINGO_GUEST_IO"),
            ..Self::default()
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

/// Fold the static option table for the given settings.
///
/// Entry order is fixed; inclusion of each entry depends only on `settings`.
pub fn static_engine_options(settings: &EngineSettings) -> Vec<VmProperty> {
    let cache_dir = settings.cache_dir.clone();

    let entries: Vec<Option<VmProperty>> = vec![
        // Compilation toggles; debug mode forces foreground compilation
        (settings.background_compilation && !settings.debug)
            .then(|| VmProperty::active("engine.background-compilation")),
        settings.inlining.then(|| VmProperty::active("compiler.inlining")),
        settings.splitting.then(|| VmProperty::active("compiler.splitting")),
        // Isolate sizing
        settings
            .isolate_heap_max
            .as_ref()
            .map(|max| VmProperty::of("isolate.heap.max", max)),
        // AOT cache path: resolved lazily so the current process id is
        // captured at engine build time
        cache_dir.map(|dir| {
            VmProperty::lazy("engine.cache.path", move || {
                Some(
                    dir.join(format!("lingo-engine-{}.image", std::process::id()))
                        .to_string_lossy()
                        .into_owned(),
                )
            })
        }),
        // Debug and inspector toggles
        settings.debug.then(|| VmProperty::active("engine.debug")),
        settings.inspect.then(|| VmProperty::active("inspector.enabled")),
        settings
            .inspect
            .then(|| VmProperty::active("inspector.suspend-on-start")),
    ];

    entries.into_iter().flatten().collect()
}
