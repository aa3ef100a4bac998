//! Engine construction.
//!
//! The [`Engine`] is the process-wide, shared guest-language infrastructure
//! from which execution contexts are derived. It is built exactly once per
//! context manager, is immutable after construction, and is shared by all
//! contexts as an [`EngineHandle`].

mod options;
mod streams;

pub use options::{static_engine_options, EngineSettings, DEFAULT_ISOLATE_HEAP_MAX};
pub use streams::{GuestStreams, StreamPolicy, SEALED_STREAM_MESSAGE};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::props::VmProperty;

/// Identifier of a guest language supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LanguageId {
    /// JavaScript (the default guest language)
    Js,
    /// WebAssembly
    Wasm,
    /// Python
    Python,
    /// Ruby
    Ruby,
}

impl LanguageId {
    /// Canonical engine-facing identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Js => "js",
            LanguageId::Wasm => "wasm",
            LanguageId::Python => "python",
            LanguageId::Ruby => "ruby",
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Languages enabled when none are requested.
pub const DEFAULT_LANGUAGES: &[LanguageId] = &[LanguageId::Js];

/// Shared handle to a built engine.
pub type EngineHandle = Arc<Engine>;

/// Shared, immutable-after-construction guest-language infrastructure.
pub struct Engine {
    languages: BTreeSet<LanguageId>,
    static_options: Vec<VmProperty>,
    settings: EngineSettings,
}

impl Engine {
    /// Build an engine from a language set and the static option table.
    ///
    /// Deterministic for identical inputs. An empty language set falls back
    /// to [`DEFAULT_LANGUAGES`].
    pub fn build(
        languages: impl IntoIterator<Item = LanguageId>,
        static_options: Vec<VmProperty>,
        settings: EngineSettings,
    ) -> EngineHandle {
        let mut languages: BTreeSet<LanguageId> = languages.into_iter().collect();
        if languages.is_empty() {
            languages.extend(DEFAULT_LANGUAGES.iter().copied());
        }

        Arc::new(Self {
            languages,
            static_options,
            settings,
        })
    }

    /// The languages this engine can execute.
    pub fn languages(&self) -> &BTreeSet<LanguageId> {
        &self.languages
    }

    /// Whether a language is supported.
    pub fn supports(&self, language: LanguageId) -> bool {
        self.languages.contains(&language)
    }

    /// The static option table this engine was built with.
    pub fn static_options(&self) -> &[VmProperty] {
        &self.static_options
    }

    /// The settings this engine was built with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Standard streams for guest contexts derived from this engine.
    ///
    /// Sealed unless the engine was built with
    /// [`EngineSettings::allow_stream_io`].
    pub fn guest_streams(&self) -> GuestStreams {
        let policy = if self.settings.allow_stream_io {
            StreamPolicy::Inherited
        } else {
            StreamPolicy::Sealed
        };
        GuestStreams::new(policy)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("languages", &self.languages)
            .field("options", &self.static_options.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_language_set_falls_back_to_default() {
        let engine = Engine::build([], vec![], EngineSettings::default());
        assert!(engine.supports(LanguageId::Js));
        assert_eq!(engine.languages().len(), 1);
    }

    #[test]
    fn test_language_set_deduplicates() {
        let engine = Engine::build(
            [LanguageId::Js, LanguageId::Wasm, LanguageId::Js],
            vec![],
            EngineSettings::default(),
        );
        assert_eq!(engine.languages().len(), 2);
        assert!(engine.supports(LanguageId::Wasm));
        assert!(!engine.supports(LanguageId::Python));
    }

    #[test]
    fn test_streams_sealed_by_default() {
        let engine = Engine::build([LanguageId::Js], vec![], EngineSettings::default());
        assert_eq!(engine.guest_streams().policy(), StreamPolicy::Sealed);
    }

    #[test]
    fn test_stream_opt_in() {
        let settings = EngineSettings {
            allow_stream_io: true,
            ..Default::default()
        };
        let engine = Engine::build([LanguageId::Js], vec![], settings);
        assert_eq!(engine.guest_streams().policy(), StreamPolicy::Inherited);
    }

    #[test]
    fn test_static_options_carried() {
        let settings = EngineSettings::default();
        let options = static_engine_options(&settings);
        let count = options.len();
        let engine = Engine::build([LanguageId::Js], options, settings);
        assert_eq!(engine.static_options().len(), count);
    }
}
