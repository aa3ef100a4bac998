//! VM property model.
//!
//! A [`VmProperty`] is an immutable key/value configuration entry applied to
//! the engine or to guest contexts. Properties are ordered and compared by
//! symbol only, so property sets apply deterministically and duplicate
//! symbols collapse.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

type LazyValue = Arc<dyn Fn() -> Option<String> + Send + Sync>;

#[derive(Clone)]
enum PropertyValue {
    Eager(Option<String>),
    Lazy(LazyValue),
}

/// An immutable engine/context configuration entry.
///
/// The value may be resolved lazily at read time; the ahead-of-time cache
/// path uses this to capture the current process id when the engine is
/// built rather than when the option table is declared.
#[derive(Clone)]
pub struct VmProperty {
    symbol: String,
    value: PropertyValue,
}

impl VmProperty {
    /// Create a property with an eager value.
    pub fn of(symbol: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            value: PropertyValue::Eager(Some(value.into())),
        }
    }

    /// Create a boolean property set to `"true"`.
    pub fn active(symbol: impl Into<String>) -> Self {
        Self::of(symbol, "true")
    }

    /// Create a boolean property set to `"false"`.
    pub fn inactive(symbol: impl Into<String>) -> Self {
        Self::of(symbol, "false")
    }

    /// Create a property whose value is resolved when read.
    pub fn lazy<F>(symbol: impl Into<String>, resolve: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self {
            symbol: symbol.into(),
            value: PropertyValue::Lazy(Arc::new(resolve)),
        }
    }

    /// The property symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Resolve the property value.
    pub fn value(&self) -> Option<String> {
        match &self.value {
            PropertyValue::Eager(value) => value.clone(),
            PropertyValue::Lazy(resolve) => resolve(),
        }
    }
}

impl fmt::Debug for VmProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmProperty")
            .field("symbol", &self.symbol)
            .field("value", &self.value())
            .finish()
    }
}

impl PartialEq for VmProperty {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl Eq for VmProperty {}

impl PartialOrd for VmProperty {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VmProperty {
    fn cmp(&self, other: &Self) -> Ordering {
        self.symbol.cmp(&other.symbol)
    }
}

impl Hash for VmProperty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
    }
}
