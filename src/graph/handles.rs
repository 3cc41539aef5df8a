//! Handles injected in place of values: providers, lazies, optionals and
//! late instances.

use super::binding::{downcast_value, LinkedBinding, Value};
use super::double_checked::DoubleChecked;
use super::key::Key;
use super::scope::Scope;
use crate::error::{ResolveError, Result};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

enum ProviderSource {
    /// Already linked, e.g. a map entry.
    Bound(Arc<LinkedBinding>),
    /// Resolved through the scope on first use.
    Keyed {
        scope: Weak<Scope>,
        key: Key,
        binding: OnceLock<Arc<LinkedBinding>>,
    },
}

/// Produces a value on every `get()`; never memoizes values.
pub struct Provider {
    source: ProviderSource,
}

impl Provider {
    pub(crate) fn bound(binding: Arc<LinkedBinding>) -> Self {
        Self {
            source: ProviderSource::Bound(binding),
        }
    }

    pub(crate) fn keyed(scope: Weak<Scope>, key: Key) -> Self {
        Self {
            source: ProviderSource::Keyed {
                scope,
                key,
                binding: OnceLock::new(),
            },
        }
    }

    /// The key a keyed provider resolves.
    pub fn key(&self) -> Option<&Key> {
        match &self.source {
            ProviderSource::Bound(_) => None,
            ProviderSource::Keyed { key, .. } => Some(key),
        }
    }

    pub fn get(&self) -> Result<Value> {
        self.binding()?.get()
    }

    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast_value(self.get()?, || self.to_string(), "typed access")
    }

    fn binding(&self) -> Result<Arc<LinkedBinding>> {
        match &self.source {
            ProviderSource::Bound(binding) => Ok(binding.clone()),
            ProviderSource::Keyed { scope, key, binding } => {
                if let Some(resolved) = binding.get() {
                    return Ok(resolved.clone());
                }
                let scope = scope.upgrade().ok_or_else(|| ResolveError::ScopeReleased {
                    subject: self.to_string(),
                })?;
                let resolved = scope.resolve(key)?;
                Ok(binding.get_or_init(|| resolved).clone())
            }
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ProviderSource::Bound(binding) => write!(f, "Provider[{binding}]"),
            ProviderSource::Keyed { key, .. } => write!(f, "Provider[{key}]"),
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Computes on first `get()` and returns the same value afterwards.
pub struct Lazy {
    provider: Provider,
    cell: DoubleChecked<Value>,
}

impl Lazy {
    pub(crate) fn new(provider: Provider) -> Self {
        Self {
            provider,
            cell: DoubleChecked::new(),
        }
    }

    pub fn get(&self) -> Result<Value> {
        self.cell.get_or_try_compute(|| self.provider.get())
    }

    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast_value(self.get()?, || self.to_string(), "typed access")
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.is_initialized()
    }
}

impl fmt::Display for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider.key() {
            Some(key) => write!(f, "Lazy[{key}]"),
            None => write!(f, "Lazy[{}]", self.provider),
        }
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Value of an `Optional<T>` binding.
#[derive(Clone, Default)]
pub struct OptionalInstance(Value);

impl OptionalInstance {
    pub(crate) fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// `None` when empty; a type mismatch when present with another type.
    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
        match &self.0 {
            None => Ok(None),
            Some(_) => downcast_value(self.0.clone(), || "Optional value".to_string(), "optional bindings")
                .map(Some),
        }
    }
}

impl fmt::Debug for OptionalInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_present() {
            f.write_str("Optional[present]")
        } else {
            f.write_str("Optional.empty")
        }
    }
}

/// Linked slot behind a [`LateInstance`].
pub struct LateSlot {
    key: Key,
    value: OnceLock<Value>,
}

impl LateSlot {
    pub(crate) fn get(&self) -> Result<Value> {
        self.value
            .get()
            .cloned()
            .ok_or_else(|| ResolveError::LateInstanceUnset {
                binding: self.to_string(),
            })
    }
}

impl fmt::Display for LateSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@LateInstance[{}]", self.key)
    }
}

/// Write side of a value that is registered before it exists.
///
/// Lets an object hand itself to the graph after the scope that needs it has
/// been built.
#[derive(Clone)]
pub struct LateInstance {
    slot: Arc<LateSlot>,
}

impl LateInstance {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            slot: Arc::new(LateSlot {
                key,
                value: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn binding(&self) -> Arc<LinkedBinding> {
        Arc::new(LinkedBinding::Late(self.slot.clone()))
    }

    pub fn key(&self) -> &Key {
        &self.slot.key
    }

    /// Populates the slot. Only the first call succeeds.
    pub fn set(&self, value: Value) -> Result<()> {
        self.slot
            .value
            .set(value)
            .map_err(|_| ResolveError::LateInstanceAlreadySet {
                binding: self.slot.to_string(),
            })
    }

    pub fn set_instance<T: Any + Send + Sync>(&self, value: T) -> Result<()> {
        self.set(Some(Arc::new(value)))
    }

    pub fn is_set(&self) -> bool {
        self.slot.value.get().is_some()
    }
}
