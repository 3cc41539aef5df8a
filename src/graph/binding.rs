//! Bindings: the two-state (unlinked → linked) rules that produce values.
//!
//! Both states are closed enums dispatched with `match`. An
//! [`UnlinkedBinding`] declares its dependency keys and turns into a
//! [`LinkedBinding`] through [`UnlinkedBinding::link`]; a linked binding
//! produces values through [`LinkedBinding::get`].

use super::double_checked::DoubleChecked;
use super::handles::{Lazy, LateSlot, OptionalInstance, Provider};
use super::key::Key;
use super::linker::Linker;
use super::multibinding::{
    ElementEquality, InstanceMap, InstanceSet, LazyMap, MapContributions, ProviderMap,
    SetContributions,
};
use super::scope::{ChildConfigurator, ChildScopeFactory, Scope, ScopeTier};
use crate::error::{BoxError, ResolveError, Result};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// A produced value.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// What a binding yields: `None` is the legitimately absent value.
pub type Value = Option<Instance>;

/// User factory behind provides and constructor bindings.
pub type Factory = Arc<dyn Fn(&Args<'_>) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// Wraps `value` as a present [`Value`].
pub fn instance<T: Any + Send + Sync>(value: T) -> Value {
    Some(Arc::new(value))
}

/// Downcasts a present value, failing on absence or on a type mismatch.
pub(crate) fn downcast_value<T: Any + Send + Sync>(
    value: Value,
    subject: impl FnOnce() -> String,
    context: &'static str,
) -> Result<Arc<T>> {
    match value {
        Some(instance) => instance.downcast::<T>().map_err(|_| ResolveError::TypeMismatch {
            subject: subject(),
            expected: std::any::type_name::<T>().to_string(),
        }),
        None => Err(ResolveError::NullabilityViolation {
            binding: subject(),
            context,
        }),
    }
}

/// A dependency key declared by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub key: Key,
    /// Absence is tolerated instead of reported as a missing binding.
    pub optional: bool,
}

impl Dependency {
    pub fn required(key: Key) -> Self {
        Self { key, optional: false }
    }

    pub fn optional(key: Key) -> Self {
        Self { key, optional: true }
    }
}

impl From<Key> for Dependency {
    fn from(key: Key) -> Self {
        Dependency::required(key)
    }
}

/// Dependency values handed to a factory, in declaration order.
pub struct Args<'a> {
    values: &'a [Value],
    binding: &'a str,
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value], binding: &'a str) -> Self {
        Self { values, binding }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`; absent values are allowed.
    pub fn value(&self, index: usize) -> Result<&'a Value> {
        self.values.get(index).ok_or_else(|| ResolveError::TypeMismatch {
            subject: format!("argument {index} of {}", self.binding),
            expected: format!("one of {} declared dependencies", self.values.len()),
        })
    }

    /// Present value of type `T` at `index`.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        let value = self.value(index)?.clone();
        downcast_value(
            value,
            || format!("argument {index} of {}", self.binding),
            "required dependencies",
        )
    }

    /// Value of type `T` at `index`, `None` when absent.
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.value(index)? {
            Some(_) => self.get(index).map(Some),
            None => Ok(None),
        }
    }

    pub fn provider(&self, index: usize) -> Result<Arc<Provider>> {
        self.get(index)
    }

    pub fn lazy(&self, index: usize) -> Result<Arc<Lazy>> {
        self.get(index)
    }
}

/// A binding in either state.
#[derive(Clone)]
pub enum Binding {
    Unlinked(Arc<UnlinkedBinding>),
    Linked(Arc<LinkedBinding>),
}

impl Binding {
    /// Constant value binding.
    pub fn instance<T: Any + Send + Sync>(value: T) -> Self {
        Binding::Linked(Arc::new(LinkedBinding::Instance {
            label: format!("@BindsInstance[{}]", std::any::type_name::<T>()).into(),
            value: instance(value),
        }))
    }

    /// Constant binding for an already erased value.
    pub fn shared(value: Instance) -> Self {
        Binding::Linked(Arc::new(LinkedBinding::Instance {
            label: "@BindsInstance[shared]".into(),
            value: Some(value),
        }))
    }

    /// Constant binding producing the absent value.
    pub fn absent() -> Self {
        Binding::Linked(Arc::new(LinkedBinding::Instance {
            label: "@BindsInstance[absent]".into(),
            value: None,
        }))
    }

    /// Provides-method binding.
    pub fn provides<F>(
        label: impl Into<Arc<str>>,
        dependencies: impl IntoIterator<Item = Dependency>,
        factory: F,
    ) -> Self
    where
        F: Fn(&Args<'_>) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        Binding::Unlinked(Arc::new(UnlinkedBinding::Provides {
            label: label.into(),
            dependencies: dependencies.into_iter().collect(),
            factory: Arc::new(factory),
        }))
    }

    /// Constructor-injection binding, the shape just-in-time synthesis produces.
    pub fn constructor<F>(
        label: impl Into<Arc<str>>,
        dependencies: impl IntoIterator<Item = Dependency>,
        factory: F,
    ) -> Self
    where
        F: Fn(&Args<'_>) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        Binding::Unlinked(Arc::new(UnlinkedBinding::Constructor {
            label: label.into(),
            dependencies: dependencies.into_iter().collect(),
            factory: Arc::new(factory),
        }))
    }

    /// Alias: resolving this binding's key resolves `target`.
    pub fn binds(label: impl Into<Arc<str>>, target: Key) -> Self {
        Binding::Unlinked(Arc::new(UnlinkedBinding::Binds {
            label: label.into(),
            target,
        }))
    }

    /// `Optional<T>` over `target`, empty when `target` has no binding.
    pub fn optional(target: Key) -> Self {
        Binding::Unlinked(Arc::new(UnlinkedBinding::Optional { target }))
    }

    /// Links to a [`ChildScopeFactory`] bound to the scope that links it.
    pub fn child_scope<F>(
        label: impl Into<Arc<str>>,
        tiers: impl IntoIterator<Item = ScopeTier>,
        configure: F,
    ) -> Self
    where
        F: Fn(&mut super::scope::ScopeBuilder) -> std::result::Result<(), crate::error::ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        Binding::Unlinked(Arc::new(UnlinkedBinding::ChildScope {
            label: label.into(),
            tiers: tiers.into_iter().collect(),
            configure: Arc::new(configure),
        }))
    }

    /// Wraps the binding so that, once linked, its value is computed at most once.
    pub fn as_scoped(self) -> Self {
        match self {
            Binding::Unlinked(unlinked) => {
                if matches!(*unlinked, UnlinkedBinding::Scoped(_)) {
                    Binding::Unlinked(unlinked)
                } else {
                    Binding::Unlinked(Arc::new(UnlinkedBinding::Scoped(unlinked)))
                }
            }
            Binding::Linked(linked) => {
                if matches!(*linked, LinkedBinding::Instance { .. } | LinkedBinding::Scoped { .. }) {
                    Binding::Linked(linked)
                } else {
                    Binding::Linked(Arc::new(LinkedBinding::Scoped {
                        binding: linked,
                        cell: DoubleChecked::new(),
                    }))
                }
            }
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Binding::Linked(_))
    }

    /// Declared dependencies; linked bindings have none left.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            Binding::Unlinked(unlinked) => unlinked.dependencies(),
            Binding::Linked(_) => Vec::new(),
        }
    }

    /// Links a binding that is not stored under a key of its own
    /// (multibinding contributions).
    pub(crate) fn link_inline(&self, linker: &mut Linker, scope: &Scope) -> Result<Arc<LinkedBinding>> {
        match self {
            Binding::Linked(linked) => Ok(linked.clone()),
            Binding::Unlinked(unlinked) => unlinked.link(linker, scope),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Unlinked(unlinked) => fmt::Display::fmt(unlinked, f),
            Binding::Linked(linked) => fmt::Display::fmt(linked, f),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Unlinked(unlinked) => write!(f, "Unlinked({unlinked})"),
            Binding::Linked(linked) => write!(f, "Linked({linked})"),
        }
    }
}

/// A binding that can declare its dependencies but not yet produce a value.
pub enum UnlinkedBinding {
    Provides {
        label: Arc<str>,
        dependencies: Vec<Dependency>,
        factory: Factory,
    },
    Constructor {
        label: Arc<str>,
        dependencies: Vec<Dependency>,
        factory: Factory,
    },
    Binds {
        label: Arc<str>,
        target: Key,
    },
    Optional {
        target: Key,
    },
    Set(SetContributions),
    MapOfProvider(MapContributions),
    MapOfValue {
        map_of_provider: Key,
    },
    MapOfLazy {
        map_of_provider: Key,
    },
    ChildScope {
        label: Arc<str>,
        tiers: Vec<ScopeTier>,
        configure: ChildConfigurator,
    },
    Scoped(Arc<UnlinkedBinding>),
}

impl UnlinkedBinding {
    /// Dependency keys in declaration order.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            UnlinkedBinding::Provides { dependencies, .. }
            | UnlinkedBinding::Constructor { dependencies, .. } => dependencies.clone(),
            UnlinkedBinding::Binds { target, .. } => vec![Dependency::required(target.clone())],
            UnlinkedBinding::Optional { target } => vec![Dependency::optional(target.clone())],
            UnlinkedBinding::Set(contributions) => contributions.dependencies(),
            UnlinkedBinding::MapOfProvider(contributions) => contributions.dependencies(),
            UnlinkedBinding::MapOfValue { map_of_provider }
            | UnlinkedBinding::MapOfLazy { map_of_provider } => {
                vec![Dependency::required(map_of_provider.clone())]
            }
            UnlinkedBinding::ChildScope { .. } => Vec::new(),
            UnlinkedBinding::Scoped(inner) => inner.dependencies(),
        }
    }

    /// Produces the linked form.
    ///
    /// `linker` is only used to resolve dependency keys and `scope` only to
    /// bind child-scope factories; nothing here reads the scope's map directly.
    pub fn link(&self, linker: &mut Linker, scope: &Scope) -> Result<Arc<LinkedBinding>> {
        let linked = match self {
            UnlinkedBinding::Provides { label, dependencies, factory } => LinkedBinding::Provision {
                kind: ProvisionKind::Provides,
                label: label.clone(),
                dependencies: linker.resolve_dependencies(scope, dependencies)?,
                factory: factory.clone(),
            },
            UnlinkedBinding::Constructor { label, dependencies, factory } => {
                LinkedBinding::Provision {
                    kind: ProvisionKind::Constructor,
                    label: label.clone(),
                    dependencies: linker.resolve_dependencies(scope, dependencies)?,
                    factory: factory.clone(),
                }
            }
            UnlinkedBinding::Binds { target, .. } => return linker.get(scope, target),
            UnlinkedBinding::Optional { target } => LinkedBinding::Optional {
                dependency: linker.find(scope, target)?,
            },
            UnlinkedBinding::Set(contributions) => {
                LinkedBinding::Set(contributions.link(linker, scope)?)
            }
            UnlinkedBinding::MapOfProvider(contributions) => LinkedBinding::MapOfProvider {
                providers: Arc::new(contributions.link(linker, scope)?),
            },
            UnlinkedBinding::MapOfValue { map_of_provider } => LinkedBinding::MapOfValue {
                map_of_provider: linker.get(scope, map_of_provider)?,
            },
            UnlinkedBinding::MapOfLazy { map_of_provider } => LinkedBinding::MapOfLazy {
                map_of_provider: linker.get(scope, map_of_provider)?,
            },
            UnlinkedBinding::ChildScope { label, tiers, configure } => {
                let factory = ChildScopeFactory::new(
                    label.clone(),
                    scope.downgrade(),
                    tiers.clone(),
                    configure.clone(),
                );
                LinkedBinding::Instance {
                    label: format!("@Subcomponent[{label}]").into(),
                    value: Some(Arc::new(factory)),
                }
            }
            UnlinkedBinding::Scoped(inner) => LinkedBinding::Scoped {
                binding: inner.link(linker, scope)?,
                cell: DoubleChecked::new(),
            },
        };
        Ok(Arc::new(linked))
    }
}

impl fmt::Display for UnlinkedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlinkedBinding::Provides { label, .. } => write!(f, "@Provides[{label}]"),
            UnlinkedBinding::Constructor { label, .. } => write!(f, "@Inject[{label}]"),
            UnlinkedBinding::Binds { label, .. } => write!(f, "@Binds[{label}]"),
            UnlinkedBinding::Optional { target } => write!(f, "@BindsOptionalOf[{target}]"),
            UnlinkedBinding::Set(contributions) => write!(f, "{contributions}"),
            UnlinkedBinding::MapOfProvider(contributions) => write!(f, "{contributions}"),
            UnlinkedBinding::MapOfValue { map_of_provider }
            | UnlinkedBinding::MapOfLazy { map_of_provider } => write!(f, "Map[{map_of_provider}]"),
            UnlinkedBinding::ChildScope { label, .. } => write!(f, "@Subcomponent[{label}]"),
            UnlinkedBinding::Scoped(inner) => write!(f, "@Scoped[{inner}]"),
        }
    }
}

/// Which declaration a provision binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionKind {
    Provides,
    Constructor,
}

/// Element and bulk contributions of a set, linked.
pub struct LinkedSet {
    pub(crate) elements: Vec<(Arc<LinkedBinding>, ElementEquality)>,
    pub(crate) bulk: Vec<Arc<LinkedBinding>>,
}

impl LinkedSet {
    fn assemble(&self) -> Result<InstanceSet> {
        let mut set = InstanceSet::with_capacity(self.elements.len());
        for (element, equality) in &self.elements {
            match element.get()? {
                Some(value) => {
                    set.insert_erased(value, *equality, || element.to_string())?;
                }
                None => {
                    return Err(ResolveError::NullabilityViolation {
                        binding: element.to_string(),
                        context: "set elements",
                    })
                }
            }
        }
        for contribution in &self.bulk {
            let members: Arc<InstanceSet> = downcast_value(
                contribution.get()?,
                || contribution.to_string(),
                "set element contributions",
            )?;
            set.merge(&members);
        }
        Ok(set)
    }
}

/// A binding that can produce values.
pub enum LinkedBinding {
    Instance {
        label: Arc<str>,
        value: Value,
    },
    Late(Arc<LateSlot>),
    Provision {
        kind: ProvisionKind,
        label: Arc<str>,
        /// `None` for optional dependencies that had no binding.
        dependencies: Vec<Option<Arc<LinkedBinding>>>,
        factory: Factory,
    },
    Scoped {
        binding: Arc<LinkedBinding>,
        cell: DoubleChecked<Value>,
    },
    Optional {
        dependency: Option<Arc<LinkedBinding>>,
    },
    Set(LinkedSet),
    MapOfProvider {
        providers: Arc<ProviderMap>,
    },
    MapOfValue {
        map_of_provider: Arc<LinkedBinding>,
    },
    MapOfLazy {
        map_of_provider: Arc<LinkedBinding>,
    },
    Provider {
        scope: Weak<Scope>,
        key: Key,
    },
    Lazy {
        scope: Weak<Scope>,
        key: Key,
    },
}

impl LinkedBinding {
    /// Produces a value, invoking dependencies in declaration order.
    pub fn get(&self) -> Result<Value> {
        match self {
            LinkedBinding::Instance { value, .. } => Ok(value.clone()),
            LinkedBinding::Late(slot) => slot.get(),
            LinkedBinding::Provision { dependencies, factory, .. } => {
                let mut values = Vec::with_capacity(dependencies.len());
                for dependency in dependencies {
                    values.push(match dependency {
                        Some(binding) => binding.get()?,
                        None => None,
                    });
                }
                let label = self.to_string();
                factory(&Args::new(&values, &label))
                    .map_err(|source| ResolveError::Creation { binding: label.clone(), source })
            }
            LinkedBinding::Scoped { binding, cell } => cell.get_or_try_compute(|| {
                tracing::trace!(binding = %binding, "computing scoped value");
                binding.get()
            }),
            LinkedBinding::Optional { dependency } => {
                let present = match dependency {
                    None => None,
                    Some(binding) => match binding.get()? {
                        Some(value) => Some(value),
                        None => {
                            return Err(ResolveError::NullabilityViolation {
                                binding: binding.to_string(),
                                context: "optional bindings",
                            })
                        }
                    },
                };
                Ok(Some(Arc::new(OptionalInstance::new(present))))
            }
            LinkedBinding::Set(set) => Ok(Some(Arc::new(set.assemble()?))),
            LinkedBinding::MapOfProvider { providers } => Ok(Some(providers.clone())),
            LinkedBinding::MapOfValue { map_of_provider } => {
                let providers = self.provider_map(map_of_provider)?;
                Ok(Some(Arc::new(InstanceMap::assemble(&providers)?)))
            }
            LinkedBinding::MapOfLazy { map_of_provider } => {
                let providers = self.provider_map(map_of_provider)?;
                Ok(Some(Arc::new(LazyMap::from_providers(&providers))))
            }
            LinkedBinding::Provider { scope, key } => {
                Ok(Some(Arc::new(Provider::keyed(scope.clone(), key.clone()))))
            }
            LinkedBinding::Lazy { scope, key } => Ok(Some(Arc::new(Lazy::new(Provider::keyed(
                scope.clone(),
                key.clone(),
            ))))),
        }
    }

    /// Present value of type `T`.
    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        downcast_value(self.get()?, || self.to_string(), "typed access")
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, LinkedBinding::Scoped { .. })
    }

    fn provider_map(&self, map_of_provider: &LinkedBinding) -> Result<Arc<ProviderMap>> {
        downcast_value(map_of_provider.get()?, || self.to_string(), "map bindings")
    }
}

impl fmt::Display for LinkedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkedBinding::Instance { label, .. } => f.write_str(label),
            LinkedBinding::Late(slot) => write!(f, "{slot}"),
            LinkedBinding::Provision { kind: ProvisionKind::Provides, label, .. } => {
                write!(f, "@Provides[{label}]")
            }
            LinkedBinding::Provision { kind: ProvisionKind::Constructor, label, .. } => {
                write!(f, "@Inject[{label}]")
            }
            LinkedBinding::Scoped { binding, .. } => write!(f, "@Scoped[{binding}]"),
            LinkedBinding::Optional { dependency: Some(binding) } => {
                write!(f, "@BindsOptionalOf[{binding}]")
            }
            LinkedBinding::Optional { dependency: None } => f.write_str("@BindsOptionalOf[absent]"),
            LinkedBinding::Set(set) => {
                write!(f, "Set[{} element(s), {} bulk]", set.elements.len(), set.bulk.len())
            }
            LinkedBinding::MapOfProvider { providers } => write!(f, "{providers}"),
            LinkedBinding::MapOfValue { map_of_provider }
            | LinkedBinding::MapOfLazy { map_of_provider } => write!(f, "Map[{map_of_provider}]"),
            LinkedBinding::Provider { key, .. } => write!(f, "Provider[{key}]"),
            LinkedBinding::Lazy { key, .. } => write!(f, "Lazy[{key}]"),
        }
    }
}

impl fmt::Debug for LinkedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkedBinding({self})")
    }
}
