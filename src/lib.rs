//! bindgraph: a lazily linked, scoped dependency-resolution engine.
//!
//! A front end registers bindings on a [`ScopeBuilder`]; consumers call
//! [`Scope::resolve`] or [`Scope::get_as`]. Linking, cycle detection and
//! scoped caching all happen on first request.

pub mod config;
pub mod error;
pub mod graph;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ResolverSettings, SettingsLoader};
pub use error::{BoxError, ConfigurationError, ResolveError, Result, SettingsError};
pub use graph::{
    instance, Args, Binding, ChildScopeFactory, ConstructorRegistry, Contribution, Dependency,
    ElementEquality, Instance, InstanceMap, InstanceSet, JitLookup, JustInTimeStrategy, Key, Lazy,
    LateInstance, LazyMap, LinkedBinding, MapKey, OptionalInstance, Provider, ProviderMap,
    Qualifier, Scope, ScopeBuilder, ScopeTier, SetElement, StatsSnapshot, TypeDesc, Value,
};
