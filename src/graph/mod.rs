//! The binding graph: keys, bindings, scopes and the linker that ties them
//! together.

pub mod binding;
pub mod double_checked;
pub mod handles;
pub mod jit;
pub mod key;
pub mod linker;
pub mod multibinding;
pub mod scope;
pub mod stats;

pub use binding::{instance, Args, Binding, Dependency, Instance, LinkedBinding, UnlinkedBinding, Value};
pub use handles::{Lazy, LateInstance, OptionalInstance, Provider};
pub use jit::ConstructorRegistry;
pub use key::{Key, Qualifier, TypeDesc};
pub use linker::Linker;
pub use multibinding::{
    Contribution, ElementEquality, InstanceMap, InstanceSet, LazyMap, MapKey, ProviderMap, SetElement,
};
pub use scope::{
    no_just_in_time, ChildScopeFactory, JitLookup, JustInTimeStrategy, Scope, ScopeBuilder, ScopeTier,
};
pub use stats::{GraphStats, StatsSnapshot};
