//! Set and map multibindings: contributions gathered at build time and the
//! collection values they assemble into.

use super::binding::{Binding, Dependency, Instance, LinkedBinding, LinkedSet, UnlinkedBinding};
use super::handles::{Lazy, Provider};
use super::key::{Key, TypeDesc};
use super::linker::Linker;
use super::scope::Scope;
use crate::error::{ConfigurationError, ResolveError, Result};
use indexmap::{IndexMap, IndexSet};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Key of a map contribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Str(Arc<str>),
    Int(i64),
    Bool(bool),
    Type(TypeDesc),
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        MapKey::Str(value.into())
    }
}

impl From<String> for MapKey {
    fn from(value: String) -> Self {
        MapKey::Str(value.into())
    }
}

impl From<i64> for MapKey {
    fn from(value: i64) -> Self {
        MapKey::Int(value)
    }
}

impl From<i32> for MapKey {
    fn from(value: i32) -> Self {
        MapKey::Int(value.into())
    }
}

impl From<bool> for MapKey {
    fn from(value: bool) -> Self {
        MapKey::Bool(value)
    }
}

impl From<TypeDesc> for MapKey {
    fn from(value: TypeDesc) -> Self {
        MapKey::Type(value)
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Str(value) => write!(f, "\"{value}\""),
            MapKey::Int(value) => write!(f, "{value}"),
            MapKey::Bool(value) => write!(f, "{value}"),
            MapKey::Type(ty) => write!(f, "{ty}"),
        }
    }
}

/// A single contribution to an aggregate key.
#[derive(Debug, Clone)]
pub enum Contribution {
    /// One element of a `Set<T>`, compared with the given equality.
    Element(Binding, ElementEquality),
    /// A binding producing an [`InstanceSet`] whose members join a `Set<T>`.
    Elements(Binding),
    /// One entry of a `Map<K, V>`.
    Entry(MapKey, Binding),
}

impl Contribution {
    /// Set element whose value must be a `T`.
    pub fn element<T: SetElement>(binding: Binding) -> Self {
        Contribution::Element(binding, ElementEquality::of::<T>())
    }

    pub(crate) fn kind(&self) -> AggregateKind {
        match self {
            Contribution::Element(..) | Contribution::Elements(_) => AggregateKind::Set,
            Contribution::Entry(..) => AggregateKind::Map,
        }
    }
}

impl fmt::Display for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contribution::Element(binding, _) => write!(f, "@IntoSet[{binding}]"),
            Contribution::Elements(binding) => write!(f, "@ElementsIntoSet[{binding}]"),
            Contribution::Entry(key, binding) => write!(f, "@IntoMap[{key}={binding}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateKind {
    Set,
    Map,
}

/// Every key an aggregate occupies once built: the set key itself, or the
/// `Map<K, V>`, `Map<K, Provider<V>>` and `Map<K, Lazy<V>>` triple.
pub(crate) fn aggregate_keys(key: &Key, kind: AggregateKind) -> Result<Vec<Key>, ConfigurationError> {
    match kind {
        AggregateKind::Set => match key.ty().wrapped(TypeDesc::SET) {
            Some(_) => Ok(vec![key.clone()]),
            None => Err(ConfigurationError::NotAMultibindingKey {
                key: key.clone(),
                expected: "Set<T>",
            }),
        },
        AggregateKind::Map => match key.ty().map_args() {
            Some((k, v)) => Ok(vec![
                key.clone(),
                key.with_type(TypeDesc::map_of(k.clone(), TypeDesc::provider_of(v.clone()))),
                key.with_type(TypeDesc::map_of(k.clone(), TypeDesc::lazy_of(v.clone()))),
            ]),
            None => Err(ConfigurationError::NotAMultibindingKey {
                key: key.clone(),
                expected: "Map<K, V>",
            }),
        },
    }
}

/// Element and bulk contributions of one `Set<T>`, in declaration order.
#[derive(Default)]
pub struct SetContributions {
    elements: Vec<(Binding, ElementEquality)>,
    bulk: Vec<Binding>,
}

impl SetContributions {
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        self.elements
            .iter()
            .map(|(binding, _)| binding)
            .chain(&self.bulk)
            .flat_map(Binding::dependencies)
            .collect()
    }

    pub(crate) fn link(&self, linker: &mut Linker, scope: &Scope) -> Result<LinkedSet> {
        let elements = self
            .elements
            .iter()
            .map(|(binding, equality)| Ok((binding.link_inline(linker, scope)?, *equality)))
            .collect::<Result<Vec<_>>>()?;
        let bulk = self
            .bulk
            .iter()
            .map(|binding| binding.link_inline(linker, scope))
            .collect::<Result<Vec<_>>>()?;
        Ok(LinkedSet { elements, bulk })
    }
}

impl fmt::Display for SetContributions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Set[")?;
        let rendered = self
            .elements
            .iter()
            .map(|(b, _)| b.to_string())
            .chain(self.bulk.iter().map(|b| format!("@ElementsIntoSet[{b}]")));
        for (i, item) in rendered.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&item)?;
        }
        f.write_str("]")
    }
}

/// Entry contributions of one `Map<K, V>`, in declaration order.
#[derive(Default)]
pub struct MapContributions {
    entries: IndexMap<MapKey, Binding>,
}

impl MapContributions {
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        self.entries.values().flat_map(Binding::dependencies).collect()
    }

    pub(crate) fn link(&self, linker: &mut Linker, scope: &Scope) -> Result<ProviderMap> {
        let mut bindings = IndexMap::with_capacity(self.entries.len());
        for (key, binding) in &self.entries {
            bindings.insert(key.clone(), binding.link_inline(linker, scope)?);
        }
        Ok(ProviderMap::new(bindings))
    }
}

impl fmt::Display for MapContributions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Map[")?;
        for (i, (key, binding)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={binding}")?;
        }
        f.write_str("]")
    }
}

/// Builder-side collector for every aggregate declared in one scope.
#[derive(Default)]
pub(crate) struct MultibindingAssembler {
    sets: IndexMap<Key, SetContributions>,
    maps: IndexMap<Key, MapContributions>,
    /// Occupied key → aggregate key it belongs to.
    claims: IndexMap<Key, Key>,
}

impl MultibindingAssembler {
    pub(crate) fn declare(&mut self, aggregate: Key, kind: AggregateKind) -> Result<(), ConfigurationError> {
        for key in aggregate_keys(&aggregate, kind)? {
            self.claims.insert(key, aggregate.clone());
        }
        match kind {
            AggregateKind::Set => {
                self.sets.entry(aggregate).or_default();
            }
            AggregateKind::Map => {
                self.maps.entry(aggregate).or_default();
            }
        }
        Ok(())
    }

    pub(crate) fn contribute(
        &mut self,
        aggregate: Key,
        contribution: Contribution,
    ) -> Result<(), ConfigurationError> {
        self.declare(aggregate.clone(), contribution.kind())?;
        match contribution {
            Contribution::Element(binding, equality) => {
                self.set_mut(&aggregate).elements.push((binding, equality))
            }
            Contribution::Elements(binding) => self.set_mut(&aggregate).bulk.push(binding),
            Contribution::Entry(entry_key, binding) => {
                let map = self.maps.entry(aggregate.clone()).or_default();
                if let Some(existing) = map.entries.get(&entry_key) {
                    return Err(ConfigurationError::DuplicateMapKey {
                        key: aggregate,
                        entry_key: entry_key.to_string(),
                        existing: existing.to_string(),
                        duplicate: binding.to_string(),
                    });
                }
                map.entries.insert(entry_key, binding);
            }
        }
        Ok(())
    }

    fn set_mut(&mut self, aggregate: &Key) -> &mut SetContributions {
        self.sets.entry(aggregate.clone()).or_default()
    }

    /// Describes the aggregate occupying `key`, if any.
    pub(crate) fn claimed_by(&self, key: &Key) -> Option<String> {
        let aggregate = self.claims.get(key)?;
        self.sets
            .get(aggregate)
            .map(|set| set.to_string())
            .or_else(|| self.maps.get(aggregate).map(|map| map.to_string()))
    }

    pub(crate) fn into_bindings(self) -> Vec<(Key, Binding)> {
        let mut bindings = Vec::with_capacity(self.sets.len() + self.maps.len() * 3);
        for (key, contributions) in self.sets {
            bindings.push((key, unlinked(UnlinkedBinding::Set(contributions))));
        }
        for (key, contributions) in self.maps {
            let Some((k, v)) = key.ty().map_args() else {
                continue;
            };
            let provider_key =
                key.with_type(TypeDesc::map_of(k.clone(), TypeDesc::provider_of(v.clone())));
            let lazy_key = key.with_type(TypeDesc::map_of(k.clone(), TypeDesc::lazy_of(v.clone())));
            bindings.push((
                key.clone(),
                unlinked(UnlinkedBinding::MapOfValue {
                    map_of_provider: provider_key.clone(),
                }),
            ));
            bindings.push((
                lazy_key,
                unlinked(UnlinkedBinding::MapOfLazy {
                    map_of_provider: provider_key.clone(),
                }),
            ));
            bindings.push((provider_key, unlinked(UnlinkedBinding::MapOfProvider(contributions))));
        }
        bindings
    }
}

fn unlinked(binding: UnlinkedBinding) -> Binding {
    Binding::Unlinked(Arc::new(binding))
}

/// Values that can be members of an assembled `Set<T>`.
pub trait SetElement: Any + Eq + Hash + Send + Sync {}

impl<T: Any + Eq + Hash + Send + Sync> SetElement for T {}

type Erased = dyn Any + Send + Sync;

/// Equality and hashing for erased set members of one element type.
///
/// Members of different types are never equal.
#[derive(Clone, Copy)]
pub struct ElementEquality {
    type_name: &'static str,
    accepts: fn(&Erased) -> bool,
    eq: fn(&Erased, &Erased) -> bool,
    hash: fn(&Erased, &mut dyn Hasher),
}

impl ElementEquality {
    pub fn of<T: SetElement>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            accepts: accepts::<T>,
            eq: erased_eq::<T>,
            hash: erased_hash::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ElementEquality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementEquality<{}>", self.type_name)
    }
}

fn accepts<T: SetElement>(value: &Erased) -> bool {
    value.is::<T>()
}

fn erased_eq<T: SetElement>(a: &Erased, b: &Erased) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn erased_hash<T: SetElement>(value: &Erased, mut state: &mut dyn Hasher) {
    TypeId::of::<T>().hash(&mut state);
    if let Some(value) = value.downcast_ref::<T>() {
        value.hash(&mut state);
    }
}

#[derive(Clone)]
struct SetMember {
    value: Instance,
    equality: ElementEquality,
}

impl PartialEq for SetMember {
    fn eq(&self, other: &Self) -> bool {
        (self.equality.eq)(&*self.value, &*other.value)
    }
}

impl Eq for SetMember {}

impl Hash for SetMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.equality.hash)(&*self.value, state)
    }
}

/// Assembled `Set<T>`: insertion ordered, duplicates dropped by value equality.
///
/// The first of several equal members is the one kept.
#[derive(Clone, Default)]
pub struct InstanceSet {
    members: IndexSet<SetMember>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            members: IndexSet::with_capacity(capacity),
        }
    }

    /// Adds `member` unless an equal value is already present.
    pub fn insert<T: SetElement>(&mut self, member: Arc<T>) -> bool {
        self.members.insert(SetMember {
            value: member,
            equality: ElementEquality::of::<T>(),
        })
    }

    /// Adds an erased value, which must be of the type `equality` compares.
    pub(crate) fn insert_erased(
        &mut self,
        value: Instance,
        equality: ElementEquality,
        subject: impl FnOnce() -> String,
    ) -> Result<bool> {
        if !(equality.accepts)(&*value) {
            return Err(ResolveError::TypeMismatch {
                subject: subject(),
                expected: equality.type_name.to_string(),
            });
        }
        Ok(self.members.insert(SetMember { value, equality }))
    }

    /// Adds every member of `other` not already present.
    pub(crate) fn merge(&mut self, other: &InstanceSet) {
        for member in &other.members {
            self.members.insert(member.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains<T: SetElement>(&self, value: &T) -> bool {
        self.members
            .iter()
            .any(|member| member.value.downcast_ref::<T>() == Some(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.members.iter().map(|member| &member.value)
    }

    /// Members downcast to `T`, in order.
    pub fn typed<T: Any + Send + Sync>(&self) -> Result<Vec<Arc<T>>> {
        self.iter()
            .map(|member| {
                member.clone().downcast::<T>().map_err(|_| ResolveError::TypeMismatch {
                    subject: "set element".to_string(),
                    expected: std::any::type_name::<T>().to_string(),
                })
            })
            .collect()
    }
}

impl<T: SetElement> FromIterator<Arc<T>> for InstanceSet {
    fn from_iter<I: IntoIterator<Item = Arc<T>>>(iter: I) -> Self {
        let mut set = InstanceSet::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

impl fmt::Debug for InstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceSet(len={})", self.members.len())
    }
}

/// `Map<K, Provider<V>>`, fixed when the map binding is linked.
pub struct ProviderMap {
    bindings: IndexMap<MapKey, Arc<LinkedBinding>>,
    providers: IndexMap<MapKey, Arc<Provider>>,
}

impl ProviderMap {
    fn new(bindings: IndexMap<MapKey, Arc<LinkedBinding>>) -> Self {
        let providers = bindings
            .iter()
            .map(|(key, binding)| (key.clone(), Arc::new(Provider::bound(binding.clone()))))
            .collect();
        Self { bindings, providers }
    }

    pub fn get(&self, key: &MapKey) -> Option<&Arc<Provider>> {
        self.providers.get(key)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.providers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Arc<Provider>)> {
        self.providers.iter()
    }
}

impl fmt::Display for ProviderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Map[")?;
        for (i, (key, binding)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={binding}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for ProviderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Assembled `Map<K, V>`, in contribution order.
#[derive(Clone, Default)]
pub struct InstanceMap {
    entries: IndexMap<MapKey, Instance>,
}

impl InstanceMap {
    pub(crate) fn assemble(providers: &ProviderMap) -> Result<Self> {
        let mut entries = IndexMap::with_capacity(providers.len());
        for (key, binding) in &providers.bindings {
            match binding.get()? {
                Some(value) => {
                    entries.insert(key.clone(), value);
                }
                None => {
                    return Err(ResolveError::NullabilityViolation {
                        binding: binding.to_string(),
                        context: "map values",
                    })
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &MapKey) -> Option<&Instance> {
        self.entries.get(key)
    }

    /// Entry downcast to `T`; `None` when the key has no entry.
    pub fn get_as<T: Any + Send + Sync>(&self, key: impl Into<MapKey>) -> Result<Option<Arc<T>>> {
        let key = key.into();
        match self.entries.get(&key) {
            None => Ok(None),
            Some(value) => value.clone().downcast::<T>().map(Some).map_err(|_| {
                ResolveError::TypeMismatch {
                    subject: format!("map entry {key}"),
                    expected: std::any::type_name::<T>().to_string(),
                }
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Instance)> {
        self.entries.iter()
    }
}

impl fmt::Debug for InstanceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// `Map<K, Lazy<V>>`; each assembly hands out fresh lazies.
pub struct LazyMap {
    entries: IndexMap<MapKey, Arc<Lazy>>,
}

impl LazyMap {
    pub(crate) fn from_providers(providers: &ProviderMap) -> Self {
        let entries = providers
            .bindings
            .iter()
            .map(|(key, binding)| (key.clone(), Arc::new(Lazy::new(Provider::bound(binding.clone())))))
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &MapKey) -> Option<&Arc<Lazy>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Arc<Lazy>)> {
        self.entries.iter()
    }
}

impl fmt::Debug for LazyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
