//! Scopes: the tree of binding maps that resolution walks.
//!
//! Lookup order for a key is the local map, then the parent chain, then the
//! intrinsic `Provider<T>`/`Lazy<T>` indirections, then just-in-time
//! synthesis. Unlinked entries are linked on first use and swapped for their
//! linked form with a compare-and-swap on the entry, so concurrent resolvers
//! all converge on one linked binding without blocking on each other.

use super::binding::{downcast_value, Binding, LinkedBinding, UnlinkedBinding, Value};
use super::handles::{Lazy, LateInstance, Provider};
use super::key::{Key, TypeDesc};
use super::linker::Linker;
use super::multibinding::{
    aggregate_keys, AggregateKind, Contribution, MapKey, MultibindingAssembler, SetElement,
};
use super::stats::{GraphStats, StatsSnapshot};
use crate::config::ResolverSettings;
use crate::error::{ConfigurationError, ResolveError, Result};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

/// Caching tier a scope is annotated with, rendered `@Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTier(Arc<str>);

impl ScopeTier {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ScopeTier(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

fn render_tiers(tiers: &[ScopeTier]) -> String {
    let names: Vec<String> = tiers.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}

/// Binding produced by a just-in-time strategy.
#[derive(Debug, Clone)]
pub struct JitLookup {
    /// Tier the binding must be cached in; `None` for unscoped.
    pub tier: Option<ScopeTier>,
    pub binding: Binding,
}

impl JitLookup {
    pub fn unscoped(binding: Binding) -> Self {
        Self { tier: None, binding }
    }

    pub fn scoped(tier: ScopeTier, binding: Binding) -> Self {
        Self {
            tier: Some(tier),
            binding,
        }
    }
}

/// Fallback consulted for keys no scope in the chain binds.
///
/// Runs at most once per key and scope. No map guard is held while it runs,
/// so it may resolve other keys through the scope; asking for the key it is
/// currently answering blocks forever.
pub type JustInTimeStrategy = Arc<dyn Fn(&Key) -> Option<JitLookup> + Send + Sync>;

/// Strategy that never synthesizes anything.
pub fn no_just_in_time() -> JustInTimeStrategy {
    Arc::new(|_: &Key| None)
}

/// Populates a child scope's builder.
pub type ChildConfigurator =
    Arc<dyn Fn(&mut ScopeBuilder) -> std::result::Result<(), ConfigurationError> + Send + Sync>;

/// A node of the scope tree.
pub struct Scope {
    id: Uuid,
    tiers: Vec<ScopeTier>,
    bindings: DashMap<Key, Binding>,
    jit: JustInTimeStrategy,
    jit_lookups: DashMap<Key, Arc<OnceLock<Option<JitLookup>>>>,
    parent: Option<Arc<Scope>>,
    this: Weak<Scope>,
    settings: Arc<ResolverSettings>,
    stats: Arc<GraphStats>,
}

impl Scope {
    /// Builder for a root scope with the given tiers.
    pub fn builder(tiers: impl IntoIterator<Item = ScopeTier>) -> ScopeBuilder {
        ScopeBuilder::root(tiers)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tiers(&self) -> &[ScopeTier] {
        &self.tiers
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether this scope itself (not an ancestor) holds `key`.
    pub fn contains_key(&self, key: &Key) -> bool {
        self.bindings.contains_key(key)
    }

    /// `Some(true)` once the local entry for `key` has been linked.
    pub fn is_linked(&self, key: &Key) -> Option<bool> {
        self.bindings.get(key).map(|entry| entry.value().is_linked())
    }

    /// Number of local entries, including just-in-time ones.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Linked binding for `key`.
    pub fn resolve(&self, key: &Key) -> Result<Arc<LinkedBinding>> {
        self.stats.record_resolution();
        let mut linker = Linker::new();
        let resolved = match self.find_binding(key, &mut linker) {
            Ok(Some(binding)) => Ok(binding),
            Ok(None) => Err(linker.missing(key)),
            Err(err) => Err(err),
        };
        if let Err(err) = &resolved {
            debug!(key = %key, scope = %self, error = %err, "resolution failed");
        }
        resolved
    }

    pub fn get(&self, key: &Key) -> Result<Value> {
        self.resolve(key)?.get()
    }

    /// Present value of type `T` bound to `key`.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &Key) -> Result<Arc<T>> {
        let value = self.get(key)?;
        downcast_value(value, || key.to_string(), "typed access")
    }

    /// Provider for `key` bound to this scope.
    pub fn provider(&self, key: Key) -> Provider {
        Provider::keyed(self.this.clone(), key)
    }

    /// Fresh, uninitialized lazy for `key` bound to this scope.
    pub fn lazy(&self, key: Key) -> Lazy {
        Lazy::new(self.provider(key))
    }

    /// Child with no registrations of its own.
    ///
    /// Inherits this scope's strategy unless `jit` replaces it.
    pub fn new_child(
        self: &Arc<Self>,
        tiers: impl IntoIterator<Item = ScopeTier>,
        jit: Option<JustInTimeStrategy>,
    ) -> std::result::Result<Arc<Scope>, ConfigurationError> {
        let mut builder = self.child_builder(tiers)?;
        if let Some(strategy) = jit {
            builder = builder.just_in_time(strategy);
        }
        builder.build()
    }

    /// Builder for a child, validated against this scope's ancestry.
    pub fn child_builder(
        self: &Arc<Self>,
        tiers: impl IntoIterator<Item = ScopeTier>,
    ) -> std::result::Result<ScopeBuilder, ConfigurationError> {
        ScopeBuilder::child(self.clone(), tiers.into_iter().collect())
    }

    pub(crate) fn downgrade(&self) -> Weak<Scope> {
        self.this.clone()
    }

    /// Linked binding for `key` from this scope, its ancestors, the intrinsic
    /// indirections or just-in-time synthesis. `None` when nothing binds it.
    pub(crate) fn find_binding(
        &self,
        key: &Key,
        linker: &mut Linker,
    ) -> Result<Option<Arc<LinkedBinding>>> {
        // Explicit entries win, including ones keyed `Provider<T>` or `Lazy<T>`.
        if let Some(found) = self.find_existing(key, linker)? {
            return Ok(Some(found));
        }

        if let Some(inner) = key.ty().wrapped(TypeDesc::PROVIDER) {
            return Ok(Some(Arc::new(LinkedBinding::Provider {
                scope: self.this.clone(),
                key: key.with_type(inner.clone()),
            })));
        }
        if let Some(inner) = key.ty().wrapped(TypeDesc::LAZY) {
            return Ok(Some(Arc::new(LinkedBinding::Lazy {
                scope: self.this.clone(),
                key: key.with_type(inner.clone()),
            })));
        }

        let Some(lookup) = self.jit_lookup(key) else {
            return Ok(None);
        };
        let tier = lookup.tier.clone();
        let label = lookup.binding.to_string();
        match self.put_jit(key, lookup, linker)? {
            Some(binding) => Ok(Some(binding)),
            None => Err(ResolveError::ScopeMismatch {
                key: key.clone(),
                binding: label,
                tier: tier.map(|t| t.to_string()).unwrap_or_default(),
                scope: self.to_string(),
            }),
        }
    }

    fn find_existing(&self, key: &Key, linker: &mut Linker) -> Result<Option<Arc<LinkedBinding>>> {
        // Clone out of the map so no shard guard is held while linking.
        let found = self.bindings.get(key).map(|entry| entry.value().clone());
        match found {
            Some(Binding::Linked(linked)) => Ok(Some(linked)),
            Some(Binding::Unlinked(unlinked)) => self.link(key, unlinked, linker).map(Some),
            None => match &self.parent {
                Some(parent) => parent.find_existing(key, linker),
                None => Ok(None),
            },
        }
    }

    /// Memoized strategy lookup; the strategy runs at most once per key here.
    fn jit_lookup(&self, key: &Key) -> Option<JitLookup> {
        if !self.settings.linking.just_in_time {
            return None;
        }
        // Take the per-key cell out of the map before running user code, so
        // no shard guard is held by the strategy.
        let existing = self.jit_lookups.get(key).map(|cell| cell.value().clone());
        let cell = match existing {
            Some(cell) => cell,
            None => self.jit_lookups.entry(key.clone()).or_default().value().clone(),
        };
        cell.get_or_init(|| {
            self.stats.record_jit_lookup();
            (self.jit)(key)
        })
        .clone()
    }

    /// Registers a synthesized binding in the nearest scope holding its tier
    /// (this one when unscoped) and links it there. `None` when no scope in
    /// the chain holds the tier.
    fn put_jit(
        &self,
        key: &Key,
        lookup: JitLookup,
        linker: &mut Linker,
    ) -> Result<Option<Arc<LinkedBinding>>> {
        let placed_here = match &lookup.tier {
            Some(tier) => self.tiers.contains(tier),
            None => true,
        };
        if !placed_here {
            return match &self.parent {
                Some(parent) => parent.put_jit(key, lookup, linker),
                None => Ok(None),
            };
        }
        let binding = match lookup.tier {
            Some(_) => lookup.binding.as_scoped(),
            None => lookup.binding,
        };

        let stored = self
            .bindings
            .entry(key.clone())
            .or_insert_with(|| {
                self.stats.record_jit_synthesis();
                debug!(key = %key, scope = %self, binding = %binding, "registered just-in-time binding");
                binding
            })
            .value()
            .clone();

        match stored {
            Binding::Linked(linked) => Ok(Some(linked)),
            Binding::Unlinked(unlinked) => self.link(key, unlinked, linker).map(Some),
        }
    }

    /// Links `unlinked` and publishes the result if the entry still holds it.
    fn link(
        &self,
        key: &Key,
        unlinked: Arc<UnlinkedBinding>,
        linker: &mut Linker,
    ) -> Result<Arc<LinkedBinding>> {
        let linked = linker.link(self, key, &unlinked)?;
        self.stats.record_link();

        let Some(mut entry) = self.bindings.get_mut(key) else {
            return Ok(linked);
        };
        let still_unlinked =
            matches!(entry.value(), Binding::Unlinked(current) if Arc::ptr_eq(current, &unlinked));
        if still_unlinked {
            *entry = Binding::Linked(linked.clone());
            return Ok(linked);
        }
        // Entries only ever move from unlinked to linked.
        match entry.value() {
            Binding::Linked(winner) => {
                self.stats.record_race_lost();
                trace!(key = %key, scope = %self, "lost link race, using published binding");
                Ok(winner.clone())
            }
            Binding::Unlinked(_) => Ok(linked),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope{}", render_tiers(&self.tiers))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("tiers", &self.tiers)
            .field("bindings", &self.bindings.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Collects registrations for one scope, then builds it.
pub struct ScopeBuilder {
    parent: Option<Arc<Scope>>,
    tiers: Vec<ScopeTier>,
    bindings: IndexMap<Key, Binding>,
    multibindings: MultibindingAssembler,
    jit: JustInTimeStrategy,
    settings: Arc<ResolverSettings>,
    stats: Arc<GraphStats>,
}

impl ScopeBuilder {
    /// Root builder with default settings and no just-in-time strategy.
    pub fn root(tiers: impl IntoIterator<Item = ScopeTier>) -> Self {
        let settings = ResolverSettings::default();
        Self {
            parent: None,
            tiers: tiers.into_iter().collect(),
            bindings: IndexMap::new(),
            multibindings: MultibindingAssembler::default(),
            jit: no_just_in_time(),
            stats: Arc::new(GraphStats::new(settings.stats.enabled)),
            settings: Arc::new(settings),
        }
    }

    fn child(parent: Arc<Scope>, tiers: Vec<ScopeTier>) -> std::result::Result<Self, ConfigurationError> {
        if !tiers.is_empty() {
            if parent.tiers.is_empty() {
                return Err(ConfigurationError::UnscopedParent {
                    tiers: render_tiers(&tiers),
                });
            }
            let mut chain = vec![render_tiers(&tiers)];
            let mut ancestor = Some(&parent);
            while let Some(scope) = ancestor {
                chain.push(render_tiers(&scope.tiers));
                if scope.tiers.iter().any(|tier| tiers.contains(tier)) {
                    let chain: Vec<String> = chain.iter().map(|t| format!("  * {t}")).collect();
                    return Err(ConfigurationError::ScopeTierCycle {
                        chain: chain.join("\n"),
                    });
                }
                ancestor = scope.parent.as_ref();
            }
        }

        Ok(Self {
            tiers,
            bindings: IndexMap::new(),
            multibindings: MultibindingAssembler::default(),
            jit: parent.jit.clone(),
            settings: parent.settings.clone(),
            stats: parent.stats.clone(),
            parent: Some(parent),
        })
    }

    /// Replaces the settings; statistics restart with the new `stats.enabled`.
    pub fn with_settings(mut self, settings: ResolverSettings) -> Self {
        self.stats = Arc::new(GraphStats::new(settings.stats.enabled));
        self.settings = Arc::new(settings);
        self
    }

    pub fn just_in_time(mut self, strategy: JustInTimeStrategy) -> Self {
        self.jit = strategy;
        self
    }

    pub fn tiers(&self) -> &[ScopeTier] {
        &self.tiers
    }

    pub fn register(&mut self, key: Key, binding: Binding) -> std::result::Result<&mut Self, ConfigurationError> {
        if let Some(existing) = self.bindings.get(&key) {
            return Err(ConfigurationError::DuplicateBinding {
                key,
                existing: existing.to_string(),
                duplicate: binding.to_string(),
            });
        }
        if let Some(existing) = self.multibindings.claimed_by(&key) {
            return Err(ConfigurationError::DuplicateBinding {
                key,
                existing,
                duplicate: binding.to_string(),
            });
        }
        self.bindings.insert(key, binding);
        Ok(self)
    }

    /// Registers `binding` cached in `tier`, which this scope must hold.
    pub fn register_scoped(
        &mut self,
        key: Key,
        binding: Binding,
        tier: &ScopeTier,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        if !self.tiers.contains(tier) {
            return Err(ConfigurationError::ScopeMismatch {
                key,
                binding: binding.to_string(),
                tier: tier.to_string(),
                scope: format!("Scope{}", render_tiers(&self.tiers)),
            });
        }
        self.register(key, binding.as_scoped())
    }

    pub fn register_instance<T: Any + Send + Sync>(
        &mut self,
        key: Key,
        value: T,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        self.register(key, Binding::instance(value))
    }

    pub fn register_absent(&mut self, key: Key) -> std::result::Result<&mut Self, ConfigurationError> {
        self.register(key, Binding::absent())
    }

    /// Reserves `key` for a value supplied after the scope is built.
    pub fn register_late(&mut self, key: Key) -> std::result::Result<LateInstance, ConfigurationError> {
        let late = LateInstance::new(key.clone());
        self.register(key, Binding::Linked(late.binding()))?;
        Ok(late)
    }

    pub fn register_contribution(
        &mut self,
        aggregate: Key,
        contribution: Contribution,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        self.claim_aggregate(&aggregate, contribution.kind(), &contribution.to_string())?;
        self.multibindings.contribute(aggregate, contribution)?;
        Ok(self)
    }

    /// Contributes one element of type `T`; equal elements collapse into one.
    pub fn contribute_element<T: SetElement>(
        &mut self,
        aggregate: Key,
        binding: Binding,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        self.register_contribution(aggregate, Contribution::element::<T>(binding))
    }

    pub fn contribute_elements(
        &mut self,
        aggregate: Key,
        binding: Binding,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        self.register_contribution(aggregate, Contribution::Elements(binding))
    }

    pub fn contribute_entry(
        &mut self,
        aggregate: Key,
        entry_key: impl Into<MapKey>,
        binding: Binding,
    ) -> std::result::Result<&mut Self, ConfigurationError> {
        self.register_contribution(aggregate, Contribution::Entry(entry_key.into(), binding))
    }

    /// Declares a possibly empty `Set<T>`.
    pub fn declare_set(&mut self, aggregate: Key) -> std::result::Result<&mut Self, ConfigurationError> {
        self.claim_aggregate(&aggregate, AggregateKind::Set, "@Multibinds")?;
        self.multibindings.declare(aggregate, AggregateKind::Set)?;
        Ok(self)
    }

    /// Declares a possibly empty `Map<K, V>`.
    pub fn declare_map(&mut self, aggregate: Key) -> std::result::Result<&mut Self, ConfigurationError> {
        self.claim_aggregate(&aggregate, AggregateKind::Map, "@Multibinds")?;
        self.multibindings.declare(aggregate, AggregateKind::Map)?;
        Ok(self)
    }

    fn claim_aggregate(
        &self,
        aggregate: &Key,
        kind: AggregateKind,
        contributor: &str,
    ) -> std::result::Result<(), ConfigurationError> {
        for key in aggregate_keys(aggregate, kind)? {
            if let Some(existing) = self.bindings.get(&key) {
                return Err(ConfigurationError::DuplicateBinding {
                    key,
                    existing: existing.to_string(),
                    duplicate: contributor.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn build(self) -> std::result::Result<Arc<Scope>, ConfigurationError> {
        let bindings = DashMap::with_capacity(self.bindings.len());
        for (key, binding) in self.bindings {
            bindings.insert(key, binding);
        }
        for (key, binding) in self.multibindings.into_bindings() {
            if let Some(existing) = bindings.get(&key) {
                return Err(ConfigurationError::DuplicateBinding {
                    existing: existing.value().to_string(),
                    duplicate: binding.to_string(),
                    key,
                });
            }
            bindings.insert(key, binding);
        }

        let scope = Arc::new_cyclic(|this| Scope {
            id: Uuid::new_v4(),
            tiers: self.tiers,
            bindings,
            jit: self.jit,
            jit_lookups: DashMap::new(),
            parent: self.parent,
            this: this.clone(),
            settings: self.settings,
            stats: self.stats,
        });
        debug!(
            scope = %scope,
            id = %scope.id,
            bindings = scope.bindings.len(),
            child = scope.parent.is_some(),
            "scope built"
        );
        Ok(scope)
    }
}

/// Creates child scopes of the scope that linked it.
pub struct ChildScopeFactory {
    label: Arc<str>,
    parent: Weak<Scope>,
    tiers: Vec<ScopeTier>,
    configure: ChildConfigurator,
}

impl ChildScopeFactory {
    pub(crate) fn new(
        label: Arc<str>,
        parent: Weak<Scope>,
        tiers: Vec<ScopeTier>,
        configure: ChildConfigurator,
    ) -> Self {
        Self {
            label,
            parent,
            tiers,
            configure,
        }
    }

    pub fn tiers(&self) -> &[ScopeTier] {
        &self.tiers
    }

    /// Builds a new child; every call yields a distinct scope.
    pub fn create(&self) -> Result<Arc<Scope>> {
        let parent = self.parent.upgrade().ok_or_else(|| ResolveError::ScopeReleased {
            subject: format!("@Subcomponent[{}]", self.label),
        })?;
        let mut builder = parent.child_builder(self.tiers.clone())?;
        (self.configure)(&mut builder)?;
        Ok(builder.build()?)
    }
}

impl fmt::Debug for ChildScopeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChildScopeFactory[{}]{}", self.label, render_tiers(&self.tiers))
    }
}
