//! Constructor registry usable as a just-in-time strategy.

use super::binding::{Args, Binding, Dependency, Factory, UnlinkedBinding, Value};
use super::key::{Key, TypeDesc};
use super::scope::{JitLookup, JustInTimeStrategy, ScopeTier};
use crate::error::{BoxError, ConfigurationError};
use indexmap::IndexMap;
use std::sync::Arc;

struct Recipe {
    tier: Option<ScopeTier>,
    dependencies: Vec<Dependency>,
    factory: Factory,
}

/// Types that can be built on demand from their constructor.
///
/// Only unqualified keys are ever satisfied: a qualifier means someone
/// declared the binding on purpose, so it has to be registered explicitly.
#[derive(Default)]
pub struct ConstructorRegistry {
    recipes: IndexMap<TypeDesc, Recipe>,
}

impl ConstructorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unscoped constructor for `ty`.
    pub fn register<F>(
        &mut self,
        ty: TypeDesc,
        dependencies: impl IntoIterator<Item = Dependency>,
        factory: F,
    ) -> Result<&mut Self, ConfigurationError>
    where
        F: Fn(&Args<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.insert(ty, None, dependencies.into_iter().collect(), Arc::new(factory))
    }

    /// Constructor whose value is cached in the nearest scope holding `tier`.
    pub fn register_scoped<F>(
        &mut self,
        ty: TypeDesc,
        tier: ScopeTier,
        dependencies: impl IntoIterator<Item = Dependency>,
        factory: F,
    ) -> Result<&mut Self, ConfigurationError>
    where
        F: Fn(&Args<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.insert(ty, Some(tier), dependencies.into_iter().collect(), Arc::new(factory))
    }

    fn insert(
        &mut self,
        ty: TypeDesc,
        tier: Option<ScopeTier>,
        dependencies: Vec<Dependency>,
        factory: Factory,
    ) -> Result<&mut Self, ConfigurationError> {
        let key = Key::of_type(ty.clone())?;
        if self.recipes.contains_key(&ty) {
            return Err(ConfigurationError::DuplicateBinding {
                existing: format!("@Inject[{ty}]"),
                duplicate: format!("@Inject[{ty}]"),
                key,
            });
        }
        self.recipes.insert(
            ty,
            Recipe {
                tier,
                dependencies,
                factory,
            },
        );
        Ok(self)
    }

    pub fn contains(&self, ty: &TypeDesc) -> bool {
        self.recipes.contains_key(ty)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Constructor binding for `key`, if one is registered for its type.
    pub fn lookup(&self, key: &Key) -> Option<JitLookup> {
        if key.qualifier().is_some() {
            return None;
        }
        let recipe = self.recipes.get(key.ty())?;
        let binding = Binding::Unlinked(Arc::new(UnlinkedBinding::Constructor {
            label: key.ty().to_string().into(),
            dependencies: recipe.dependencies.clone(),
            factory: recipe.factory.clone(),
        }));
        Some(JitLookup {
            tier: recipe.tier.clone(),
            binding,
        })
    }

    pub fn into_strategy(self) -> JustInTimeStrategy {
        Arc::new(move |key: &Key| self.lookup(key))
    }
}
