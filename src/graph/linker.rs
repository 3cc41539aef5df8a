//! Recursive linking with cycle detection.

use super::binding::{Dependency, LinkedBinding, UnlinkedBinding};
use super::key::Key;
use super::scope::Scope;
use crate::error::{ChainLink, ResolveError, Result};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tracks the keys being linked by one resolve call.
///
/// The chain is ordered by discovery, so a failure can report the full path
/// that led to it. It is shared across scopes: a child resolving into its
/// parent keeps appending to the same chain. Entries are keyed by the owning
/// scope as well as the key, since a child may shadow a key its parent also
/// binds.
#[derive(Debug, Default)]
pub struct Linker {
    chain: IndexMap<(Uuid, Key), String>,
}

impl Linker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Linked binding for `key`, or a missing-binding error carrying the chain.
    pub fn get(&mut self, scope: &Scope, key: &Key) -> Result<Arc<LinkedBinding>> {
        match scope.find_binding(key, self)? {
            Some(binding) => Ok(binding),
            None => Err(self.missing(key)),
        }
    }

    /// Linked binding for `key`, or `None` if nothing in the scope chain binds it.
    pub fn find(&mut self, scope: &Scope, key: &Key) -> Result<Option<Arc<LinkedBinding>>> {
        scope.find_binding(key, self)
    }

    /// Links every dependency in declaration order. Optional dependencies
    /// without a binding come back as `None`.
    pub fn resolve_dependencies(
        &mut self,
        scope: &Scope,
        dependencies: &[Dependency],
    ) -> Result<Vec<Option<Arc<LinkedBinding>>>> {
        dependencies
            .iter()
            .map(|dependency| {
                if dependency.optional {
                    self.find(scope, &dependency.key)
                } else {
                    self.get(scope, &dependency.key).map(Some)
                }
            })
            .collect()
    }

    /// Number of keys currently being linked.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    pub(crate) fn link(
        &mut self,
        scope: &Scope,
        key: &Key,
        unlinked: &UnlinkedBinding,
    ) -> Result<Arc<LinkedBinding>> {
        let visit = (scope.id(), key.clone());
        if self.chain.contains_key(&visit) {
            return Err(ResolveError::DependencyCycle {
                key: key.clone(),
                chain: self.chain_links(),
            });
        }

        debug!(key = %key, scope = %scope, depth = self.chain.len(), "linking");
        self.chain.insert(visit.clone(), unlinked.to_string());
        let linked = unlinked.link(self, scope);
        self.chain.shift_remove(&visit);
        linked
    }

    pub(crate) fn missing(&self, key: &Key) -> ResolveError {
        ResolveError::MissingBinding {
            key: key.clone(),
            chain: self.chain_links(),
        }
    }

    fn chain_links(&self) -> Vec<ChainLink> {
        self.chain
            .iter()
            .map(|((_, key), binding)| ChainLink {
                key: key.clone(),
                binding: binding.clone(),
            })
            .collect()
    }
}
