//! Error types for bindgraph
//!
//! Three families, matching the three places things can go wrong:
//! - [`ConfigurationError`]: the binding graph was described incorrectly
//!   (duplicates, scope tier problems, malformed keys)
//! - [`ResolveError`]: a request could not be satisfied at resolution time
//! - [`SettingsError`]: the settings file or environment could not be loaded

use crate::graph::key::Key;
use std::fmt::{self, Write as _};
use thiserror::Error;

/// Boxed error returned by user supplied factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across the resolution API.
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

/// Errors in how the binding graph was described.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Two non-multibinding registrations for the same key
    #[error("Duplicate binding for {key}: {existing} and {duplicate}")]
    DuplicateBinding {
        key: Key,
        existing: String,
        duplicate: String,
    },

    /// Two map contributions under the same map key
    #[error("Duplicate map key {entry_key} for {key}: {existing} and {duplicate}")]
    DuplicateMapKey {
        key: Key,
        entry_key: String,
        existing: String,
        duplicate: String,
    },

    /// A key type still contains a type parameter
    #[error("Key type {ty} contains unresolved type variable {variable}")]
    UnresolvedTypeVariable { ty: String, variable: String },

    /// A multibinding operation was used with a key of the wrong shape
    #[error("{key} cannot hold multibinding contributions: type must be {expected}")]
    NotAMultibindingKey { key: Key, expected: &'static str },

    /// A scoped binding was registered into a scope without that tier
    #[error("{binding} for {key} is scoped with {tier} which is not active in {scope}")]
    ScopeMismatch {
        key: Key,
        binding: String,
        tier: String,
        scope: String,
    },

    /// A scoped child was built on top of an unscoped parent
    #[error("Scope with tiers {tiers} may not depend on unscoped parent")]
    UnscopedParent { tiers: String },

    /// A tier is already active somewhere in the ancestry
    #[error("Detected scope tier cycle:\n{chain}")]
    ScopeTierCycle { chain: String },
}

/// One `(key, binding)` step of a resolution chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub key: Key,
    pub binding: String,
}

/// Errors raised while resolving or invoking bindings.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No registration and no just-in-time candidate anywhere in the scope chain
    #[error("{}", render_chain_failure("Missing binding", .key, .chain, "was not found"))]
    MissingBinding { key: Key, chain: Vec<ChainLink> },

    /// The key is already being linked further up the chain
    #[error("{}", render_chain_failure("Dependency cycle", .key, .chain, "forms a cycle"))]
    DependencyCycle { key: Key, chain: Vec<ChainLink> },

    /// A just-in-time binding asked for a tier that no scope in the ancestry has
    #[error("Unable to place {binding} for {key}: no scope in the chain of {scope} is scoped with {tier}")]
    ScopeMismatch {
        key: Key,
        binding: String,
        tier: String,
        scope: String,
    },

    /// An absent value where the consumer forbids it
    #[error("{binding} returned no value which is not allowed for {context}")]
    NullabilityViolation {
        binding: String,
        context: &'static str,
    },

    /// A produced value did not have the requested type
    #[error("Type mismatch for {subject}: expected {expected}")]
    TypeMismatch { subject: String, expected: String },

    /// A two-phase instance was read before it was populated
    #[error("{binding} was used before its value was set")]
    LateInstanceUnset { binding: String },

    /// A two-phase instance was populated twice
    #[error("{binding} already has a value")]
    LateInstanceAlreadySet { binding: String },

    /// A provider, lazy or child-scope factory outlived its scope
    #[error("Scope owning {subject} has been released")]
    ScopeReleased { subject: String },

    /// A factory returned an error
    #[error("Failed to create value from {binding}: {source}")]
    Creation {
        binding: String,
        #[source]
        source: BoxError,
    },

    /// Configuration error surfaced while building a scope during resolution
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl ResolveError {
    /// The resolution chain attached to chain-carrying errors.
    pub fn chain(&self) -> &[ChainLink] {
        match self {
            ResolveError::MissingBinding { chain, .. }
            | ResolveError::DependencyCycle { chain, .. } => chain,
            _ => &[],
        }
    }

    /// The key the failure is about, when there is one.
    pub fn key(&self) -> Option<&Key> {
        match self {
            ResolveError::MissingBinding { key, .. }
            | ResolveError::DependencyCycle { key, .. }
            | ResolveError::ScopeMismatch { key, .. } => Some(key),
            _ => None,
        }
    }
}

fn render_chain_failure(reason: &str, key: &Key, chain: &[ChainLink], cause: &str) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_chain_failure(&mut out, reason, key, chain, cause);
    out
}

fn write_chain_failure(
    out: &mut String,
    reason: &str,
    key: &Key,
    chain: &[ChainLink],
    cause: &str,
) -> fmt::Result {
    writeln!(out, "{reason} for {key}")?;
    for link in chain {
        writeln!(out, " * Requested: {}", link.key)?;
        writeln!(out, "     from {}", link.binding)?;
    }
    write!(out, " * Requested: {key}\n     which {cause}.")
}

/// Errors loading [`ResolverSettings`](crate::config::ResolverSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
}
