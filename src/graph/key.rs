//! Keys: the qualified type identity every binding is looked up by.

use crate::error::ConfigurationError;
use std::fmt;
use std::sync::Arc;

/// Structural description of a type.
///
/// Named types carry their type arguments (`Set<String>` is
/// `Named { name: "Set", args: [Named("String")] }`). A `Variable` is an
/// unresolved type parameter and may never appear inside a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeDesc {
    Named { name: Arc<str>, args: Arc<[TypeDesc]> },
    Variable(Arc<str>),
}

impl TypeDesc {
    pub const PROVIDER: &'static str = "Provider";
    pub const LAZY: &'static str = "Lazy";
    pub const OPTIONAL: &'static str = "Optional";
    pub const SET: &'static str = "Set";
    pub const MAP: &'static str = "Map";

    /// A type without arguments.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        TypeDesc::Named {
            name: name.into(),
            args: Arc::from(Vec::new()),
        }
    }

    /// A parameterized type.
    pub fn generic(name: impl Into<Arc<str>>, args: impl IntoIterator<Item = TypeDesc>) -> Self {
        TypeDesc::Named {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// An unresolved type parameter.
    pub fn variable(name: impl Into<Arc<str>>) -> Self {
        TypeDesc::Variable(name.into())
    }

    /// Named after the Rust type's `type_name`.
    pub fn of_rust<T: ?Sized + 'static>() -> Self {
        TypeDesc::named(std::any::type_name::<T>())
    }

    pub fn set_of(element: TypeDesc) -> Self {
        TypeDesc::generic(Self::SET, [element])
    }

    pub fn map_of(key: TypeDesc, value: TypeDesc) -> Self {
        TypeDesc::generic(Self::MAP, [key, value])
    }

    pub fn provider_of(inner: TypeDesc) -> Self {
        TypeDesc::generic(Self::PROVIDER, [inner])
    }

    pub fn lazy_of(inner: TypeDesc) -> Self {
        TypeDesc::generic(Self::LAZY, [inner])
    }

    pub fn optional_of(inner: TypeDesc) -> Self {
        TypeDesc::generic(Self::OPTIONAL, [inner])
    }

    /// Raw name without arguments; the variable name for variables.
    pub fn raw_name(&self) -> &str {
        match self {
            TypeDesc::Named { name, .. } => name,
            TypeDesc::Variable(name) => name,
        }
    }

    pub fn args(&self) -> &[TypeDesc] {
        match self {
            TypeDesc::Named { args, .. } => args,
            TypeDesc::Variable(_) => &[],
        }
    }

    /// The single argument of a one-argument wrapper named `wrapper`.
    pub fn wrapped(&self, wrapper: &str) -> Option<&TypeDesc> {
        match self {
            TypeDesc::Named { name, args } if &**name == wrapper && args.len() == 1 => {
                args.first()
            }
            _ => None,
        }
    }

    /// `(K, V)` when this is `Map<K, V>`.
    pub fn map_args(&self) -> Option<(&TypeDesc, &TypeDesc)> {
        match self {
            TypeDesc::Named { name, args } if &**name == Self::MAP && args.len() == 2 => {
                Some((&args[0], &args[1]))
            }
            _ => None,
        }
    }

    /// True when no type variable appears anywhere in the descriptor.
    pub fn is_concrete(&self) -> bool {
        self.first_variable().is_none()
    }

    fn first_variable(&self) -> Option<&str> {
        match self {
            TypeDesc::Variable(name) => Some(name),
            TypeDesc::Named { args, .. } => args.iter().find_map(TypeDesc::first_variable),
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Variable(name) => f.write_str(name),
            TypeDesc::Named { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
        }
    }
}

/// Qualifier tag distinguishing keys of the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Arc<str>);

impl Qualifier {
    /// Rendered verbatim, e.g. `@Blue`.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Qualifier(text.into())
    }

    /// `@Named("value")`
    pub fn named(value: &str) -> Self {
        Qualifier(Arc::from(format!("@Named(\"{value}\")")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a requested value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    qualifier: Option<Qualifier>,
    ty: TypeDesc,
}

impl Key {
    /// Fails when `ty` still contains a type variable.
    pub fn of(qualifier: Option<Qualifier>, ty: TypeDesc) -> Result<Self, ConfigurationError> {
        if let Some(variable) = ty.first_variable() {
            return Err(ConfigurationError::UnresolvedTypeVariable {
                ty: ty.to_string(),
                variable: variable.to_string(),
            });
        }
        Ok(Key { qualifier, ty })
    }

    pub fn of_type(ty: TypeDesc) -> Result<Self, ConfigurationError> {
        Key::of(None, ty)
    }

    pub fn qualified(qualifier: Qualifier, ty: TypeDesc) -> Result<Self, ConfigurationError> {
        Key::of(Some(qualifier), ty)
    }

    /// Unqualified key for a Rust type. Always concrete.
    pub fn of_rust<T: ?Sized + 'static>() -> Self {
        Key {
            qualifier: None,
            ty: TypeDesc::of_rust::<T>(),
        }
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    /// Same qualifier, different type. `ty` must be built from parts of an
    /// existing key so it stays concrete.
    pub(crate) fn with_type(&self, ty: TypeDesc) -> Key {
        debug_assert!(ty.is_concrete());
        Key {
            qualifier: self.qualifier.clone(),
            ty,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{qualifier} {}", self.ty),
            None => write!(f, "{}", self.ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_covers_qualifier_and_type() {
        let plain = Key::of_type(TypeDesc::named("String")).unwrap();
        let named = Key::qualified(Qualifier::named("home"), TypeDesc::named("String")).unwrap();
        let again = Key::qualified(Qualifier::named("home"), TypeDesc::named("String")).unwrap();

        assert_ne!(plain, named);
        assert_eq!(named, again);

        let set: HashSet<Key> = [plain.clone(), named.clone(), again].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_renders_qualifier_before_type() {
        let key = Key::qualified(
            Qualifier::named("home"),
            TypeDesc::map_of(TypeDesc::named("String"), TypeDesc::named("Long")),
        )
        .unwrap();
        assert_eq!(key.to_string(), "@Named(\"home\") Map<String, Long>");
        assert_eq!(Key::of_type(TypeDesc::named("Foo")).unwrap().to_string(), "Foo");
    }

    #[test]
    fn type_variables_are_rejected_at_construction() {
        let err = Key::of_type(TypeDesc::set_of(TypeDesc::variable("T"))).unwrap_err();
        match err {
            ConfigurationError::UnresolvedTypeVariable { ty, variable } => {
                assert_eq!(ty, "Set<T>");
                assert_eq!(variable, "T");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(Key::of_type(TypeDesc::variable("E")).is_err());
    }

    #[test]
    fn wrapper_inspection() {
        let inner = TypeDesc::named("Foo");
        let provider = TypeDesc::provider_of(inner.clone());
        assert_eq!(provider.wrapped(TypeDesc::PROVIDER), Some(&inner));
        assert_eq!(provider.wrapped(TypeDesc::LAZY), None);

        let map = TypeDesc::map_of(TypeDesc::named("K"), TypeDesc::named("V"));
        assert_eq!(map.map_args().map(|(k, _)| k.raw_name()), Some("K"));
        assert!(inner.map_args().is_none());
    }
}
