//! Portable type descriptors.

use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace used for built-in scalar and collection types.
pub const CORE_NAMESPACE: &str = "core";

/// Name of the built-in generic sequence type.
pub const SEQUENCE_TYPE_NAME: &str = "Sequence";

/// Name of the built-in top type.
pub const OBJECT_TYPE_NAME: &str = "Object";

const ANONYMOUS_PREFIX: &str = "<>Anonymous(";

/// Structural, serializable stand-in for a runtime type identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Dotted namespace, e.g. `shop` or `core`
    #[serde(default)]
    pub namespace: Option<String>,
    /// Simple type name
    pub name: String,
    /// Generic arguments, in declaration order
    #[serde(default)]
    pub generic_arguments: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.into(),
            generic_arguments: Vec::new(),
        }
    }

    /// Parse a dotted full name; everything before the last dot is the namespace.
    pub fn named(full_name: &str) -> Self {
        match full_name.rsplit_once('.') {
            Some((namespace, name)) => Self::new(Some(namespace), name),
            None => Self::new(None, full_name),
        }
    }

    pub fn with_generic_arguments(mut self, arguments: Vec<TypeDescriptor>) -> Self {
        self.generic_arguments = arguments;
        self
    }

    /// Descriptor of a built-in scalar type
    pub fn scalar(data_type: DataType) -> Self {
        Self::new(Some(CORE_NAMESPACE), data_type.name())
    }

    /// Descriptor of a built-in sequence of `element`
    pub fn sequence(element: TypeDescriptor) -> Self {
        Self::new(Some(CORE_NAMESPACE), SEQUENCE_TYPE_NAME).with_generic_arguments(vec![element])
    }

    /// Descriptor of the built-in top type
    pub fn object() -> Self {
        Self::new(Some(CORE_NAMESPACE), OBJECT_TYPE_NAME)
    }

    /// Descriptor of a structural projection; member types travel as generic arguments
    pub fn anonymous(members: &[&str], member_types: Vec<TypeDescriptor>) -> Self {
        Self::new(None, format!("{}{})", ANONYMOUS_PREFIX, members.join(",")))
            .with_generic_arguments(member_types)
    }

    /// Member names of an anonymous projection descriptor
    pub fn anonymous_members(&self) -> Option<Vec<&str>> {
        if self.namespace.is_some() {
            return None;
        }
        let names = self
            .name
            .strip_prefix(ANONYMOUS_PREFIX)?
            .strip_suffix(')')?;
        if names.is_empty() {
            return Some(Vec::new());
        }
        Some(names.split(',').collect())
    }

    pub fn is_core(&self) -> bool {
        self.namespace.as_deref() == Some(CORE_NAMESPACE)
    }

    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}.{}", namespace, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if !self.generic_arguments.is_empty() {
            write!(f, "<")?;
            for (i, argument) in self.generic_arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", argument)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_splits_namespace() {
        let descriptor = TypeDescriptor::named("shop.sales.Order");
        assert_eq!(descriptor.namespace.as_deref(), Some("shop.sales"));
        assert_eq!(descriptor.name, "Order");

        let bare = TypeDescriptor::named("Order");
        assert!(bare.namespace.is_none());
        assert_eq!(bare.full_name(), "Order");
    }

    #[test]
    fn test_display_generic() {
        let descriptor = TypeDescriptor::sequence(TypeDescriptor::named("shop.Order"));
        assert_eq!(descriptor.to_string(), "core.Sequence<shop.Order>");
        assert!(descriptor.is_core());
        assert_eq!(
            TypeDescriptor::scalar(DataType::Int64).to_string(),
            "core.Int64"
        );
    }

    #[test]
    fn test_anonymous_members() {
        let descriptor = TypeDescriptor::anonymous(
            &["Id", "Name"],
            vec![
                TypeDescriptor::scalar(DataType::Int32),
                TypeDescriptor::scalar(DataType::Varchar),
            ],
        );
        assert_eq!(descriptor.anonymous_members(), Some(vec!["Id", "Name"]));
        assert_eq!(
            TypeDescriptor::anonymous(&[], vec![]).anonymous_members(),
            Some(vec![])
        );
        assert_eq!(TypeDescriptor::named("shop.Order").anonymous_members(), None);
    }
}
