//! Runtime type system.
//!
//! This module provides:
//! - Portable [`TypeDescriptor`]s as they travel inside expressions
//! - Concrete [`RuntimeType`]s the translator and providers work with
//! - The [`TypeResolver`] capability and its default, caching implementation

pub mod descriptor;
pub mod registry;

pub use descriptor::TypeDescriptor;
pub use registry::{TypeRegistry, TypeResolver};

use std::fmt;
use std::sync::Arc;

/// Scalar data types understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Varchar,
}

impl DataType {
    /// Portable name of the type inside the `core` namespace
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float64 => "Float64",
            DataType::Varchar => "String",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Boolean" => Some(DataType::Boolean),
            "Int32" => Some(DataType::Int32),
            "Int64" => Some(DataType::Int64),
            "Float64" => Some(DataType::Float64),
            "String" => Some(DataType::Varchar),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::Float64)
    }

    /// Widening rank used for numeric promotion
    pub(crate) fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Int32 => Some(0),
            DataType::Int64 => Some(1),
            DataType::Float64 => Some(2),
            _ => None,
        }
    }
}

/// A member of a record type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: RuntimeType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: RuntimeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A structured entity or projection type with ordered members
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    descriptor: TypeDescriptor,
    fields: Vec<FieldDef>,
    anonymous: bool,
}

impl RecordType {
    pub fn new(descriptor: TypeDescriptor, fields: Vec<FieldDef>) -> Self {
        Self {
            descriptor,
            fields,
            anonymous: false,
        }
    }

    /// Structural projection type; its descriptor is derived from the member names.
    pub fn anonymous(fields: Vec<FieldDef>) -> Self {
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        let descriptor = TypeDescriptor::anonymous(
            &names,
            fields.iter().map(|f| f.ty.descriptor()).collect(),
        );
        Self {
            descriptor,
            fields,
            anonymous: true,
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Look up a member by name, returning its position and definition
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

/// A concrete type as used by native expressions and values
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeType {
    Scalar(DataType),
    Record(Arc<RecordType>),
    Sequence(Box<RuntimeType>),
    /// Statically unknown; any value is compatible
    Any,
}

impl RuntimeType {
    pub fn sequence(element: RuntimeType) -> Self {
        RuntimeType::Sequence(Box::new(element))
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            RuntimeType::Scalar(data_type) => TypeDescriptor::scalar(*data_type),
            RuntimeType::Record(record) => record.descriptor().clone(),
            RuntimeType::Sequence(element) => TypeDescriptor::sequence(element.descriptor()),
            RuntimeType::Any => TypeDescriptor::object(),
        }
    }

    pub fn as_record(&self) -> Option<&Arc<RecordType>> {
        match self {
            RuntimeType::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&RuntimeType> {
        match self {
            RuntimeType::Sequence(element) => Some(element),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<DataType> {
        match self {
            RuntimeType::Scalar(data_type) => Some(*data_type),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.scalar().is_some_and(|t| t.is_numeric())
    }

    /// Whether a value statically typed `other` may stand where `self` is expected
    pub fn accepts(&self, other: &RuntimeType) -> bool {
        match (self, other) {
            (RuntimeType::Any, _) | (_, RuntimeType::Any) => true,
            (RuntimeType::Scalar(a), RuntimeType::Scalar(b)) => a == b,
            (RuntimeType::Record(a), RuntimeType::Record(b)) => a.descriptor() == b.descriptor(),
            (RuntimeType::Sequence(a), RuntimeType::Sequence(b)) => a.accepts(b),
            _ => false,
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![
                FieldDef::new("Id", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Amount", RuntimeType::Scalar(DataType::Float64)),
            ],
        ))
    }

    #[test]
    fn test_field_lookup() {
        let order = order_type();
        let (index, field) = order.field("Amount").unwrap();
        assert_eq!(index, 1);
        assert_eq!(field.ty, RuntimeType::Scalar(DataType::Float64));
        assert!(order.field("Missing").is_none());
    }

    #[test]
    fn test_anonymous_descriptor() {
        let projection = RecordType::anonymous(vec![FieldDef::new(
            "CustomerId",
            RuntimeType::Scalar(DataType::Int32),
        )]);
        assert!(projection.is_anonymous());
        assert_eq!(
            projection.descriptor().to_string(),
            "<>Anonymous(CustomerId)<core.Int32>"
        );
    }

    #[test]
    fn test_accepts() {
        let order = RuntimeType::Record(order_type());
        assert!(order.accepts(&RuntimeType::Any));
        assert!(RuntimeType::sequence(order.clone()).accepts(&RuntimeType::sequence(order)));
        assert!(
            !RuntimeType::Scalar(DataType::Int32).accepts(&RuntimeType::Scalar(DataType::Int64))
        );
    }
}
