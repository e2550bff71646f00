//! Native runtime values.
//!
//! Values are what native expressions evaluate to and what backing providers
//! emit as result rows. They are converted to the portable
//! [`DynamicValue`](crate::dynamic::DynamicValue) form by the result mapper.

use crate::types::{DataType, RecordType, RuntimeType};
use anyhow::{bail, Result};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Provider-native handle with no portable representation (cursors, LOB locators)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueHandle {
    pub type_name: String,
    pub id: u64,
}

/// An instance of a record type; values are stored in field order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    ty: Arc<RecordType>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record, checking arity and member compatibility
    pub fn new(ty: Arc<RecordType>, values: Vec<Value>) -> Result<Self> {
        if values.len() != ty.fields().len() {
            bail!(
                "Value count {} doesn't match member count {} of {}",
                values.len(),
                ty.fields().len(),
                ty.descriptor()
            );
        }

        for (value, field) in values.iter().zip(ty.fields()) {
            if !value.is_compatible_with(&field.ty) {
                bail!(
                    "Value {:?} is not compatible with member {}: {}",
                    value,
                    field.name,
                    field.ty
                );
            }
        }

        Ok(Self { ty, values })
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.ty
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.ty.field(name).and_then(|(index, _)| self.values.get(index))
    }
}

/// Values produced by local evaluation and by backing providers
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Record(Record),
    Sequence(Vec<Value>),
    Opaque(OpaqueHandle),
}

impl Value {
    /// Get the scalar data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::String(_) => Some(DataType::Varchar),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value kind, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "Boolean",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
            Value::Record(_) => "Record",
            Value::Sequence(_) => "Sequence",
            Value::Opaque(_) => "Opaque",
        }
    }

    /// Check if this value is compatible with the given runtime type
    pub fn is_compatible_with(&self, ty: &RuntimeType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true, // NULL is compatible with any type
            (_, RuntimeType::Any) => true,
            (Value::Opaque(_), _) => false,
            (Value::Record(record), RuntimeType::Record(expected)) => {
                record.record_type().descriptor() == expected.descriptor()
            }
            (Value::Sequence(items), RuntimeType::Sequence(element)) => {
                items.iter().all(|item| item.is_compatible_with(element))
            }
            (value, RuntimeType::Scalar(data_type)) => value.data_type() == Some(*data_type),
            _ => false,
        }
    }

    /// Numeric view used for cross-width comparison
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(n) => Some(*n as f64),
            Value::Int64(n) => Some(*n as f64),
            Value::Float64(n) => Some(*n),
            _ => None,
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(*n as i64),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Total equality used by `==`, `Contains`, `Distinct` and join keys.
    ///
    /// Null equals null; numbers of different widths compare by value.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Record(a), Value::Record(b)) => {
                a.record_type().descriptor() == b.record_type().descriptor()
                    && a.values().len() == b.values().len()
                    && a.values().iter().zip(b.values()).all(|(x, y)| x.equals(y))
            }
            (Value::Sequence(a), Value::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Ordering between two non-NULL scalar values, if they are comparable
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Opaque(a), Value::Opaque(b)) if a == b => Some(Ordering::Equal),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::Float64(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Record(record) => write!(f, "Record({})", record.record_type().descriptor()),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Opaque(handle) => write!(f, "Opaque({}#{})", handle.type_name, handle.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDef, TypeDescriptor};

    fn point_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            TypeDescriptor::named("geo.Point"),
            vec![
                FieldDef::new("X", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Label", RuntimeType::Scalar(DataType::Varchar)),
            ],
        ))
    }

    #[test]
    fn test_value_compatibility() {
        assert!(Value::Null.is_compatible_with(&RuntimeType::Scalar(DataType::Int32)));
        assert!(Value::Boolean(true).is_compatible_with(&RuntimeType::Scalar(DataType::Boolean)));
        assert!(Value::Int64(42).is_compatible_with(&RuntimeType::Scalar(DataType::Int64)));
        assert!(Value::String("hello".to_string()).is_compatible_with(&RuntimeType::Any));

        assert!(!Value::Boolean(true).is_compatible_with(&RuntimeType::Scalar(DataType::Int32)));
        assert!(!Value::Int32(42).is_compatible_with(&RuntimeType::Scalar(DataType::Int64)));
        assert!(
            Value::Sequence(vec![Value::Int32(1), Value::Null])
                .is_compatible_with(&RuntimeType::sequence(RuntimeType::Scalar(DataType::Int32)))
        );
    }

    #[test]
    fn test_record_arity_and_types() -> Result<()> {
        let ty = point_type();
        let record = Record::new(
            ty.clone(),
            vec![Value::Int32(3), Value::String("a".to_string())],
        )?;
        assert_eq!(record.get("X"), Some(&Value::Int32(3)));
        assert_eq!(record.get("Missing"), None);

        assert!(Record::new(ty.clone(), vec![Value::Int32(3)]).is_err());
        assert!(Record::new(ty, vec![Value::Boolean(true), Value::Null]).is_err());
        Ok(())
    }

    #[test]
    fn test_cross_width_comparison() {
        assert_eq!(Value::Int32(5).compare(&Value::Int64(5)), Some(Ordering::Equal));
        assert_eq!(
            Value::Int64(5).compare(&Value::Float64(5.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int32(1).compare(&Value::String("1".to_string())), None);
        assert!(Value::Int32(7).equals(&Value::Float64(7.0)));
        assert!(Value::Null.equals(&Value::Null));
        assert!(!Value::Null.equals(&Value::Int32(0)));
    }
}
