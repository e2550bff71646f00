//! Result mapping.
//!
//! Turns native values into the portable [`DynamicValue`] graph and back.
//! Sequences are mapped lazily, one row at a time, in provider order.

use crate::config::TypeAnnotationMode;
use crate::dynamic::{DynamicObject, DynamicValue};
use crate::error::{QueryError, QueryResult};
use crate::provider::RowStream;
use crate::types::{DataType, FieldDef, RecordType, RuntimeType, TypeResolver};
use crate::value::{Record, Value};
use std::fmt;
use std::sync::Arc;

/// Decides whether results derived from a runtime type embed its descriptor
pub type AnnotationPolicy = Arc<dyn Fn(&RuntimeType) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ResultMapper {
    policy: AnnotationPolicy,
}

impl Default for ResultMapper {
    fn default() -> Self {
        Self::with_mode(TypeAnnotationMode::default())
    }
}

impl fmt::Debug for ResultMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultMapper").finish_non_exhaustive()
    }
}

impl ResultMapper {
    pub fn new(policy: impl Fn(&RuntimeType) -> bool + Send + Sync + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn with_mode(mode: TypeAnnotationMode) -> Self {
        Self {
            policy: mode.policy(),
        }
    }

    pub fn with_policy(policy: AnnotationPolicy) -> Self {
        Self { policy }
    }

    pub fn annotates(&self, ty: &RuntimeType) -> bool {
        (self.policy)(ty)
    }

    /// Map one value
    pub fn map_value(&self, value: &Value) -> QueryResult<DynamicValue> {
        self.map_at(value, "$")
    }

    pub fn map_record(&self, record: &Record) -> QueryResult<DynamicObject> {
        self.map_record_at(record, "$")
    }

    /// Map provider rows lazily; the iterator stops after the first error
    pub fn map_rows(&self, rows: RowStream, provider: impl Into<String>) -> MappedRows {
        MappedRows {
            rows,
            mapper: self.clone(),
            provider: provider.into(),
            index: 0,
            done: false,
        }
    }

    fn map_at(&self, value: &Value, path: &str) -> QueryResult<DynamicValue> {
        Ok(match value {
            Value::Null => DynamicValue::Null,
            Value::Boolean(b) => DynamicValue::Boolean(*b),
            Value::Int32(n) => DynamicValue::Int32(*n),
            Value::Int64(n) => DynamicValue::Int64(*n),
            Value::Float64(n) => DynamicValue::Float64(*n),
            Value::String(s) => DynamicValue::String(s.clone()),
            Value::Record(record) => DynamicValue::Object(self.map_record_at(record, path)?),
            Value::Sequence(items) => DynamicValue::Sequence(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.map_at(item, &format!("{}[{}]", path, i)))
                    .collect::<QueryResult<Vec<_>>>()?,
            ),
            Value::Opaque(handle) => {
                return Err(QueryError::Mapping {
                    path: path.to_string(),
                    reason: format!(
                        "provider value of type {} has no portable representation",
                        handle.type_name
                    ),
                })
            }
        })
    }

    fn map_record_at(&self, record: &Record, path: &str) -> QueryResult<DynamicObject> {
        let ty = record.record_type();
        let mut object = if self.annotates(&RuntimeType::Record(ty.clone())) {
            DynamicObject::with_type(ty.descriptor().clone())
        } else {
            DynamicObject::new()
        };

        for (field, value) in ty.fields().iter().zip(record.values()) {
            let value = self.map_at(value, &format!("{}.{}", path, field.name))?;
            object.set(field.name.clone(), value);
        }
        Ok(object)
    }

    /// Rebuild a native value from its portable form.
    ///
    /// `expected` wins over embedded type information; objects with neither
    /// become anonymous structural records. Integers may widen to the
    /// expected numeric type.
    pub fn reconstruct(
        value: &DynamicValue,
        expected: Option<&RuntimeType>,
        resolver: &dyn TypeResolver,
    ) -> QueryResult<Value> {
        reconstruct_at(value, expected, resolver, "$")
    }
}

fn mismatch(path: &str, expected: &RuntimeType, actual: &DynamicValue) -> QueryError {
    QueryError::Mapping {
        path: path.to_string(),
        reason: format!("expected {}, found {}", expected, actual.kind_name()),
    }
}

fn reconstruct_at(
    value: &DynamicValue,
    expected: Option<&RuntimeType>,
    resolver: &dyn TypeResolver,
    path: &str,
) -> QueryResult<Value> {
    let expected = expected.filter(|ty| **ty != RuntimeType::Any);

    match (value, expected) {
        (DynamicValue::Null, _) => Ok(Value::Null),

        (DynamicValue::Object(object), Some(RuntimeType::Record(record))) => {
            reconstruct_record(object, record.clone(), resolver, path)
        }
        (DynamicValue::Object(object), None) => match &object.type_info {
            Some(descriptor) => match resolver.resolve(descriptor)? {
                RuntimeType::Record(record) => reconstruct_record(object, record, resolver, path),
                other => Err(QueryError::Mapping {
                    path: path.to_string(),
                    reason: format!("embedded type {} is not a record type", other),
                }),
            },
            None => reconstruct_anonymous(object, resolver, path),
        },

        (DynamicValue::Sequence(items), None) => items
            .iter()
            .enumerate()
            .map(|(i, item)| reconstruct_at(item, None, resolver, &format!("{}[{}]", path, i)))
            .collect::<QueryResult<Vec<_>>>()
            .map(Value::Sequence),
        (DynamicValue::Sequence(items), Some(RuntimeType::Sequence(element))) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                reconstruct_at(item, Some(element), resolver, &format!("{}[{}]", path, i))
            })
            .collect::<QueryResult<Vec<_>>>()
            .map(Value::Sequence),

        (scalar, None) => reconstruct_scalar(scalar, None).ok_or_else(|| QueryError::Mapping {
            path: path.to_string(),
            reason: format!("cannot reconstruct {}", scalar.kind_name()),
        }),
        (scalar, Some(ty @ RuntimeType::Scalar(data_type))) => {
            reconstruct_scalar(scalar, Some(*data_type)).ok_or_else(|| mismatch(path, ty, scalar))
        }
        (other, Some(ty)) => Err(mismatch(path, ty, other)),
    }
}

fn reconstruct_scalar(value: &DynamicValue, expected: Option<DataType>) -> Option<Value> {
    match (value, expected) {
        (DynamicValue::Boolean(b), None | Some(DataType::Boolean)) => Some(Value::Boolean(*b)),
        (DynamicValue::Int32(n), None | Some(DataType::Int32)) => Some(Value::Int32(*n)),
        (DynamicValue::Int32(n), Some(DataType::Int64)) => Some(Value::Int64(*n as i64)),
        (DynamicValue::Int32(n), Some(DataType::Float64)) => Some(Value::Float64(*n as f64)),
        (DynamicValue::Int64(n), None | Some(DataType::Int64)) => Some(Value::Int64(*n)),
        (DynamicValue::Int64(n), Some(DataType::Float64)) => Some(Value::Float64(*n as f64)),
        (DynamicValue::Float64(n), None | Some(DataType::Float64)) => Some(Value::Float64(*n)),
        (DynamicValue::String(s), None | Some(DataType::Varchar)) => Some(Value::String(s.clone())),
        _ => None,
    }
}

fn reconstruct_record(
    object: &DynamicObject,
    record: Arc<RecordType>,
    resolver: &dyn TypeResolver,
    path: &str,
) -> QueryResult<Value> {
    if let Some(unknown) = object
        .member_names()
        .find(|name| record.field(name).is_none())
    {
        return Err(QueryError::Mapping {
            path: format!("{}.{}", path, unknown),
            reason: format!("{} has no such member", record.descriptor()),
        });
    }

    let values = record
        .fields()
        .iter()
        .map(|field| match object.get(&field.name) {
            Some(value) => reconstruct_at(
                value,
                Some(&field.ty),
                resolver,
                &format!("{}.{}", path, field.name),
            ),
            None => Ok(Value::Null),
        })
        .collect::<QueryResult<Vec<_>>>()?;

    Record::new(record, values)
        .map(Value::Record)
        .map_err(|e| QueryError::Mapping {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

fn reconstruct_anonymous(
    object: &DynamicObject,
    resolver: &dyn TypeResolver,
    path: &str,
) -> QueryResult<Value> {
    let mut fields = Vec::with_capacity(object.len());
    let mut values = Vec::with_capacity(object.len());
    for member in &object.members {
        let value = reconstruct_at(
            &member.value,
            None,
            resolver,
            &format!("{}.{}", path, member.name),
        )?;
        fields.push(FieldDef::new(member.name.clone(), inferred_type(&value)));
        values.push(value);
    }

    Record::new(Arc::new(RecordType::anonymous(fields)), values)
        .map(Value::Record)
        .map_err(|e| QueryError::Mapping {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

fn inferred_type(value: &Value) -> RuntimeType {
    match value {
        Value::Record(record) => RuntimeType::Record(record.record_type().clone()),
        Value::Sequence(_) => RuntimeType::sequence(RuntimeType::Any),
        other => other
            .data_type()
            .map(RuntimeType::Scalar)
            .unwrap_or(RuntimeType::Any),
    }
}

/// Lazily mapped provider rows
pub struct MappedRows {
    rows: RowStream,
    mapper: ResultMapper,
    provider: String,
    index: usize,
    done: bool,
}

impl Iterator for MappedRows {
    type Item = QueryResult<DynamicValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = match self.rows.next()? {
            Ok(row) => self.mapper.map_at(&row, &format!("$[{}]", self.index)),
            Err(e) => Err(QueryError::execution(self.provider.clone(), e)),
        };
        self.index += 1;
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeDescriptor, TypeRegistry};
    use crate::value::OpaqueHandle;
    use anyhow::Result;

    fn line_type() -> RecordType {
        RecordType::new(
            TypeDescriptor::named("shop.Line"),
            vec![
                FieldDef::new("Sku", RuntimeType::Scalar(DataType::Varchar)),
                FieldDef::new("Qty", RuntimeType::Scalar(DataType::Int64)),
            ],
        )
    }

    fn order_type(line: Arc<RecordType>) -> RecordType {
        RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![
                FieldDef::new("Id", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Lines", RuntimeType::sequence(RuntimeType::Record(line))),
            ],
        )
    }

    fn sample(registry: &TypeRegistry) -> Result<Value> {
        let line = registry.register(line_type())?;
        let order = registry.register(order_type(line.clone()))?;
        let lines = (1..=2)
            .map(|qty| {
                Record::new(
                    line.clone(),
                    vec![Value::String(format!("SKU-{}", qty)), Value::Int64(qty)],
                )
                .map(Value::Record)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Record(Record::new(
            order,
            vec![Value::Int32(7), Value::Sequence(lines)],
        )?))
    }

    #[test]
    fn test_nested_mapping_and_round_trip() -> Result<()> {
        let registry = TypeRegistry::new();
        let original = sample(&registry)?;

        let mapped = ResultMapper::with_mode(TypeAnnotationMode::All).map_value(&original)?;
        let object = mapped.as_object().unwrap();
        assert_eq!(object.type_info, Some(TypeDescriptor::named("shop.Order")));
        match object.get("Lines") {
            Some(DynamicValue::Sequence(lines)) => {
                assert_eq!(lines.len(), 2);
                assert_eq!(
                    lines[1].as_object().unwrap().get("Qty"),
                    Some(&DynamicValue::Int64(2))
                );
            }
            other => panic!("unexpected Lines {:?}", other),
        }

        let back = ResultMapper::reconstruct(&mapped, None, &registry)?;
        assert_eq!(back, original);
        Ok(())
    }

    #[test]
    fn test_policy_none_strips_descriptors() -> Result<()> {
        let registry = TypeRegistry::new();
        let original = sample(&registry)?;
        let mapped = ResultMapper::with_mode(TypeAnnotationMode::None).map_value(&original)?;
        assert_eq!(mapped.as_object().unwrap().type_info, None);

        // the expected type stands in for the missing descriptor
        let order = RuntimeType::Record(
            registry
                .record(&TypeDescriptor::named("shop.Order"))
                .unwrap(),
        );
        assert_eq!(
            ResultMapper::reconstruct(&mapped, Some(&order), &registry)?,
            original
        );
        Ok(())
    }

    #[test]
    fn test_opaque_member_reports_path() -> Result<()> {
        let ty = Arc::new(RecordType::new(
            TypeDescriptor::named("db.Blob"),
            vec![FieldDef::new("Handle", RuntimeType::Any)],
        ));
        let record = Record::new(ty, vec![Value::Null])?;
        let row = Value::Sequence(vec![
            Value::Record(record),
            Value::Opaque(OpaqueHandle {
                type_name: "LobLocator".to_string(),
                id: 1,
            }),
        ]);

        match ResultMapper::default().map_value(&row) {
            Err(QueryError::Mapping { path, .. }) => assert_eq!(path, "$[1]"),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_mapped_rows_stop_after_error() {
        let rows: RowStream = Box::new(
            vec![
                Ok(Value::Int32(1)),
                Err(anyhow::anyhow!("connection reset")),
                Ok(Value::Int32(3)),
            ]
            .into_iter(),
        );
        let mapped: Vec<_> = ResultMapper::default().map_rows(rows, "test").collect();
        assert_eq!(mapped.len(), 2);
        assert!(matches!(mapped[0], Ok(DynamicValue::Int32(1))));
        assert!(matches!(mapped[1], Err(QueryError::Execution { .. })));
    }

    #[test]
    fn test_reconstruct_widening_and_unknown_members() -> Result<()> {
        let registry = TypeRegistry::new();
        let line = registry.register(line_type())?;
        let object = DynamicObject::new()
            .with("Sku", DynamicValue::String("A".to_string()))
            .with("Qty", DynamicValue::Int32(3));
        let value = ResultMapper::reconstruct(
            &DynamicValue::Object(object.clone()),
            Some(&RuntimeType::Record(line.clone())),
            &registry,
        )?;
        match value {
            Value::Record(record) => assert_eq!(record.get("Qty"), Some(&Value::Int64(3))),
            other => panic!("unexpected {:?}", other),
        }

        let extra = object.with("Color", DynamicValue::Null);
        let err = ResultMapper::reconstruct(
            &DynamicValue::Object(extra),
            Some(&RuntimeType::Record(line)),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Mapping { ref path, .. } if path == "$.Color"));
        Ok(())
    }
}
