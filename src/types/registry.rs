//! Type resolution.
//!
//! [`TypeRegistry`] is the default [`TypeResolver`]: built-in scalars and
//! sequences are resolved structurally, as are anonymous projections, whose
//! descriptors carry their member names and types. Named record types must
//! be registered up front. Successful resolutions are cached for the lifetime of the registry
//! and never invalidated.

use crate::error::{QueryError, QueryResult};
use crate::types::descriptor::{OBJECT_TYPE_NAME, SEQUENCE_TYPE_NAME};
use crate::types::{DataType, FieldDef, RecordType, RuntimeType, TypeDescriptor};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps portable type descriptors to concrete runtime types
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, descriptor: &TypeDescriptor) -> QueryResult<RuntimeType>;
}

/// Registry of record types with a shared resolution cache
#[derive(Default)]
pub struct TypeRegistry {
    records: RwLock<HashMap<TypeDescriptor, Arc<RecordType>>>,
    cache: DashMap<TypeDescriptor, RuntimeType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type.
    ///
    /// Registering the same shape twice returns the existing entry; a
    /// different shape under an existing descriptor is rejected.
    pub fn register(&self, record: RecordType) -> QueryResult<Arc<RecordType>> {
        let mut records = self.records.write();
        if let Some(existing) = records.get(record.descriptor()) {
            if **existing == record {
                return Ok(existing.clone());
            }
            return Err(QueryError::TypeResolution {
                descriptor: record.descriptor().clone(),
                reason: "a different type is already registered under this descriptor"
                    .to_string(),
            });
        }

        let record = Arc::new(record);
        records.insert(record.descriptor().clone(), record.clone());
        Ok(record)
    }

    pub fn record(&self, descriptor: &TypeDescriptor) -> Option<Arc<RecordType>> {
        self.records.read().get(descriptor).cloned()
    }

    /// Number of cached descriptor resolutions
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn resolve_uncached(&self, descriptor: &TypeDescriptor) -> QueryResult<RuntimeType> {
        if descriptor.is_core() {
            return self.resolve_core(descriptor);
        }

        if let Some(members) = descriptor.anonymous_members() {
            return self.resolve_anonymous(descriptor, &members);
        }

        if !descriptor.generic_arguments.is_empty() {
            return Err(QueryError::TypeResolution {
                descriptor: descriptor.clone(),
                reason: "generic record types are not supported".to_string(),
            });
        }

        self.record(descriptor)
            .map(RuntimeType::Record)
            .ok_or_else(|| QueryError::TypeResolution {
                descriptor: descriptor.clone(),
                reason: "type is not registered".to_string(),
            })
    }

    /// Rebuild a projection type from its member names and argument types
    fn resolve_anonymous(
        &self,
        descriptor: &TypeDescriptor,
        members: &[&str],
    ) -> QueryResult<RuntimeType> {
        if members.len() != descriptor.generic_arguments.len() {
            return Err(QueryError::TypeResolution {
                descriptor: descriptor.clone(),
                reason: format!(
                    "{} members but {} member types",
                    members.len(),
                    descriptor.generic_arguments.len()
                ),
            });
        }

        let fields = members
            .iter()
            .zip(&descriptor.generic_arguments)
            .map(|(name, ty)| Ok(FieldDef::new(*name, self.resolve(ty)?)))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(RuntimeType::Record(Arc::new(RecordType::anonymous(fields))))
    }

    fn resolve_core(&self, descriptor: &TypeDescriptor) -> QueryResult<RuntimeType> {
        let arity = descriptor.generic_arguments.len();
        match descriptor.name.as_str() {
            SEQUENCE_TYPE_NAME => match descriptor.generic_arguments.as_slice() {
                [element] => Ok(RuntimeType::sequence(self.resolve(element)?)),
                _ => Err(QueryError::TypeResolution {
                    descriptor: descriptor.clone(),
                    reason: format!("Sequence expects 1 generic argument, got {}", arity),
                }),
            },
            OBJECT_TYPE_NAME if arity == 0 => Ok(RuntimeType::Any),
            name => match DataType::from_name(name) {
                Some(data_type) if arity == 0 => Ok(RuntimeType::Scalar(data_type)),
                Some(_) => Err(QueryError::TypeResolution {
                    descriptor: descriptor.clone(),
                    reason: format!("scalar type {} takes no generic arguments", name),
                }),
                None => Err(QueryError::TypeResolution {
                    descriptor: descriptor.clone(),
                    reason: "unknown built-in type".to_string(),
                }),
            },
        }
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, descriptor: &TypeDescriptor) -> QueryResult<RuntimeType> {
        if let Some(hit) = self.cache.get(descriptor) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(descriptor)?;
        // Racing resolvers compute the same value; first insert wins.
        Ok(self
            .cache
            .entry(descriptor.clone())
            .or_insert(resolved)
            .clone())
    }
}
