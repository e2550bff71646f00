//! Query execution entry points.
//!
//! [`ExpressionExecutor`] runs the whole pipeline for one portable
//! expression: translate, hand the native query to its provider, and map
//! what comes back into dynamic results.

use crate::config::ExecutionOptions;
use crate::context::ExecutionContext;
use crate::dynamic::DynamicValue;
use crate::error::{QueryError, QueryResult};
use crate::expression::{evaluate_expression, NativeExpression, NativeQuery, PortableExpression};
use crate::mapper::MappedRows;
use crate::source::{DataContext, QueryableRoot};
use crate::translator::Translator;
use crate::types::{RecordType, TypeResolver};
use crate::value::Value;
use log::debug;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Fully materialized result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOutcome {
    Scalar(DynamicValue),
    Sequence(Vec<DynamicValue>),
}

impl QueryOutcome {
    pub fn as_sequence(&self) -> Option<&[DynamicValue]> {
        match self {
            QueryOutcome::Sequence(items) => Some(items),
            QueryOutcome::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&DynamicValue> {
        match self {
            QueryOutcome::Scalar(value) => Some(value),
            QueryOutcome::Sequence(_) => None,
        }
    }
}

/// Result of one execution with sequence rows mapped on demand
pub enum LazyOutcome {
    Scalar(DynamicValue),
    Sequence(MappedRows),
}

impl LazyOutcome {
    /// Drain the rows; the first failing row discards everything mapped so far
    pub fn materialize(self) -> QueryResult<QueryOutcome> {
        match self {
            LazyOutcome::Scalar(value) => Ok(QueryOutcome::Scalar(value)),
            LazyOutcome::Sequence(rows) => Ok(QueryOutcome::Sequence(
                rows.collect::<QueryResult<Vec<_>>>()?,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExpressionExecutor {
    context: ExecutionContext,
}

impl ExpressionExecutor {
    pub fn new(context: ExecutionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Translate without executing
    pub fn translate(&self, expr: &PortableExpression) -> QueryResult<NativeExpression> {
        Translator::new(&self.context).translate(expr)
    }

    /// Execute and materialize the whole result
    pub fn execute(&self, expr: &PortableExpression) -> QueryResult<QueryOutcome> {
        self.execute_lazy(expr)?.materialize()
    }

    /// Execute; sequence rows are mapped as the caller pulls them
    pub fn execute_lazy(&self, expr: &PortableExpression) -> QueryResult<LazyOutcome> {
        let native = self.translate(expr)?;
        self.execute_native(&native)
    }

    /// Execute an already translated expression
    pub fn execute_native(&self, native: &NativeExpression) -> QueryResult<LazyOutcome> {
        let mapper = self.context.mapper();
        match native {
            NativeExpression::Query(query) => {
                let provider = query.root.provider();
                debug!(
                    "Executing query on '{}' via provider '{}' with {} operators",
                    query.root.source(),
                    provider.name(),
                    query.operators.len()
                );
                let rows = provider
                    .execute_query(query)
                    .map_err(|e| QueryError::execution(provider.name(), e))?;
                Ok(LazyOutcome::Sequence(mapper.map_rows(rows, provider.name())))
            }

            NativeExpression::Aggregate { source, aggregate } => {
                let provider = source.root.provider();
                debug!(
                    "Executing {} on '{}' via provider '{}'",
                    aggregate.name(),
                    source.root.source(),
                    provider.name()
                );
                let value = provider
                    .execute_scalar(source, aggregate)
                    .map_err(|e| QueryError::execution(provider.name(), e))?;
                Ok(LazyOutcome::Scalar(mapper.map_value(&value)?))
            }

            NativeExpression::Insert { target, values } => self.insert(target, values),

            // folded constants, or scalar expressions over nested queries
            other => {
                let value = evaluate_expression(other)
                    .map_err(|source| QueryError::evaluation(other, source))?;
                match value {
                    Value::Sequence(items) => Ok(LazyOutcome::Sequence(
                        mapper.map_rows(Box::new(items.into_iter().map(Ok)), "local"),
                    )),
                    value => Ok(LazyOutcome::Scalar(mapper.map_value(&value)?)),
                }
            }
        }
    }

    fn insert(&self, target: &NativeQuery, values: &NativeExpression) -> QueryResult<LazyOutcome> {
        let record = match evaluate_expression(values)
            .map_err(|source| QueryError::evaluation(values, source))?
        {
            Value::Record(record) => record,
            other => {
                return Err(QueryError::invalid(
                    "Call(Insert)",
                    format!("values evaluated to {}", other.kind_name()),
                ))
            }
        };

        let target = match self.context.insert_interceptor() {
            Some(intercept) => intercept(target.clone()),
            None => target.clone(),
        };
        let provider = target.root.provider();
        debug!(
            "Inserting {} into '{}' via provider '{}'",
            record.record_type().descriptor(),
            target.root.source(),
            provider.name()
        );
        let count = provider
            .insert(&target, record)
            .map_err(|e| QueryError::execution(provider.name(), e))?;
        Ok(LazyOutcome::Scalar(DynamicValue::Int32(
            i32::try_from(count).unwrap_or(i32::MAX),
        )))
    }

    /// Execute on the blocking pool, giving up when `cancel` completes first.
    ///
    /// Cancellation stops waiting for the provider; a provider call already
    /// in flight runs to completion and its result is dropped.
    pub async fn execute_async<F>(
        &self,
        expr: PortableExpression,
        cancel: F,
    ) -> QueryResult<QueryOutcome>
    where
        F: Future<Output = ()>,
    {
        let executor = self.clone();
        let task = tokio::task::spawn_blocking(move || executor.execute(&expr));

        tokio::select! {
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(QueryError::execution("runtime", e.into())),
            },
            _ = cancel => {
                debug!("Execution cancelled before the provider finished");
                Err(QueryError::Cancelled)
            }
        }
    }
}

/// Execute against a bound data context
pub fn execute_with_context(
    expr: &PortableExpression,
    context: Arc<dyn DataContext>,
    types: Arc<dyn TypeResolver>,
    options: ExecutionOptions,
) -> QueryResult<QueryOutcome> {
    let context = ExecutionContext::for_data_context(context)
        .type_resolver(types)
        .options(options)
        .build();
    ExpressionExecutor::new(context).execute(expr)
}

/// Execute with a caller-supplied queryable factory
pub fn execute_with_factory(
    expr: &PortableExpression,
    factory: impl Fn(&RecordType) -> Option<QueryableRoot> + Send + Sync + 'static,
    types: Arc<dyn TypeResolver>,
    options: ExecutionOptions,
) -> QueryResult<QueryOutcome> {
    let context = ExecutionContext::for_factory(factory)
        .type_resolver(types)
        .options(options)
        .build();
    ExpressionExecutor::new(context).execute(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryDatabase;
    use crate::types::{DataType, FieldDef, RuntimeType, TypeDescriptor};
    use anyhow::Result;

    fn database() -> Result<Arc<MemoryDatabase>> {
        let db = Arc::new(MemoryDatabase::new("memory"));
        let order = db.register_type(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![
                FieldDef::new("Id", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Amount", RuntimeType::Scalar(DataType::Int32)),
            ],
        ))?;
        db.create_table("Orders", order)?;
        db.insert_rows(
            "Orders",
            vec![
                vec![Value::Int32(1), Value::Int32(50)],
                vec![Value::Int32(2), Value::Int32(150)],
            ],
        )?;
        Ok(db)
    }

    fn executor(db: &Arc<MemoryDatabase>) -> ExpressionExecutor {
        let resolver: Arc<dyn TypeResolver> = db.type_registry().clone();
        ExpressionExecutor::new(
            ExecutionContext::for_data_context(db.clone())
                .type_resolver(resolver)
                .build(),
        )
    }

    #[test]
    fn test_scalar_and_sequence_outcomes() -> Result<()> {
        let db = database()?;
        let executor = executor(&db);
        let orders = PortableExpression::query_root(TypeDescriptor::named("shop.Order"));

        let count = executor.execute(&orders.clone().count())?;
        assert_eq!(count, QueryOutcome::Scalar(DynamicValue::Int32(2)));

        let all = executor.execute(&orders)?;
        assert_eq!(all.as_sequence().map(|rows| rows.len()), Some(2));

        // a tree that never touches a source is evaluated locally
        let local = executor.execute(&PortableExpression::binary(
            crate::expression::BinaryOperator::Add,
            PortableExpression::int32(2),
            PortableExpression::int32(3),
        ))?;
        assert_eq!(local, QueryOutcome::Scalar(DynamicValue::Int32(5)));
        Ok(())
    }

    #[test]
    fn test_lazy_outcome_maps_on_demand() -> Result<()> {
        let db = database()?;
        let outcome = executor(&db).execute_lazy(&PortableExpression::query_root(
            TypeDescriptor::named("shop.Order"),
        ))?;
        match outcome {
            LazyOutcome::Sequence(mut rows) => {
                let first = rows.next().transpose()?.unwrap();
                assert_eq!(
                    first.as_object().and_then(|o| o.get("Id")),
                    Some(&DynamicValue::Int32(1))
                );
                assert_eq!(rows.count(), 1);
            }
            LazyOutcome::Scalar(value) => panic!("unexpected scalar {:?}", value),
        }
        Ok(())
    }
}
