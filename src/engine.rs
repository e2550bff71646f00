//! In-memory query engine.
//!
//! The reference backing provider. Native queries are compiled into a
//! Volcano-style pipeline of executors; each executor produces values one
//! at a time via `next()`, so result rows stream lazily to the mapper.

use crate::expression::{evaluate_expression, Aggregate, NativeQuery, QueryOperator};
use crate::provider::{QueryProvider, RowStream};
use crate::source::{DataContext, QueryableRoot};
use crate::types::{RecordType, RuntimeType, TypeDescriptor, TypeRegistry};
use crate::value::{Record, Value};
use anyhow::{anyhow, bail, Result};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub mod aggregate;
pub mod distinct;
pub mod filter;
pub mod join;
pub mod limit;
pub mod projection;
pub mod scan;
pub mod sort;

pub use aggregate::AggregateExecutor;
pub use distinct::DistinctExecutor;
pub use filter::FilterExecutor;
pub use join::NestedLoopJoinExecutor;
pub use limit::LimitExecutor;
pub use projection::ProjectionExecutor;
pub use scan::{SeqScanExecutor, StreamScanExecutor};
pub use sort::{SortCriteria, SortExecutor, SortOrder};

/// Trait for all query executors
pub trait Executor: Send {
    /// Initialize the executor. This must be called before `next()`.
    fn init(&mut self) -> Result<()>;

    /// Get the next value from the executor.
    /// Returns None when there are no more values.
    fn next(&mut self) -> Result<Option<Value>>;

    /// Type of the values this executor produces
    fn output_type(&self) -> &RuntimeType;
}

/// A table held in memory; rows are records of `element_type`
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub element_type: Arc<RecordType>,
    pub rows: Vec<Value>,
}

/// Named tables shared by every pipeline of one database
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Arc<RwLock<HashMap<String, MemoryTable>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str, element_type: Arc<RecordType>) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            bail!("Table '{}' already exists", name);
        }
        tables.insert(
            name.to_string(),
            MemoryTable {
                element_type,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn element_type(&self, name: &str) -> Option<Arc<RecordType>> {
        self.tables
            .read()
            .get(name)
            .map(|table| table.element_type.clone())
    }

    /// Append a row, checking it belongs to the table's element type
    pub fn insert(&self, name: &str, record: Record) -> Result<usize> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| anyhow!("Table '{}' not found", name))?;
        if record.record_type().descriptor() != table.element_type.descriptor() {
            bail!(
                "Cannot insert {} into table '{}' of {}",
                record.record_type().descriptor(),
                name,
                table.element_type.descriptor()
            );
        }
        table.rows.push(Value::Record(record));
        Ok(1)
    }

    /// Copy of the current rows.
    ///
    /// Scans work on a snapshot so nested queries issued while a pipeline
    /// is running never wait on the table lock.
    pub fn snapshot(&self, name: &str) -> Result<Vec<Value>> {
        self.tables
            .read()
            .get(name)
            .map(|table| table.rows.clone())
            .ok_or_else(|| anyhow!("Table '{}' not found", name))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Compile a native query into an executor pipeline rooted at a scan
pub fn build_pipeline(catalog: &Catalog, query: &NativeQuery) -> Result<Box<dyn Executor>> {
    let root = &query.root;
    let mut executor: Box<dyn Executor> = Box::new(SeqScanExecutor::new(
        catalog.clone(),
        root.source(),
        RuntimeType::Record(root.element_type().clone()),
        root.annotations().to_vec(),
    ));

    let mut operators = query.operators.iter().peekable();
    while let Some(operator) = operators.next() {
        executor = match operator {
            QueryOperator::Where(predicate) => {
                Box::new(FilterExecutor::new(executor, predicate.clone()))
            }
            QueryOperator::Select(selector) => {
                Box::new(ProjectionExecutor::new(executor, selector.clone()))
            }
            QueryOperator::OrderBy { key, descending } => {
                let mut criteria =
                    vec![SortCriteria::new(key.clone(), SortOrder::from(*descending))];
                while let Some(QueryOperator::ThenBy { key, descending }) = operators.peek() {
                    criteria.push(SortCriteria::new(key.clone(), SortOrder::from(*descending)));
                    operators.next();
                }
                Box::new(SortExecutor::new(executor, criteria))
            }
            QueryOperator::ThenBy { .. } => bail!("ThenBy must follow OrderBy"),
            QueryOperator::Skip(count) => {
                Box::new(LimitExecutor::with_offset(executor, None, row_count(count)?))
            }
            QueryOperator::Take(count) => {
                Box::new(LimitExecutor::new(executor, row_count(count)?))
            }
            QueryOperator::Distinct => Box::new(DistinctExecutor::new(executor)),
            QueryOperator::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                // the inner side may live behind any provider
                let provider = inner.root.provider();
                let inner_rows = provider.execute_query(inner)?;
                let inner_scan = StreamScanExecutor::new(inner_rows, inner.element_type.clone());
                Box::new(NestedLoopJoinExecutor::new(
                    executor,
                    Box::new(inner_scan),
                    outer_key.clone(),
                    inner_key.clone(),
                    result.clone(),
                ))
            }
        };
    }

    Ok(executor)
}

/// Skip/Take counts; negative counts behave as zero
fn row_count(count: &crate::expression::NativeExpression) -> Result<usize> {
    match evaluate_expression(count)? {
        Value::Int32(n) => Ok(usize::try_from(n).unwrap_or(0)),
        other => bail!("Row count must be Int32, got {}", other.kind_name()),
    }
}

/// Drives a pipeline as a row stream
struct PipelineRows {
    executor: Box<dyn Executor>,
    done: bool,
}

impl Iterator for PipelineRows {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.executor.next() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Query provider over a [`Catalog`]
pub struct MemoryProvider {
    name: String,
    catalog: Catalog,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>, catalog: Catalog) -> Self {
        Self {
            name: name.into(),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl QueryProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_query(&self, query: &NativeQuery) -> Result<RowStream> {
        debug!("Building pipeline for {}", query);
        let mut executor = build_pipeline(&self.catalog, query)?;
        executor.init()?;
        Ok(Box::new(PipelineRows {
            executor,
            done: false,
        }))
    }

    fn execute_scalar(&self, query: &NativeQuery, aggregate: &Aggregate) -> Result<Value> {
        debug!("Building pipeline for {}.{}", query, aggregate.name());
        let pipeline = build_pipeline(&self.catalog, query)?;
        let mut executor = AggregateExecutor::new(pipeline, aggregate.clone());
        executor.init()?;
        executor
            .next()?
            .ok_or_else(|| anyhow!("{} produced no value", aggregate.name()))
    }

    fn insert(&self, target: &NativeQuery, record: Record) -> Result<usize> {
        if !target.operators.is_empty() {
            bail!("Insert target must be a bare table, got {}", target);
        }
        for annotation in target.root.annotations() {
            debug!(
                "Insert into '{}' ignores annotation {}",
                target.root.source(),
                annotation
            );
        }
        self.catalog.insert(target.root.source(), record)
    }
}

/// An in-memory database: a catalog, its provider, and the registry of
/// record types its tables are declared with.
///
/// Implements [`DataContext`]; each record type maps to at most one table.
pub struct MemoryDatabase {
    catalog: Catalog,
    provider: Arc<MemoryProvider>,
    types: Arc<TypeRegistry>,
    tables: RwLock<HashMap<TypeDescriptor, String>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        let catalog = Catalog::new();
        Self {
            provider: Arc::new(MemoryProvider::new(name, catalog.clone())),
            catalog,
            types: Arc::new(TypeRegistry::new()),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn provider(&self) -> Arc<dyn QueryProvider> {
        self.provider.clone()
    }

    pub fn register_type(&self, record: RecordType) -> Result<Arc<RecordType>> {
        Ok(self.types.register(record)?)
    }

    /// Create the table backing `element_type`
    pub fn create_table(&self, name: &str, element_type: Arc<RecordType>) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(element_type.descriptor()) {
            bail!(
                "Type {} is already backed by table '{}'",
                element_type.descriptor(),
                existing
            );
        }
        self.catalog.create_table(name, element_type.clone())?;
        tables.insert(element_type.descriptor().clone(), name.to_string());
        debug!("Created table '{}' for {}", name, element_type.descriptor());
        Ok(())
    }

    /// Append rows given as member values in declaration order
    pub fn insert_rows(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<usize> {
        let element_type = self
            .catalog
            .element_type(table)
            .ok_or_else(|| anyhow!("Table '{}' not found", table))?;
        let mut inserted = 0;
        for values in rows {
            let record = Record::new(element_type.clone(), values)?;
            inserted += self.catalog.insert(table, record)?;
        }
        Ok(inserted)
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Value>> {
        self.catalog.snapshot(table)
    }
}

impl DataContext for MemoryDatabase {
    fn table(&self, ty: &RecordType) -> Option<QueryableRoot> {
        let tables = self.tables.read();
        let name = tables.get(ty.descriptor())?;
        let element_type = self.catalog.element_type(name)?;
        Some(QueryableRoot::new(element_type, name.clone(), self.provider()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::expression::{NativeExpression, NativeLambda, NativeParameter};
    use crate::types::{DataType, FieldDef};

    /// Executor that produces a fixed set of values
    pub struct MockExecutor {
        values: Vec<Value>,
        output_type: RuntimeType,
        current: usize,
        initialized: bool,
    }

    impl MockExecutor {
        pub fn new(values: Vec<Value>, output_type: RuntimeType) -> Self {
            Self {
                values,
                output_type,
                current: 0,
                initialized: false,
            }
        }

        pub fn ints(values: &[Option<i32>]) -> Self {
            Self::new(
                values
                    .iter()
                    .map(|v| v.map_or(Value::Null, Value::Int32))
                    .collect(),
                RuntimeType::Scalar(DataType::Int32),
            )
        }
    }

    impl Executor for MockExecutor {
        fn init(&mut self) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn next(&mut self) -> Result<Option<Value>> {
            if !self.initialized {
                bail!("Executor not initialized. Call init() first.");
            }
            let value = self.values.get(self.current).cloned();
            self.current += 1;
            Ok(value)
        }

        fn output_type(&self) -> &RuntimeType {
            &self.output_type
        }
    }

    pub fn drain(executor: &mut dyn Executor) -> Result<Vec<Value>> {
        executor.init()?;
        let mut values = Vec::new();
        while let Some(value) = executor.next()? {
            values.push(value);
        }
        Ok(values)
    }

    pub fn order_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![
                FieldDef::new("Id", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Amount", RuntimeType::Scalar(DataType::Int32)),
            ],
        ))
    }

    /// `x => body(x)` over Int32 values
    pub fn int_lambda(body: impl FnOnce(NativeExpression) -> NativeExpression) -> NativeLambda {
        let x = NativeParameter::new("x", RuntimeType::Scalar(DataType::Int32));
        NativeLambda::new(vec![x.clone()], body(NativeExpression::Parameter(x)))
    }

    pub fn int(n: i32) -> NativeExpression {
        NativeExpression::constant(Value::Int32(n), RuntimeType::Scalar(DataType::Int32))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::order_type;
    use super::*;
    use crate::expression::{BinaryOperator, NativeExpression, NativeLambda, NativeParameter};
    use crate::types::DataType;

    fn database() -> Result<MemoryDatabase> {
        let db = MemoryDatabase::new("memory");
        let order = db.register_type((*order_type()).clone())?;
        db.create_table("Orders", order)?;
        db.insert_rows(
            "Orders",
            vec![
                vec![Value::Int32(1), Value::Int32(50)],
                vec![Value::Int32(2), Value::Int32(150)],
                vec![Value::Int32(3), Value::Int32(200)],
            ],
        )?;
        Ok(db)
    }

    fn amount_over(threshold: i32) -> NativeLambda {
        let ty = RuntimeType::Record(order_type());
        let o = NativeParameter::new("o", ty.clone());
        NativeLambda::new(
            vec![o.clone()],
            NativeExpression::binary(
                BinaryOperator::Gt,
                NativeExpression::Member {
                    target: Box::new(NativeExpression::Parameter(o)),
                    index: 1,
                    name: "Amount".to_string(),
                    ty: RuntimeType::Scalar(DataType::Int32),
                },
                NativeExpression::constant(
                    Value::Int32(threshold),
                    RuntimeType::Scalar(DataType::Int32),
                ),
            ),
        )
    }

    #[test]
    fn test_filtered_pipeline_streams_matching_rows() -> Result<()> {
        let db = database()?;
        let root = db
            .table(&order_type())
            .ok_or_else(|| anyhow!("no table"))?;
        let element_type = RuntimeType::Record(order_type());
        let query = NativeQuery::new(root)
            .compose(QueryOperator::Where(amount_over(100)), element_type);

        let rows: Vec<Value> = db
            .provider()
            .execute_query(&query)?
            .collect::<Result<_>>()?;
        assert_eq!(rows.len(), 2);
        match &rows[0] {
            Value::Record(record) => assert_eq!(record.get("Id"), Some(&Value::Int32(2))),
            other => bail!("unexpected row {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_insert_checks_element_type() -> Result<()> {
        let db = database()?;
        let other = Arc::new(RecordType::new(TypeDescriptor::named("shop.Customer"), vec![]));
        let record = Record::new(other, vec![])?;
        assert!(db.catalog().insert("Orders", record).is_err());

        let record = Record::new(order_type(), vec![Value::Int32(4), Value::Int32(10)])?;
        let root = db.table(&order_type()).ok_or_else(|| anyhow!("no table"))?;
        assert_eq!(db.provider().insert(&NativeQuery::new(root), record)?, 1);
        assert_eq!(db.rows("Orders")?.len(), 4);
        Ok(())
    }

    #[test]
    fn test_one_table_per_type() -> Result<()> {
        let db = database()?;
        assert!(db.create_table("MoreOrders", order_type()).is_err());
        assert_eq!(db.catalog().table_names(), vec!["Orders".to_string()]);
        Ok(())
    }
}
