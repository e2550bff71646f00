//! Scan executors.
//!
//! [`SeqScanExecutor`] reads every row of a catalog table. It snapshots the
//! table on `init()` and then yields rows in insertion order.
//! [`StreamScanExecutor`] adapts a row stream from any provider.

use crate::engine::{Catalog, Executor};
use crate::provider::RowStream;
use crate::source::QueryAnnotation;
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};
use log::debug;

/// Sequential scan over a catalog table
pub struct SeqScanExecutor {
    /// Catalog holding the table
    catalog: Catalog,
    /// Name of the table to scan
    table: String,
    /// Record type of the rows
    output_type: RuntimeType,
    /// Markers attached to the query root
    annotations: Vec<QueryAnnotation>,
    /// Rows captured at init
    rows: Vec<Value>,
    /// Position of the next row
    position: usize,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl SeqScanExecutor {
    pub fn new(
        catalog: Catalog,
        table: impl Into<String>,
        output_type: RuntimeType,
        annotations: Vec<QueryAnnotation>,
    ) -> Self {
        Self {
            catalog,
            table: table.into(),
            output_type,
            annotations,
            rows: Vec::new(),
            position: 0,
            initialized: false,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        // rows are held whole in memory: eager loading and table hints
        // have nothing to change here
        for annotation in &self.annotations {
            debug!("Scan of '{}' ignores annotation {}", self.table, annotation);
        }

        self.rows = self.catalog.snapshot(&self.table)?;
        self.position = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    fn output_type(&self) -> &RuntimeType {
        &self.output_type
    }
}

/// Scan over rows produced by a provider
pub struct StreamScanExecutor {
    /// Rows still to be read
    rows: RowStream,
    /// Type of the streamed values
    output_type: RuntimeType,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl StreamScanExecutor {
    pub fn new(rows: RowStream, output_type: RuntimeType) -> Self {
        Self {
            rows,
            output_type,
            initialized: false,
        }
    }
}

impl Executor for StreamScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        self.rows.next().transpose()
    }

    fn output_type(&self) -> &RuntimeType {
        &self.output_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{drain, order_type};
    use crate::value::Record;

    #[test]
    fn test_seq_scan_reads_snapshot() -> Result<()> {
        let catalog = Catalog::new();
        catalog.create_table("Orders", order_type())?;
        catalog.insert(
            "Orders",
            Record::new(order_type(), vec![Value::Int32(1), Value::Int32(10)])?,
        )?;

        let mut scan = SeqScanExecutor::new(
            catalog.clone(),
            "Orders",
            RuntimeType::Record(order_type()),
            vec![QueryAnnotation::TableHint("NOLOCK".to_string())],
        );
        scan.init()?;

        // rows inserted after init are not visible to this scan
        catalog.insert(
            "Orders",
            Record::new(order_type(), vec![Value::Int32(2), Value::Int32(20)])?,
        )?;
        assert!(scan.next()?.is_some());
        assert!(scan.next()?.is_none());
        Ok(())
    }

    #[test]
    fn test_seq_scan_requires_init() {
        let mut scan = SeqScanExecutor::new(
            Catalog::new(),
            "Orders",
            RuntimeType::Record(order_type()),
            vec![],
        );
        assert!(scan.next().is_err());
    }

    #[test]
    fn test_missing_table() {
        let mut scan =
            SeqScanExecutor::new(Catalog::new(), "Nope", RuntimeType::Any, vec![]);
        assert!(scan.init().is_err());
    }

    #[test]
    fn test_stream_scan() -> Result<()> {
        let rows: RowStream = Box::new(vec![Ok(Value::Int32(1)), Ok(Value::Int32(2))].into_iter());
        let mut scan = StreamScanExecutor::new(rows, RuntimeType::Any);
        assert_eq!(drain(&mut scan)?, vec![Value::Int32(1), Value::Int32(2)]);
        Ok(())
    }
}
