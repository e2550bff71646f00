//! Backing provider capability.

use crate::expression::{Aggregate, NativeQuery};
use crate::value::{Record, Value};

/// Rows emitted by a provider, in its own order
pub type RowStream = Box<dyn Iterator<Item = anyhow::Result<Value>> + Send>;

/// The external query engine that executes translated queries.
///
/// Providers receive fully translated queries: every locally evaluable part
/// has already been folded to a constant, and root annotations carry any
/// provider-specific directives.
pub trait QueryProvider: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Execute a sequence query. Whether rows are produced lazily is up to
    /// the provider.
    fn execute_query(&self, query: &NativeQuery) -> anyhow::Result<RowStream>;

    /// Reduce a query to a single value
    fn execute_scalar(&self, query: &NativeQuery, aggregate: &Aggregate) -> anyhow::Result<Value>;

    /// Insert one record into the target's source, returning the affected row count
    fn insert(&self, target: &NativeQuery, record: Record) -> anyhow::Result<usize>;
}
