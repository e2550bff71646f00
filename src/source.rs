//! Queryable sources.
//!
//! A [`QueryableRoot`] binds one entity type to one backing data source.
//! The [`SourceResolver`] finds the root for a type, either through a bound
//! [`DataContext`] or through a caller-supplied factory.

use crate::error::{QueryError, QueryResult};
use crate::provider::QueryProvider;
use crate::types::{RecordType, RuntimeType};
use std::fmt;
use std::sync::Arc;

/// Provider-specific directive attached to a root.
///
/// The core never interprets annotations; each provider decides whether and
/// how to honor them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnnotation {
    /// Eager-load the member at this path
    LoadWith(Vec<String>),
    /// Raw table-source override; `{0}` is the table name, `{1}` the alias
    TableExpression(String),
    /// Free-text table hint
    TableHint(String),
}

impl fmt::Display for QueryAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryAnnotation::LoadWith(path) => write!(f, "LoadWith({})", path.join(".")),
            QueryAnnotation::TableExpression(sql) => write!(f, "TableExpression({})", sql),
            QueryAnnotation::TableHint(hint) => write!(f, "TableHint({})", hint),
        }
    }
}

/// A composable query handle bound to one entity type and one data source
#[derive(Clone)]
pub struct QueryableRoot {
    element_type: Arc<RecordType>,
    source: String,
    provider: Arc<dyn QueryProvider>,
    annotations: Vec<QueryAnnotation>,
}

impl QueryableRoot {
    pub fn new(
        element_type: Arc<RecordType>,
        source: impl Into<String>,
        provider: Arc<dyn QueryProvider>,
    ) -> Self {
        Self {
            element_type,
            source: source.into(),
            provider,
            annotations: Vec::new(),
        }
    }

    pub fn element_type(&self) -> &Arc<RecordType> {
        &self.element_type
    }

    /// Name of the underlying set (table, collection)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    pub fn annotations(&self) -> &[QueryAnnotation] {
        &self.annotations
    }

    pub fn with_annotation(mut self, annotation: QueryAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub(crate) fn annotate(&mut self, annotation: QueryAnnotation) {
        self.annotations.push(annotation);
    }

    /// Whether both roots draw from the same underlying set
    pub fn same_source(&self, other: &QueryableRoot) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.provider), Arc::as_ptr(&other.provider))
            && self.source == other.source
            && self.element_type.descriptor() == other.element_type.descriptor()
    }
}

impl PartialEq for QueryableRoot {
    fn eq(&self, other: &Self) -> bool {
        self.same_source(other) && self.annotations == other.annotations
    }
}

impl fmt::Debug for QueryableRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryableRoot")
            .field("element_type", self.element_type.descriptor())
            .field("source", &self.source)
            .field("provider", &self.provider.name())
            .field("annotations", &self.annotations)
            .finish()
    }
}

/// A bound data-access context exposing one accessor per entity type
pub trait DataContext: Send + Sync {
    fn table(&self, ty: &RecordType) -> Option<QueryableRoot>;
}

/// Caller-supplied mapping from entity type to root
pub type QueryableFactory = Arc<dyn Fn(&RecordType) -> Option<QueryableRoot> + Send + Sync>;

/// Strategy for finding the root of an entity type
#[derive(Clone)]
pub enum SourceResolver {
    Context(Arc<dyn DataContext>),
    Factory(QueryableFactory),
}

impl SourceResolver {
    pub fn context(context: Arc<dyn DataContext>) -> Self {
        SourceResolver::Context(context)
    }

    pub fn factory(
        factory: impl Fn(&RecordType) -> Option<QueryableRoot> + Send + Sync + 'static,
    ) -> Self {
        SourceResolver::Factory(Arc::new(factory))
    }

    /// Find the root for an entity type
    pub fn resolve(&self, ty: &RuntimeType) -> QueryResult<QueryableRoot> {
        let record = ty.as_record().ok_or_else(|| QueryError::SourceResolution {
            descriptor: ty.descriptor(),
            reason: "only record types have queryable sources".to_string(),
        })?;

        let root = match self {
            SourceResolver::Context(context) => context.table(record),
            SourceResolver::Factory(factory) => factory(record),
        }
        .ok_or_else(|| QueryError::SourceResolution {
            descriptor: record.descriptor().clone(),
            reason: match self {
                SourceResolver::Context(_) => "the data context has no table for this type",
                SourceResolver::Factory(_) => "the queryable factory returned no root",
            }
            .to_string(),
        })?;

        if root.element_type().descriptor() != record.descriptor() {
            return Err(QueryError::SourceResolution {
                descriptor: record.descriptor().clone(),
                reason: format!(
                    "resolved root is bound to {}",
                    root.element_type().descriptor()
                ),
            });
        }

        Ok(root)
    }
}

impl fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceResolver::Context(_) => write!(f, "SourceResolver::Context"),
            SourceResolver::Factory(_) => write!(f, "SourceResolver::Factory"),
        }
    }
}
