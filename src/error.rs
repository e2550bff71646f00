//! Pipeline error types.
//!
//! Every stage of the bridge (type resolution, source resolution, translation,
//! local evaluation, provider execution, result mapping) reports failures
//! through [`QueryError`]. Nothing is recovered internally; the first error
//! aborts the call.

use crate::expression::ExpressionError;
use crate::types::TypeDescriptor;
use std::fmt;
use thiserror::Error;

/// Errors raised while translating, executing or mapping a portable query.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Cannot resolve type {descriptor}: {reason}")]
    TypeResolution {
        descriptor: TypeDescriptor,
        reason: String,
    },

    #[error("No queryable source for type {descriptor}: {reason}")]
    SourceResolution {
        descriptor: TypeDescriptor,
        reason: String,
    },

    #[error("Unsupported expression node: {node}")]
    UnsupportedExpression { node: String },

    #[error("Invalid expression {node}: {reason}")]
    InvalidExpression { node: String, reason: String },

    #[error("Local evaluation of {expression} failed: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Provider '{provider}' failed: {source}")]
    Execution {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cannot map member {path}: {reason}")]
    Mapping { path: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Query execution was cancelled")]
    Cancelled,
}

impl QueryError {
    pub(crate) fn invalid(node: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidExpression {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(node: impl Into<String>) -> Self {
        QueryError::UnsupportedExpression { node: node.into() }
    }

    /// Wrap a local evaluation failure. A nested query that failed in its
    /// provider is reported as an execution failure with the provider's cause.
    pub(crate) fn evaluation(expression: impl fmt::Display, source: ExpressionError) -> Self {
        match source {
            ExpressionError::QueryFailed { provider, source } => {
                QueryError::execution(provider, source)
            }
            source => QueryError::Evaluation {
                expression: expression.to_string(),
                source,
            },
        }
    }

    pub(crate) fn execution(provider: impl Into<String>, source: anyhow::Error) -> Self {
        QueryError::Execution {
            provider: provider.into(),
            source,
        }
    }
}

/// Result type for pipeline operations.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::TypeResolution {
            descriptor: TypeDescriptor::named("shop.Missing"),
            reason: "type is not registered".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve type shop.Missing: type is not registered"
        );

        let err = QueryError::unsupported("Call(Zip)");
        assert_eq!(err.to_string(), "Unsupported expression node: Call(Zip)");

        let err = QueryError::Mapping {
            path: "$[2].Handle".to_string(),
            reason: "opaque provider handle".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot map member $[2].Handle: opaque provider handle"
        );

        let err = QueryError::execution("memory", anyhow::anyhow!("table vanished"));
        assert_eq!(err.to_string(), "Provider 'memory' failed: table vanished");
    }

    #[test]
    fn test_nested_query_failure_is_an_execution_error() {
        let err = QueryError::evaluation(
            "(Count() + 1)",
            ExpressionError::QueryFailed {
                provider: "memory".to_string(),
                source: anyhow::anyhow!("table vanished"),
            },
        );
        match err {
            QueryError::Execution { provider, source } => {
                assert_eq!(provider, "memory");
                assert_eq!(source.to_string(), "table vanished");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = QueryError::evaluation("(1 / 0)", ExpressionError::DivisionByZero);
        assert!(matches!(
            err,
            QueryError::Evaluation { expression, .. } if expression == "(1 / 0)"
        ));
    }

    #[test]
    fn test_evaluation_error_keeps_cause() {
        use std::error::Error as _;

        let err = QueryError::Evaluation {
            expression: "(1 / 0)".to_string(),
            source: ExpressionError::DivisionByZero,
        };
        assert_eq!(
            err.source().map(|cause| cause.to_string()),
            Some("Division by zero".to_string())
        );
    }
}
