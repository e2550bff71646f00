//! Error types for local expression evaluation.

use std::fmt;

/// Errors that can occur while evaluating a native expression
#[derive(Debug)]
pub enum ExpressionError {
    /// Type mismatch in operation
    TypeMismatch {
        expected: String,
        actual: String,
        context: String,
    },

    /// Invalid operand types for operator
    InvalidOperandTypes {
        operator: String,
        left_type: Option<String>,
        right_type: Option<String>,
    },

    /// Member index out of bounds for a record
    MemberIndexOutOfBounds { index: usize, member_count: usize },

    /// Division by zero
    DivisionByZero,

    /// NULL value in non-nullable context
    UnexpectedNull { context: String },

    /// Parameter not bound in the current scope
    UnboundParameter { name: String },

    /// Wrong number of lambda arguments
    ArgumentCount { expected: usize, actual: usize },

    /// Node kind that has no value of its own (lambdas, query sources without a runner)
    NotEvaluable { node: String },

    /// Nested query failed in its backing provider
    QueryFailed {
        provider: String,
        source: anyhow::Error,
    },

    /// Generic evaluation error
    EvaluationError { message: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionError::TypeMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Type mismatch in {}: expected {}, got {}",
                    context, expected, actual
                )
            }

            ExpressionError::InvalidOperandTypes {
                operator,
                left_type,
                right_type,
            } => {
                write!(
                    f,
                    "Invalid operand types for operator {}: left={:?}, right={:?}",
                    operator, left_type, right_type
                )
            }

            ExpressionError::MemberIndexOutOfBounds {
                index,
                member_count,
            } => {
                write!(
                    f,
                    "Member index {} out of bounds for record with {} members",
                    index, member_count
                )
            }

            ExpressionError::DivisionByZero => write!(f, "Division by zero"),

            ExpressionError::UnexpectedNull { context } => {
                write!(f, "Unexpected NULL value in {}", context)
            }

            ExpressionError::UnboundParameter { name } => {
                write!(f, "Parameter '{}' is not bound", name)
            }

            ExpressionError::ArgumentCount { expected, actual } => {
                write!(f, "Lambda expects {} arguments, got {}", expected, actual)
            }

            ExpressionError::NotEvaluable { node } => {
                write!(f, "{} cannot be evaluated to a value", node)
            }

            ExpressionError::QueryFailed { provider, source } => {
                write!(f, "Nested query on provider '{}' failed: {:#}", provider, source)
            }

            ExpressionError::EvaluationError { message } => {
                write!(f, "Expression evaluation error: {}", message)
            }
        }
    }
}

impl std::error::Error for ExpressionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExpressionError::QueryFailed { source, .. } => {
                let cause: &(dyn std::error::Error + 'static) = &**source;
                Some(cause)
            }
            _ => None,
        }
    }
}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExpressionError::TypeMismatch {
            expected: "core.Int32".to_string(),
            actual: "String".to_string(),
            context: "conversion".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch in conversion: expected core.Int32, got String"
        );

        let err = ExpressionError::InvalidOperandTypes {
            operator: "+".to_string(),
            left_type: Some("Int32".to_string()),
            right_type: Some("Boolean".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Invalid operand types for operator +: left=Some(\"Int32\"), right=Some(\"Boolean\")"
        );

        let err = ExpressionError::MemberIndexOutOfBounds {
            index: 5,
            member_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Member index 5 out of bounds for record with 3 members"
        );

        assert_eq!(ExpressionError::DivisionByZero.to_string(), "Division by zero");

        let err = ExpressionError::UnboundParameter {
            name: "o".to_string(),
        };
        assert_eq!(err.to_string(), "Parameter 'o' is not bound");
    }
}
