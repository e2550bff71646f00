//! Operator definitions for expressions.

use crate::types::{DataType, RuntimeType};
use serde::{Deserialize, Serialize};

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical (short-circuiting)
    And,
    Or,

    // Null handling
    Coalesce,

    // String
    Concat,
}

impl BinaryOperator {
    /// Get the output type of this operator given input types
    pub fn output_type(&self, left: &RuntimeType, right: &RuntimeType) -> Option<RuntimeType> {
        match self {
            BinaryOperator::Add
            | BinaryOperator::Sub
            | BinaryOperator::Mul
            | BinaryOperator::Div
            | BinaryOperator::Mod => {
                if *self == BinaryOperator::Add && is_string(left) && is_string(right) {
                    return Some(RuntimeType::Scalar(DataType::Varchar));
                }
                promote(left, right)
            }

            BinaryOperator::Eq | BinaryOperator::Ne => {
                if comparable(left, right) || left.accepts(right) {
                    Some(RuntimeType::Scalar(DataType::Boolean))
                } else {
                    None
                }
            }

            BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
                if comparable(left, right) {
                    Some(RuntimeType::Scalar(DataType::Boolean))
                } else {
                    None
                }
            }

            BinaryOperator::And | BinaryOperator::Or => {
                if is_boolean(left) && is_boolean(right) {
                    Some(RuntimeType::Scalar(DataType::Boolean))
                } else {
                    None
                }
            }

            BinaryOperator::Coalesce => {
                if !left.accepts(right) {
                    None
                } else if *left == RuntimeType::Any {
                    Some(right.clone())
                } else {
                    Some(left.clone())
                }
            }

            BinaryOperator::Concat => {
                if is_string(left) && is_string(right) {
                    Some(RuntimeType::Scalar(DataType::Varchar))
                } else {
                    None
                }
            }
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Coalesce => "??",
            BinaryOperator::Concat => "++",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
}

impl UnaryOperator {
    /// Get the output type of this operator given input type
    pub fn output_type(&self, operand: &RuntimeType) -> Option<RuntimeType> {
        match self {
            UnaryOperator::Not => {
                is_boolean(operand).then(|| RuntimeType::Scalar(DataType::Boolean))
            }
            UnaryOperator::Negate | UnaryOperator::Plus => match operand {
                RuntimeType::Any => Some(RuntimeType::Any),
                RuntimeType::Scalar(t) if t.is_numeric() => Some(operand.clone()),
                _ => None,
            },
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "!",
            UnaryOperator::Negate => "-",
            UnaryOperator::Plus => "+",
        }
    }
}

fn is_boolean(ty: &RuntimeType) -> bool {
    matches!(ty, RuntimeType::Any | RuntimeType::Scalar(DataType::Boolean))
}

fn is_string(ty: &RuntimeType) -> bool {
    matches!(ty, RuntimeType::Any | RuntimeType::Scalar(DataType::Varchar))
}

/// Numeric promotion: the wider of two numeric types
fn promote(left: &RuntimeType, right: &RuntimeType) -> Option<RuntimeType> {
    match (left, right) {
        (RuntimeType::Any, RuntimeType::Any) => Some(RuntimeType::Any),
        (RuntimeType::Any, other) | (other, RuntimeType::Any) => {
            other.is_numeric().then(|| other.clone())
        }
        (RuntimeType::Scalar(a), RuntimeType::Scalar(b)) => {
            let widest = if a.numeric_rank()? >= b.numeric_rank()? {
                *a
            } else {
                *b
            };
            Some(RuntimeType::Scalar(widest))
        }
        _ => None,
    }
}

/// Types that can be ordered against each other
fn comparable(left: &RuntimeType, right: &RuntimeType) -> bool {
    match (left, right) {
        (RuntimeType::Any, RuntimeType::Any) => true,
        (RuntimeType::Any, RuntimeType::Scalar(_)) | (RuntimeType::Scalar(_), RuntimeType::Any) => {
            true
        }
        (RuntimeType::Scalar(a), RuntimeType::Scalar(b)) => {
            a == b || (a.is_numeric() && b.is_numeric())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT32: RuntimeType = RuntimeType::Scalar(DataType::Int32);
    const INT64: RuntimeType = RuntimeType::Scalar(DataType::Int64);
    const FLOAT64: RuntimeType = RuntimeType::Scalar(DataType::Float64);
    const STRING: RuntimeType = RuntimeType::Scalar(DataType::Varchar);
    const BOOLEAN: RuntimeType = RuntimeType::Scalar(DataType::Boolean);

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(BinaryOperator::Add.output_type(&INT32, &INT32), Some(INT32));
        assert_eq!(BinaryOperator::Mul.output_type(&INT32, &INT64), Some(INT64));
        assert_eq!(BinaryOperator::Div.output_type(&INT64, &FLOAT64), Some(FLOAT64));
        assert_eq!(BinaryOperator::Add.output_type(&STRING, &STRING), Some(STRING));
        assert_eq!(BinaryOperator::Sub.output_type(&STRING, &STRING), None);
        assert_eq!(BinaryOperator::Add.output_type(&INT32, &BOOLEAN), None);
    }

    #[test]
    fn test_comparison_types() {
        assert_eq!(BinaryOperator::Gt.output_type(&INT32, &FLOAT64), Some(BOOLEAN));
        assert_eq!(BinaryOperator::Lt.output_type(&STRING, &STRING), Some(BOOLEAN));
        assert_eq!(BinaryOperator::Lt.output_type(&STRING, &INT32), None);
        assert_eq!(
            BinaryOperator::Eq.output_type(&STRING, &RuntimeType::Any),
            Some(BOOLEAN)
        );
    }

    #[test]
    fn test_logical_and_unary() {
        assert_eq!(BinaryOperator::And.output_type(&BOOLEAN, &BOOLEAN), Some(BOOLEAN));
        assert_eq!(BinaryOperator::Or.output_type(&BOOLEAN, &INT32), None);
        assert_eq!(UnaryOperator::Not.output_type(&BOOLEAN), Some(BOOLEAN));
        assert_eq!(UnaryOperator::Negate.output_type(&INT64), Some(INT64));
        assert_eq!(UnaryOperator::Negate.output_type(&STRING), None);
        assert_eq!(
            BinaryOperator::Coalesce.output_type(&RuntimeType::Any, &STRING),
            Some(STRING)
        );
    }
}
