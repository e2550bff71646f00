//! Expression trees on both sides of the bridge.
//!
//! This module provides:
//! - The serializable portable tree callers build
//! - The resolved native tree handed to providers
//! - Operators shared by both
//! - Local evaluation of native expressions

pub mod error;
pub mod eval;
pub mod native;
pub mod operator;
pub mod portable;

pub use error::{ExpressionError, ExpressionResult};
pub use eval::{convert_value, evaluate_expression, ExpressionEvaluator, Scope};
pub use native::{
    Aggregate, Function, NativeExpression, NativeLambda, NativeParameter, NativeQuery,
    QueryOperator,
};
pub use operator::{BinaryOperator, UnaryOperator};
pub use portable::{MemberInit, ParameterDecl, PortableExpression};
