//! Local evaluation of native expressions.
//!
//! Lambda parameters are resolved through a chain of [`Scope`]s. Nested
//! queries are bound against the current scope and handed to the provider
//! owning their root.

use crate::expression::native::{NativeExpression, NativeLambda};
use crate::expression::{BinaryOperator, ExpressionError, ExpressionResult, Function, UnaryOperator};
use crate::types::{DataType, RuntimeType};
use crate::value::{Record, Value};

/// Parameter bindings visible to an expression
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'s> {
    bindings: &'s [(&'s str, &'s Value)],
    parent: Option<&'s Scope<'s>>,
}

impl<'s> Scope<'s> {
    /// Empty scope
    pub fn root() -> Scope<'static> {
        Scope {
            bindings: &[],
            parent: None,
        }
    }

    pub fn new(bindings: &'s [(&'s str, &'s Value)]) -> Self {
        Self {
            bindings,
            parent: None,
        }
    }

    /// Child scope; inner bindings shadow outer ones
    pub fn with<'t>(&'t self, bindings: &'t [(&'t str, &'t Value)]) -> Scope<'t> {
        Scope {
            bindings,
            parent: Some(self),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&'s Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .or_else(|| self.parent.and_then(|p| p.lookup(name)))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.parent.map_or(true, |p| p.is_empty())
    }
}

/// Evaluator for native expressions
pub struct ExpressionEvaluator<'a> {
    scope: Scope<'a>,
}

impl ExpressionEvaluator<'static> {
    /// Evaluator with no parameters in scope
    pub fn new() -> Self {
        Self {
            scope: Scope::root(),
        }
    }
}

impl Default for ExpressionEvaluator<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn with_scope(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Evaluate an expression and return the result
    pub fn evaluate(&self, expr: &NativeExpression) -> ExpressionResult<Value> {
        evaluate_in(expr, &self.scope)
    }

    /// Apply a lambda to arguments
    pub fn invoke(&self, lambda: &NativeLambda, arguments: &[Value]) -> ExpressionResult<Value> {
        invoke_in(lambda, arguments, &self.scope)
    }

    /// Apply a predicate lambda; null counts as false
    pub fn test(&self, lambda: &NativeLambda, arguments: &[Value]) -> ExpressionResult<bool> {
        match self.invoke(lambda, arguments)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ExpressionError::TypeMismatch {
                expected: "Boolean".to_string(),
                actual: other.kind_name().to_string(),
                context: "predicate".to_string(),
            }),
        }
    }
}

/// Helper function to evaluate a closed expression
pub fn evaluate_expression(expr: &NativeExpression) -> ExpressionResult<Value> {
    ExpressionEvaluator::new().evaluate(expr)
}

fn invoke_in(
    lambda: &NativeLambda,
    arguments: &[Value],
    scope: &Scope<'_>,
) -> ExpressionResult<Value> {
    if lambda.parameters.len() != arguments.len() {
        return Err(ExpressionError::ArgumentCount {
            expected: lambda.parameters.len(),
            actual: arguments.len(),
        });
    }

    let bindings: Vec<(&str, &Value)> = lambda
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .zip(arguments.iter())
        .collect();
    evaluate_in(&lambda.body, &scope.with(&bindings))
}

fn evaluate_in(expr: &NativeExpression, scope: &Scope<'_>) -> ExpressionResult<Value> {
    match expr {
        NativeExpression::Constant { value, .. } => Ok(value.clone()),

        NativeExpression::Parameter(p) => {
            scope
                .lookup(&p.name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnboundParameter {
                    name: p.name.clone(),
                })
        }

        NativeExpression::Member {
            target,
            index,
            name,
            ..
        } => match evaluate_in(target, scope)? {
            Value::Record(record) => {
                record
                    .value(*index)
                    .cloned()
                    .ok_or(ExpressionError::MemberIndexOutOfBounds {
                        index: *index,
                        member_count: record.values().len(),
                    })
            }
            Value::Null => Err(ExpressionError::UnexpectedNull {
                context: format!("access of member '{}'", name),
            }),
            other => Err(ExpressionError::TypeMismatch {
                expected: "Record".to_string(),
                actual: other.kind_name().to_string(),
                context: format!("access of member '{}'", name),
            }),
        },

        NativeExpression::Binary { op, left, right } => match op {
            BinaryOperator::And | BinaryOperator::Or => {
                evaluate_logical(*op, left, right, scope)
            }
            BinaryOperator::Coalesce => match evaluate_in(left, scope)? {
                Value::Null => evaluate_in(right, scope),
                value => Ok(value),
            },
            _ => {
                let left_val = evaluate_in(left, scope)?;
                let right_val = evaluate_in(right, scope)?;
                evaluate_binary_op(*op, left_val, right_val)
            }
        },

        NativeExpression::Unary { op, operand } => {
            let operand_val = evaluate_in(operand, scope)?;
            evaluate_unary_op(*op, operand_val)
        }

        NativeExpression::Conditional {
            test,
            if_true,
            if_false,
        } => match evaluate_in(test, scope)? {
            Value::Boolean(true) => evaluate_in(if_true, scope),
            Value::Boolean(false) | Value::Null => evaluate_in(if_false, scope),
            other => Err(ExpressionError::TypeMismatch {
                expected: "Boolean".to_string(),
                actual: other.kind_name().to_string(),
                context: "conditional test".to_string(),
            }),
        },

        NativeExpression::Convert { operand, ty } => {
            let value = evaluate_in(operand, scope)?;
            convert_value(value, ty)
        }

        NativeExpression::Lambda(_) => Err(ExpressionError::NotEvaluable {
            node: "Lambda".to_string(),
        }),

        NativeExpression::New { ty, arguments } => {
            let values = arguments
                .iter()
                .map(|a| evaluate_in(a, scope))
                .collect::<ExpressionResult<Vec<_>>>()?;
            Record::new(ty.clone(), values)
                .map(Value::Record)
                .map_err(|e| ExpressionError::EvaluationError {
                    message: e.to_string(),
                })
        }

        NativeExpression::NewSequence { elements, .. } => elements
            .iter()
            .map(|e| evaluate_in(e, scope))
            .collect::<ExpressionResult<Vec<_>>>()
            .map(Value::Sequence),

        NativeExpression::Call {
            function,
            target,
            arguments,
        } => {
            let target_val = evaluate_in(target, scope)?;
            let argument_vals = arguments
                .iter()
                .map(|a| evaluate_in(a, scope))
                .collect::<ExpressionResult<Vec<_>>>()?;
            evaluate_function(*function, target_val, &argument_vals)
        }

        NativeExpression::Query(query) => {
            let bound = query.bind(scope);
            let provider = bound.root.provider();
            let rows = provider
                .execute_query(&bound)
                .and_then(|rows| rows.collect::<anyhow::Result<Vec<_>>>())
                .map_err(|source| ExpressionError::QueryFailed {
                    provider: provider.name().to_string(),
                    source,
                })?;
            Ok(Value::Sequence(rows))
        }

        NativeExpression::Aggregate { source, aggregate } => match expr.bind(scope) {
            NativeExpression::Aggregate {
                source: bound,
                aggregate: bound_aggregate,
            } => {
                let provider = bound.root.provider();
                provider
                    .execute_scalar(&bound, &bound_aggregate)
                    .map_err(|source| ExpressionError::QueryFailed {
                        provider: provider.name().to_string(),
                        source,
                    })
            }
            _ => Err(ExpressionError::EvaluationError {
                message: format!("{}.{} lost its shape when bound", source, aggregate.name()),
            }),
        },

        NativeExpression::Insert { .. } => Err(ExpressionError::NotEvaluable {
            node: "Insert".to_string(),
        }),
    }
}

/// Short-circuiting three-valued AND/OR
fn evaluate_logical(
    op: BinaryOperator,
    left: &NativeExpression,
    right: &NativeExpression,
    scope: &Scope<'_>,
) -> ExpressionResult<Value> {
    let as_logical = |value: Value| match value {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(ExpressionError::InvalidOperandTypes {
            operator: op.as_str().to_string(),
            left_type: Some(other.kind_name().to_string()),
            right_type: None,
        }),
    };

    let short_circuit = op == BinaryOperator::Or;
    let left_val = as_logical(evaluate_in(left, scope)?)?;
    if left_val == Some(short_circuit) {
        return Ok(Value::Boolean(short_circuit));
    }

    let right_val = as_logical(evaluate_in(right, scope)?)?;
    Ok(match (left_val, right_val) {
        (_, Some(b)) if b == short_circuit => Value::Boolean(short_circuit),
        (Some(_), Some(_)) => Value::Boolean(!short_circuit),
        _ => Value::Null,
    })
}

fn invalid_operands(op: BinaryOperator, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: op.as_str().to_string(),
        left_type: Some(left.kind_name().to_string()),
        right_type: Some(right.kind_name().to_string()),
    }
}

/// Evaluate a binary operation
fn evaluate_binary_op(op: BinaryOperator, left: Value, right: Value) -> ExpressionResult<Value> {
    match op {
        BinaryOperator::Eq => Ok(Value::Boolean(left.equals(&right))),
        BinaryOperator::Ne => Ok(Value::Boolean(!left.equals(&right))),

        BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
            // ordering against null is never satisfied
            if left.is_null() || right.is_null() {
                return Ok(Value::Boolean(false));
            }
            let ordering = left
                .compare(&right)
                .ok_or_else(|| invalid_operands(op, &left, &right))?;
            Ok(Value::Boolean(match op {
                BinaryOperator::Lt => ordering.is_lt(),
                BinaryOperator::Le => ordering.is_le(),
                BinaryOperator::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        BinaryOperator::Concat => {
            let text = |value: &Value| match value {
                Value::Null => Some(String::new()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            };
            match (text(&left), text(&right)) {
                (Some(a), Some(b)) => Ok(Value::String(a + &b)),
                _ => Err(invalid_operands(op, &left, &right)),
            }
        }

        BinaryOperator::Add
        | BinaryOperator::Sub
        | BinaryOperator::Mul
        | BinaryOperator::Div
        | BinaryOperator::Mod => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            evaluate_arithmetic(op, &left, &right)
        }

        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Coalesce => {
            Err(ExpressionError::EvaluationError {
                message: format!("operator {} must be evaluated lazily", op.as_str()),
            })
        }
    }
}

fn evaluate_arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) if op == BinaryOperator::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }

        (Value::Int32(a), Value::Int32(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOperator::Add => Ok(Value::Int32(a.wrapping_add(b))),
                BinaryOperator::Sub => Ok(Value::Int32(a.wrapping_sub(b))),
                BinaryOperator::Mul => Ok(Value::Int32(a.wrapping_mul(b))),
                BinaryOperator::Div if b == 0 => Err(ExpressionError::DivisionByZero),
                BinaryOperator::Div => Ok(Value::Int32(a.wrapping_div(b))),
                BinaryOperator::Mod if b == 0 => Err(ExpressionError::DivisionByZero),
                _ => Ok(Value::Int32(a.wrapping_rem(b))),
            }
        }

        (Value::Float64(_), _) | (_, Value::Float64(_)) => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid_operands(op, left, right)),
            };
            Ok(Value::Float64(match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b,
                BinaryOperator::Div => a / b,
                _ => a % b,
            }))
        }

        _ => {
            let (a, b) = match (left.as_i64(), right.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(invalid_operands(op, left, right)),
            };
            match op {
                BinaryOperator::Add => Ok(Value::Int64(a.wrapping_add(b))),
                BinaryOperator::Sub => Ok(Value::Int64(a.wrapping_sub(b))),
                BinaryOperator::Mul => Ok(Value::Int64(a.wrapping_mul(b))),
                BinaryOperator::Div if b == 0 => Err(ExpressionError::DivisionByZero),
                BinaryOperator::Div => Ok(Value::Int64(a.wrapping_div(b))),
                BinaryOperator::Mod if b == 0 => Err(ExpressionError::DivisionByZero),
                _ => Ok(Value::Int64(a.wrapping_rem(b))),
            }
        }
    }
}

/// Evaluate a unary operation
fn evaluate_unary_op(op: UnaryOperator, operand: Value) -> ExpressionResult<Value> {
    match (op, operand) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOperator::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOperator::Negate, Value::Int32(n)) => Ok(Value::Int32(n.wrapping_neg())),
        (UnaryOperator::Negate, Value::Int64(n)) => Ok(Value::Int64(n.wrapping_neg())),
        (UnaryOperator::Negate, Value::Float64(n)) => Ok(Value::Float64(-n)),
        (UnaryOperator::Plus, value @ (Value::Int32(_) | Value::Int64(_) | Value::Float64(_))) => {
            Ok(value)
        }
        (op, operand) => Err(ExpressionError::InvalidOperandTypes {
            operator: op.as_str().to_string(),
            left_type: Some(operand.kind_name().to_string()),
            right_type: None,
        }),
    }
}

fn expect_string(value: Value, function: Function) -> ExpressionResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(ExpressionError::UnexpectedNull {
            context: format!("call of {}", function.name()),
        }),
        other => Err(ExpressionError::TypeMismatch {
            expected: "String".to_string(),
            actual: other.kind_name().to_string(),
            context: format!("call of {}", function.name()),
        }),
    }
}

fn evaluate_function(
    function: Function,
    target: Value,
    arguments: &[Value],
) -> ExpressionResult<Value> {
    if arguments.len() != function.arity() {
        return Err(ExpressionError::ArgumentCount {
            expected: function.arity(),
            actual: arguments.len(),
        });
    }

    match function {
        Function::Contains => match target {
            Value::Sequence(items) => Ok(Value::Boolean(
                items.iter().any(|item| item.equals(&arguments[0])),
            )),
            target => {
                let haystack = expect_string(target, function)?;
                let needle = expect_string(arguments[0].clone(), function)?;
                Ok(Value::Boolean(haystack.contains(&needle)))
            }
        },
        Function::StartsWith | Function::EndsWith => {
            let text = expect_string(target, function)?;
            let affix = expect_string(arguments[0].clone(), function)?;
            Ok(Value::Boolean(if function == Function::StartsWith {
                text.starts_with(&affix)
            } else {
                text.ends_with(&affix)
            }))
        }
        Function::ToUpper => Ok(Value::String(expect_string(target, function)?.to_uppercase())),
        Function::ToLower => Ok(Value::String(expect_string(target, function)?.to_lowercase())),
        Function::Trim => Ok(Value::String(
            expect_string(target, function)?.trim().to_string(),
        )),
        Function::Length => match target {
            Value::Sequence(items) => Ok(Value::Int32(items.len() as i32)),
            target => Ok(Value::Int32(
                expect_string(target, function)?.chars().count() as i32,
            )),
        },
        Function::Abs => match target {
            Value::Null => Ok(Value::Null),
            Value::Int32(n) => n.checked_abs().map(Value::Int32).ok_or_else(|| overflow(function)),
            Value::Int64(n) => n.checked_abs().map(Value::Int64).ok_or_else(|| overflow(function)),
            Value::Float64(n) => Ok(Value::Float64(n.abs())),
            other => Err(ExpressionError::TypeMismatch {
                expected: "numeric".to_string(),
                actual: other.kind_name().to_string(),
                context: "call of Abs".to_string(),
            }),
        },
    }
}

fn overflow(function: Function) -> ExpressionError {
    ExpressionError::EvaluationError {
        message: format!("arithmetic overflow in {}", function.name()),
    }
}

/// Convert a value to the given type, checking numeric ranges
pub fn convert_value(value: Value, ty: &RuntimeType) -> ExpressionResult<Value> {
    let mismatch = |value: &Value| ExpressionError::TypeMismatch {
        expected: ty.to_string(),
        actual: value.kind_name().to_string(),
        context: "conversion".to_string(),
    };
    let out_of_range = |value: &Value| ExpressionError::EvaluationError {
        message: format!("value {} is out of range for {}", value, ty),
    };

    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (RuntimeType::Any, value) => Ok(value),

        (RuntimeType::Scalar(DataType::Int32), value) => match value {
            Value::Int32(_) => Ok(value),
            Value::Int64(n) => i32::try_from(n)
                .map(Value::Int32)
                .map_err(|_| out_of_range(&value)),
            Value::Float64(n) if n.is_finite() && n >= i32::MIN as f64 && n <= i32::MAX as f64 => {
                Ok(Value::Int32(n.trunc() as i32))
            }
            Value::Float64(_) => Err(out_of_range(&value)),
            _ => Err(mismatch(&value)),
        },

        (RuntimeType::Scalar(DataType::Int64), value) => match value {
            Value::Int32(n) => Ok(Value::Int64(n as i64)),
            Value::Int64(_) => Ok(value),
            Value::Float64(n) if n.is_finite() && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
                Ok(Value::Int64(n.trunc() as i64))
            }
            Value::Float64(_) => Err(out_of_range(&value)),
            _ => Err(mismatch(&value)),
        },

        (RuntimeType::Scalar(DataType::Float64), value) => match value.as_f64() {
            Some(n) => Ok(Value::Float64(n)),
            None => Err(mismatch(&value)),
        },

        (RuntimeType::Scalar(DataType::Varchar), value) => match value {
            Value::String(_) => Ok(value),
            Value::Boolean(_) | Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => {
                Ok(Value::String(value.to_string()))
            }
            _ => Err(mismatch(&value)),
        },

        (RuntimeType::Scalar(DataType::Boolean), value) => match value {
            Value::Boolean(_) => Ok(value),
            _ => Err(mismatch(&value)),
        },

        (RuntimeType::Record(expected), Value::Record(record))
            if record.record_type().descriptor() == expected.descriptor() =>
        {
            Ok(Value::Record(record))
        }

        (RuntimeType::Sequence(element), Value::Sequence(items)) => items
            .into_iter()
            .map(|item| convert_value(item, element))
            .collect::<ExpressionResult<Vec<_>>>()
            .map(Value::Sequence),

        (_, value) => Err(mismatch(&value)),
    }
}
