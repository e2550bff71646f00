//! Scalar aggregation executor.
//!
//! Consumes its child and produces exactly one value: a count, a quantifier
//! result, an element (First/Single) or a numeric fold (Sum, Min, Max,
//! Average). Selector results that are NULL are ignored by the numeric folds.
//!
//! Empty input:
//! - Count/LongCount give 0, Any gives false, All gives true, Sum gives 0
//! - First/Single give NULL for the OrDefault forms and fail otherwise
//! - Min/Max/Average fail; when every selected value is NULL they give NULL

use crate::engine::Executor;
use crate::expression::{Aggregate, ExpressionEvaluator, NativeLambda};
use crate::types::{DataType, RuntimeType};
use crate::value::Value;
use anyhow::{anyhow, bail, Result};
use std::cmp::Ordering;

/// Running state of one aggregation
#[derive(Debug, Default)]
struct AggregateState {
    /// Input values seen
    rows: u64,
    /// Values that passed the predicate
    matched: u64,
    /// First value that passed the predicate
    first: Option<Value>,
    /// Running sum, or current extreme for Min/Max
    accumulator: Option<Value>,
    /// For Average - sum of non-NULL selections
    avg_sum: f64,
    /// For Average - count of non-NULL selections
    avg_count: u64,
    /// Whether the outcome is already decided
    done: bool,
}

/// Executor computing one aggregate over its child
pub struct AggregateExecutor {
    /// Child executor providing input values
    child: Box<dyn Executor>,
    /// The aggregate to compute
    aggregate: Aggregate,
    /// Result type of the aggregate
    output_type: RuntimeType,
    /// Computed result, taken by the first `next()`
    result: Option<Value>,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl AggregateExecutor {
    pub fn new(child: Box<dyn Executor>, aggregate: Aggregate) -> Self {
        let output_type = aggregate
            .result_type(child.output_type())
            .unwrap_or(RuntimeType::Any);
        Self {
            child,
            aggregate,
            output_type,
            result: None,
            initialized: false,
        }
    }

    fn consume_input(&mut self) -> Result<Value> {
        let evaluator = ExpressionEvaluator::new();
        let mut state = AggregateState::default();

        while !state.done {
            let Some(value) = self.child.next()? else {
                break;
            };
            state.rows += 1;
            self.update(&evaluator, &mut state, value)?;
        }

        self.finalize(state)
    }

    fn update(
        &self,
        evaluator: &ExpressionEvaluator<'_>,
        state: &mut AggregateState,
        value: Value,
    ) -> Result<()> {
        let matches = |predicate: &Option<NativeLambda>| -> Result<bool> {
            match predicate {
                Some(predicate) => Ok(evaluator.test(predicate, std::slice::from_ref(&value))?),
                None => Ok(true),
            }
        };
        let select = |selector: &Option<NativeLambda>| -> Result<Value> {
            match selector {
                Some(selector) => Ok(evaluator.invoke(selector, std::slice::from_ref(&value))?),
                None => Ok(value.clone()),
            }
        };

        match &self.aggregate {
            Aggregate::Count(predicate) | Aggregate::LongCount(predicate) => {
                if matches(predicate)? {
                    state.matched += 1;
                }
            }
            Aggregate::Any(predicate) => {
                if matches(predicate)? {
                    state.matched += 1;
                    state.done = true;
                }
            }
            Aggregate::All(predicate) => {
                if evaluator.test(predicate, std::slice::from_ref(&value))? {
                    state.matched += 1;
                } else {
                    state.done = true;
                }
            }
            Aggregate::First { predicate, .. } => {
                if matches(predicate)? {
                    state.matched += 1;
                    state.first = Some(value.clone());
                    state.done = true;
                }
            }
            Aggregate::Single { predicate, .. } => {
                if matches(predicate)? {
                    state.matched += 1;
                    if state.matched > 1 {
                        bail!(
                            "Sequence contains more than one {}",
                            if predicate.is_some() { "matching element" } else { "element" }
                        );
                    }
                    state.first = Some(value.clone());
                }
            }
            Aggregate::Sum(selector) => {
                let selected = select(selector)?;
                if !selected.is_null() {
                    state.accumulator = Some(match state.accumulator.take() {
                        Some(sum) => checked_add(&sum, &selected)?,
                        None => selected,
                    });
                }
            }
            Aggregate::Min(selector) | Aggregate::Max(selector) => {
                let selected = select(selector)?;
                if selected.is_null() {
                    return Ok(());
                }
                let wanted = match self.aggregate {
                    Aggregate::Min(_) => Ordering::Less,
                    _ => Ordering::Greater,
                };
                let replace = match &state.accumulator {
                    None => true,
                    Some(current) => {
                        selected.compare(current).ok_or_else(|| {
                            anyhow!(
                                "Cannot compare {} with {}",
                                selected.kind_name(),
                                current.kind_name()
                            )
                        })? == wanted
                    }
                };
                if replace {
                    state.accumulator = Some(selected);
                }
            }
            Aggregate::Average(selector) => {
                let selected = select(selector)?;
                if selected.is_null() {
                    return Ok(());
                }
                let n = selected.as_f64().ok_or_else(|| {
                    anyhow!("Average requires numeric values, got {}", selected.kind_name())
                })?;
                state.avg_sum += n;
                state.avg_count += 1;
            }
        }
        Ok(())
    }

    fn finalize(&self, state: AggregateState) -> Result<Value> {
        let no_elements = |predicate: &Option<NativeLambda>| {
            if predicate.is_some() {
                anyhow!("Sequence contains no matching element")
            } else {
                anyhow!("Sequence contains no elements")
            }
        };

        match &self.aggregate {
            Aggregate::Count(_) => Ok(Value::Int32(
                i32::try_from(state.matched).map_err(|_| anyhow!("Count overflows Int32"))?,
            )),
            Aggregate::LongCount(_) => Ok(Value::Int64(
                i64::try_from(state.matched).map_err(|_| anyhow!("Count overflows Int64"))?,
            )),
            Aggregate::Any(_) => Ok(Value::Boolean(state.matched > 0)),
            Aggregate::All(_) => Ok(Value::Boolean(state.matched == state.rows)),
            Aggregate::First {
                predicate,
                or_default,
            }
            | Aggregate::Single {
                predicate,
                or_default,
            } => match state.first {
                Some(value) => Ok(value),
                None if *or_default => Ok(Value::Null),
                None => Err(no_elements(predicate)),
            },
            Aggregate::Sum(_) => Ok(state
                .accumulator
                .unwrap_or_else(|| zero_of(&self.output_type))),
            Aggregate::Min(_) | Aggregate::Max(_) => {
                if state.rows == 0 {
                    return Err(no_elements(&None));
                }
                Ok(state.accumulator.unwrap_or(Value::Null))
            }
            Aggregate::Average(_) => {
                if state.rows == 0 {
                    return Err(no_elements(&None));
                }
                if state.avg_count == 0 {
                    return Ok(Value::Null);
                }
                Ok(Value::Float64(state.avg_sum / state.avg_count as f64))
            }
        }
    }
}

/// Overflow-checked addition with numeric widening
fn checked_add(sum: &Value, value: &Value) -> Result<Value> {
    let overflow = || anyhow!("Sum overflows");
    match (sum, value) {
        (Value::Int32(a), Value::Int32(b)) => {
            Ok(Value::Int32(a.checked_add(*b).ok_or_else(overflow)?))
        }
        (Value::Float64(_), _) | (_, Value::Float64(_)) => match (sum.as_f64(), value.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float64(a + b)),
            _ => bail!("Cannot sum {} and {}", sum.kind_name(), value.kind_name()),
        },
        _ => match (sum.as_i64(), value.as_i64()) {
            (Some(a), Some(b)) => Ok(Value::Int64(a.checked_add(b).ok_or_else(overflow)?)),
            _ => bail!("Cannot sum {} and {}", sum.kind_name(), value.kind_name()),
        },
    }
}

fn zero_of(ty: &RuntimeType) -> Value {
    match ty {
        RuntimeType::Scalar(DataType::Int64) => Value::Int64(0),
        RuntimeType::Scalar(DataType::Float64) => Value::Float64(0.0),
        _ => Value::Int32(0),
    }
}

impl Executor for AggregateExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.child.init()?;
        self.result = Some(self.consume_input()?);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        Ok(self.result.take())
    }

    fn output_type(&self) -> &RuntimeType {
        &self.output_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{int, int_lambda, MockExecutor};
    use crate::expression::{BinaryOperator, NativeExpression};

    fn run(values: &[Option<i32>], aggregate: Aggregate) -> Result<Value> {
        let mut executor = AggregateExecutor::new(Box::new(MockExecutor::ints(values)), aggregate);
        executor.init()?;
        let value = executor.next()?.ok_or_else(|| anyhow!("no result"))?;
        assert!(executor.next()?.is_none());
        Ok(value)
    }

    fn over(n: i32) -> NativeLambda {
        int_lambda(|x| NativeExpression::binary(BinaryOperator::Gt, x, int(n)))
    }

    #[test]
    fn test_counts_and_quantifiers() -> Result<()> {
        let values = [Some(1), Some(5), None, Some(7)];
        assert_eq!(run(&values, Aggregate::Count(None))?, Value::Int32(4));
        assert_eq!(run(&values, Aggregate::Count(Some(over(4))))?, Value::Int32(2));
        assert_eq!(run(&values, Aggregate::LongCount(None))?, Value::Int64(4));
        assert_eq!(run(&values, Aggregate::Any(Some(over(6))))?, Value::Boolean(true));
        assert_eq!(run(&values, Aggregate::All(over(0)))?, Value::Boolean(false));
        assert_eq!(run(&[], Aggregate::All(over(0)))?, Value::Boolean(true));
        assert_eq!(run(&[], Aggregate::Any(None))?, Value::Boolean(false));
        Ok(())
    }

    #[test]
    fn test_first_and_single() -> Result<()> {
        let values = [Some(1), Some(5), Some(7)];
        let first = |predicate, or_default| Aggregate::First {
            predicate,
            or_default,
        };
        let single = |predicate, or_default| Aggregate::Single {
            predicate,
            or_default,
        };

        assert_eq!(run(&values, first(Some(over(4)), false))?, Value::Int32(5));
        assert_eq!(run(&values, first(Some(over(9)), true))?, Value::Null);
        assert!(run(&values, first(Some(over(9)), false)).is_err());

        assert_eq!(run(&values, single(Some(over(6)), false))?, Value::Int32(7));
        assert!(run(&values, single(Some(over(4)), false)).is_err());
        // OrDefault still rejects more than one match
        assert!(run(&values, single(Some(over(4)), true)).is_err());
        assert_eq!(run(&[], single(None, true))?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_numeric_folds() -> Result<()> {
        let values = [Some(4), None, Some(1), Some(7)];
        assert_eq!(run(&values, Aggregate::Sum(None))?, Value::Int32(12));
        assert_eq!(run(&values, Aggregate::Min(None))?, Value::Int32(1));
        assert_eq!(run(&values, Aggregate::Max(None))?, Value::Int32(7));
        assert_eq!(run(&values, Aggregate::Average(None))?, Value::Float64(4.0));
        Ok(())
    }

    #[test]
    fn test_empty_and_all_null_input() -> Result<()> {
        assert_eq!(run(&[], Aggregate::Sum(None))?, Value::Int32(0));
        assert!(run(&[], Aggregate::Min(None)).is_err());
        assert!(run(&[], Aggregate::Average(None)).is_err());
        assert_eq!(run(&[None, None], Aggregate::Max(None))?, Value::Null);
        assert_eq!(run(&[None], Aggregate::Average(None))?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_sum_overflow() {
        assert!(run(&[Some(i32::MAX), Some(1)], Aggregate::Sum(None)).is_err());
    }

    #[test]
    fn test_sum_with_selector_widens() -> Result<()> {
        let selector = int_lambda(|x| NativeExpression::Convert {
            operand: Box::new(x),
            ty: RuntimeType::Scalar(DataType::Int64),
        });
        assert_eq!(
            run(&[Some(i32::MAX), Some(1)], Aggregate::Sum(Some(selector)))?,
            Value::Int64(i32::MAX as i64 + 1)
        );
        Ok(())
    }
}
