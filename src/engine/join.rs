//! Nested Loop Join executor implementation.
//!
//! Inner equi-join between two child executors. The right child is
//! materialized with its keys on `init()`; for each left value the matching
//! right values are combined through the result selector, in right-side
//! order. Null keys never match.

use crate::engine::Executor;
use crate::expression::{ExpressionEvaluator, NativeLambda};
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};

/// Executor that performs a nested loop join
pub struct NestedLoopJoinExecutor {
    /// Left (outer) child executor
    left_child: Box<dyn Executor>,
    /// Right (inner) child executor
    right_child: Box<dyn Executor>,
    /// Key selector applied to left values
    left_key: NativeLambda,
    /// Key selector applied to right values
    right_key: NativeLambda,
    /// Two-parameter lambda combining a matching pair
    result: NativeLambda,
    /// Return type of the result selector
    output_type: RuntimeType,
    /// Right values with their keys
    right_values: Vec<(Value, Value)>,
    /// Current left value and its key
    current_left: Option<(Value, Value)>,
    /// Next right position to probe for the current left value
    right_position: usize,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left_child: Box<dyn Executor>,
        right_child: Box<dyn Executor>,
        left_key: NativeLambda,
        right_key: NativeLambda,
        result: NativeLambda,
    ) -> Self {
        let output_type = result.return_type();
        Self {
            left_child,
            right_child,
            left_key,
            right_key,
            result,
            output_type,
            right_values: Vec::new(),
            current_left: None,
            right_position: 0,
            initialized: false,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.left_child.init()?;
        self.right_child.init()?;

        let evaluator = ExpressionEvaluator::new();
        self.right_values.clear();
        while let Some(value) = self.right_child.next()? {
            let key = evaluator.invoke(&self.right_key, std::slice::from_ref(&value))?;
            if !key.is_null() {
                self.right_values.push((key, value));
            }
        }

        self.current_left = None;
        self.right_position = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        let evaluator = ExpressionEvaluator::new();
        loop {
            if let Some((left_key, left_value)) = &self.current_left {
                while self.right_position < self.right_values.len() {
                    let (right_key, right_value) = &self.right_values[self.right_position];
                    self.right_position += 1;
                    if left_key.equals(right_key) {
                        let combined = evaluator
                            .invoke(&self.result, &[left_value.clone(), right_value.clone()])?;
                        return Ok(Some(combined));
                    }
                }
            }

            // advance to the next left value with a non-null key
            match self.left_child.next()? {
                Some(value) => {
                    let key = evaluator.invoke(&self.left_key, std::slice::from_ref(&value))?;
                    self.current_left = (!key.is_null()).then_some((key, value));
                    self.right_position = 0;
                }
                None => {
                    self.current_left = None;
                    return Ok(None);
                }
            }
        }
    }

    fn output_type(&self) -> &RuntimeType {
        &self.output_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{drain, int, int_lambda, MockExecutor};
    use crate::expression::{BinaryOperator, NativeExpression, NativeParameter};
    use crate::types::DataType;

    fn pair_sum() -> NativeLambda {
        let a = NativeParameter::new("a", RuntimeType::Scalar(DataType::Int32));
        let b = NativeParameter::new("b", RuntimeType::Scalar(DataType::Int32));
        NativeLambda::new(
            vec![a.clone(), b.clone()],
            NativeExpression::binary(
                BinaryOperator::Add,
                NativeExpression::binary(
                    BinaryOperator::Mul,
                    NativeExpression::Parameter(a),
                    int(100),
                ),
                NativeExpression::Parameter(b),
            ),
        )
    }

    #[test]
    fn test_join_emits_matches_in_order() -> Result<()> {
        // key: value mod 10
        let key = || int_lambda(|x| NativeExpression::binary(BinaryOperator::Mod, x, int(10)));
        let left = MockExecutor::ints(&[Some(1), Some(2), Some(3)]);
        let right = MockExecutor::ints(&[Some(11), Some(3), Some(21), Some(42)]);

        let mut join =
            NestedLoopJoinExecutor::new(Box::new(left), Box::new(right), key(), key(), pair_sum());
        assert_eq!(
            drain(&mut join)?,
            vec![Value::Int32(111), Value::Int32(121), Value::Int32(303)]
        );
        Ok(())
    }

    #[test]
    fn test_null_keys_never_match() -> Result<()> {
        let left = MockExecutor::ints(&[None, Some(1)]);
        let right = MockExecutor::ints(&[None, Some(1)]);
        let mut join = NestedLoopJoinExecutor::new(
            Box::new(left),
            Box::new(right),
            int_lambda(|x| x),
            int_lambda(|x| x),
            pair_sum(),
        );
        assert_eq!(drain(&mut join)?, vec![Value::Int32(101)]);
        Ok(())
    }
}
