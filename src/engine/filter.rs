//! Filter executor implementation.
//!
//! Passes through the values of the child executor for which the predicate
//! lambda holds. A null predicate result is treated as false.

use crate::engine::Executor;
use crate::expression::{ExpressionEvaluator, NativeLambda};
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};

/// Executor that filters values with a predicate lambda
pub struct FilterExecutor {
    /// Child executor that produces values
    child: Box<dyn Executor>,
    /// One-parameter lambda evaluating to Boolean
    predicate: NativeLambda,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl FilterExecutor {
    pub fn new(child: Box<dyn Executor>, predicate: NativeLambda) -> Self {
        Self {
            child,
            predicate,
            initialized: false,
        }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.child.init()?;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        let evaluator = ExpressionEvaluator::new();
        while let Some(value) = self.child.next()? {
            if evaluator.test(&self.predicate, std::slice::from_ref(&value))? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn output_type(&self) -> &RuntimeType {
        self.child.output_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{drain, int, int_lambda, MockExecutor};
    use crate::expression::{BinaryOperator, NativeExpression};

    #[test]
    fn test_filter_basic() -> Result<()> {
        let child = MockExecutor::ints(&[Some(1), Some(5), None, Some(3)]);
        let predicate =
            int_lambda(|x| NativeExpression::binary(BinaryOperator::Gt, x, int(2)));
        let mut filter = FilterExecutor::new(Box::new(child), predicate);

        // null > 2 is false, so the null row is dropped
        assert_eq!(drain(&mut filter)?, vec![Value::Int32(5), Value::Int32(3)]);
        Ok(())
    }

    #[test]
    fn test_filter_rejects_non_boolean_predicate() -> Result<()> {
        let child = MockExecutor::ints(&[Some(1)]);
        let mut filter = FilterExecutor::new(Box::new(child), int_lambda(|x| x));
        filter.init()?;
        assert!(filter.next().is_err());
        Ok(())
    }

    #[test]
    fn test_filter_not_initialized() {
        let child = MockExecutor::ints(&[Some(1)]);
        let mut filter = FilterExecutor::new(Box::new(child), int_lambda(|x| x));
        assert!(filter.next().is_err());
    }
}
