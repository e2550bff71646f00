//! Projection executor implementation.
//!
//! Maps each value of the child executor through a selector lambda.

use crate::engine::Executor;
use crate::expression::{ExpressionEvaluator, NativeLambda};
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};

/// Executor that applies a selector to every value
pub struct ProjectionExecutor {
    /// Child executor that produces values
    child: Box<dyn Executor>,
    /// One-parameter selector lambda
    selector: NativeLambda,
    /// Return type of the selector
    output_type: RuntimeType,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl ProjectionExecutor {
    pub fn new(child: Box<dyn Executor>, selector: NativeLambda) -> Self {
        let output_type = selector.return_type();
        Self {
            child,
            selector,
            output_type,
            initialized: false,
        }
    }
}

impl Executor for ProjectionExecutor {
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

        match self.child.next()? {
            Some(value) => Ok(Some(ExpressionEvaluator::new().invoke(&self.selector, &[value])?)),
            None => Ok(None),
        }
    }

    fn output_type(&self) -> &RuntimeType {
        &self.output_type
    }
}
