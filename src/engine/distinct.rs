//! Distinct executor implementation.
//!
//! Drops values equal to one already returned, keeping first occurrences in
//! input order. Equality is [`Value::equals`], so `1` and `1L` are duplicates
//! and null equals null.

use crate::engine::Executor;
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};

/// Executor that removes duplicate values
pub struct DistinctExecutor {
    /// Child executor that produces values
    child: Box<dyn Executor>,
    /// Values returned so far
    seen: Vec<Value>,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl DistinctExecutor {
    pub fn new(child: Box<dyn Executor>) -> Self {
        Self {
            child,
            seen: Vec::new(),
            initialized: false,
        }
    }
}

impl Executor for DistinctExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.child.init()?;
        self.seen.clear();
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        // Value has no Hash (floats), so duplicates are found by scanning
        while let Some(value) = self.child.next()? {
            if !self.seen.iter().any(|seen| seen.equals(&value)) {
                self.seen.push(value.clone());
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn output_type(&self) -> &RuntimeType {
        self.child.output_type()
    }
}
