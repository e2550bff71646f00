//! Limit executor implementation.
//!
//! Implements Skip and Take: skips `offset` values, then returns at most
//! `limit` values from the child executor.

use crate::engine::Executor;
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{bail, Result};

/// Executor that limits the number of values returned
pub struct LimitExecutor {
    /// Child executor that produces values
    child: Box<dyn Executor>,
    /// Maximum number of values to return; None means unbounded
    limit: Option<usize>,
    /// Number of values to skip before returning
    offset: usize,
    /// Number of values skipped so far
    skipped: usize,
    /// Number of values returned so far
    returned: usize,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl LimitExecutor {
    /// Take at most `limit` values
    pub fn new(child: Box<dyn Executor>, limit: usize) -> Self {
        Self::with_offset(child, Some(limit), 0)
    }

    /// Skip `offset` values, then take at most `limit`
    pub fn with_offset(child: Box<dyn Executor>, limit: Option<usize>, offset: usize) -> Self {
        Self {
            child,
            limit,
            offset,
            skipped: 0,
            returned: 0,
            initialized: false,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.child.init()?;

        self.skipped = 0;
        self.returned = 0;

        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        if self.limit.is_some_and(|limit| self.returned >= limit) {
            return Ok(None);
        }

        while self.skipped < self.offset {
            match self.child.next()? {
                Some(_) => self.skipped += 1,
                None => return Ok(None),
            }
        }

        match self.child.next()? {
            Some(value) => {
                self.returned += 1;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn output_type(&self) -> &RuntimeType {
        self.child.output_type()
    }
}
