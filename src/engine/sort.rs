//! Sort executor implementation.
//!
//! This executor materializes all values from its child, computes the sort
//! keys once per value, then returns the values in sorted order. The sort is
//! stable: values with equal keys keep their input order.
//!
//! Supports:
//! - Multiple keys (OrderBy followed by ThenBy)
//! - Ascending/descending order per key
//! - NULLs ordered below every other key (first ascending, last descending)

use crate::engine::Executor;
use crate::expression::{ExpressionEvaluator, NativeLambda};
use crate::types::RuntimeType;
use crate::value::Value;
use anyhow::{anyhow, bail, Error, Result};
use std::cmp::Ordering;

/// Sort order for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl From<bool> for SortOrder {
    /// `true` means descending
    fn from(descending: bool) -> Self {
        if descending {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

/// Sort criteria for a single key
#[derive(Debug, Clone)]
pub struct SortCriteria {
    /// Key selector lambda
    pub key: NativeLambda,
    /// Sort order (ASC/DESC)
    pub order: SortOrder,
}

impl SortCriteria {
    pub fn new(key: NativeLambda, order: SortOrder) -> Self {
        Self { key, order }
    }
}

/// Executor that sorts values based on multiple criteria
pub struct SortExecutor {
    /// Child executor that produces values
    child: Box<dyn Executor>,
    /// Sort criteria (in order of precedence)
    criteria: Vec<SortCriteria>,
    /// Materialized and sorted values
    sorted: Vec<Value>,
    /// Current position in sorted
    current_position: usize,
    /// Whether the executor has been initialized
    initialized: bool,
}

impl SortExecutor {
    pub fn new(child: Box<dyn Executor>, criteria: Vec<SortCriteria>) -> Self {
        Self {
            child,
            criteria,
            sorted: Vec::new(),
            current_position: 0,
            initialized: false,
        }
    }

    /// Compare two keys according to sort order; NULL is the lowest key
    fn compare_values(v1: &Value, v2: &Value, order: SortOrder) -> Result<Ordering> {
        let cmp = match (v1, v2) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (v1, v2) => v1.compare(v2).ok_or_else(|| {
                anyhow!("Cannot order {} against {}", v1.kind_name(), v2.kind_name())
            })?,
        };
        Ok(match order {
            SortOrder::Asc => cmp,
            SortOrder::Desc => cmp.reverse(),
        })
    }

    fn sort_values(&mut self, values: Vec<Value>) -> Result<()> {
        let evaluator = ExpressionEvaluator::new();
        let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(values.len());
        for value in values {
            let keys = self
                .criteria
                .iter()
                .map(|criteria| evaluator.invoke(&criteria.key, std::slice::from_ref(&value)))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((keys, value));
        }

        // sort_by cannot fail; keep the first comparison error and report it after
        let mut failure: Option<Error> = None;
        keyed.sort_by(|a, b| {
            for (i, criteria) in self.criteria.iter().enumerate() {
                match Self::compare_values(&a.0[i], &b.0[i], criteria.order) {
                    Ok(Ordering::Equal) => continue,
                    Ok(cmp) => return cmp,
                    Err(e) => {
                        failure.get_or_insert(e);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        if let Some(e) = failure {
            return Err(e);
        }

        self.sorted = keyed.into_iter().map(|(_, value)| value).collect();
        Ok(())
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.child.init()?;

        let mut values = Vec::new();
        while let Some(value) = self.child.next()? {
            values.push(value);
        }
        self.sort_values(values)?;

        self.current_position = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Value>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }

        let value = self.sorted.get(self.current_position).cloned();
        if value.is_some() {
            self.current_position += 1;
        }
        Ok(value)
    }

    fn output_type(&self) -> &RuntimeType {
        self.child.output_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{drain, int_lambda, MockExecutor};
    use crate::expression::NativeExpression;
    use crate::types::{DataType, FieldDef, RecordType, TypeDescriptor};
    use crate::value::Record;
    use std::sync::Arc;

    fn ints(values: &[Option<i32>]) -> Vec<Value> {
        values
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Int32))
            .collect()
    }

    #[test]
    fn test_sort_ascending_nulls_first() -> Result<()> {
        let child = MockExecutor::ints(&[Some(3), None, Some(1), Some(2)]);
        let mut sort = SortExecutor::new(
            Box::new(child),
            vec![SortCriteria::new(int_lambda(|x| x), SortOrder::Asc)],
        );
        assert_eq!(drain(&mut sort)?, ints(&[None, Some(1), Some(2), Some(3)]));
        Ok(())
    }

    #[test]
    fn test_sort_descending_nulls_last() -> Result<()> {
        let child = MockExecutor::ints(&[Some(3), None, Some(1), Some(2)]);
        let mut sort = SortExecutor::new(
            Box::new(child),
            vec![SortCriteria::new(int_lambda(|x| x), SortOrder::Desc)],
        );
        assert_eq!(drain(&mut sort)?, ints(&[Some(3), Some(2), Some(1), None]));
        Ok(())
    }

    #[test]
    fn test_multi_key_sort_is_stable() -> Result<()> {
        let ty = Arc::new(RecordType::new(
            TypeDescriptor::named("test.Pair"),
            vec![
                FieldDef::new("Group", RuntimeType::Scalar(DataType::Int32)),
                FieldDef::new("Rank", RuntimeType::Scalar(DataType::Int32)),
            ],
        ));
        let pair = |g: i32, r: i32| -> Result<Value> {
            Ok(Value::Record(Record::new(
                ty.clone(),
                vec![Value::Int32(g), Value::Int32(r)],
            )?))
        };
        let rows = vec![pair(2, 1)?, pair(1, 9)?, pair(1, 3)?, pair(2, 1)?, pair(1, 3)?];
        let child = MockExecutor::new(rows.clone(), RuntimeType::Record(ty.clone()));

        let member = |index: usize, name: &str| {
            let p = crate::expression::NativeParameter::new("p", RuntimeType::Record(ty.clone()));
            NativeLambda::new(
                vec![p.clone()],
                NativeExpression::Member {
                    target: Box::new(NativeExpression::Parameter(p)),
                    index,
                    name: name.to_string(),
                    ty: RuntimeType::Scalar(DataType::Int32),
                },
            )
        };

        let mut sort = SortExecutor::new(
            Box::new(child),
            vec![
                SortCriteria::new(member(0, "Group"), SortOrder::Asc),
                SortCriteria::new(member(1, "Rank"), SortOrder::Desc),
            ],
        );
        let sorted = drain(&mut sort)?;
        assert_eq!(
            sorted,
            vec![
                rows[1].clone(),
                rows[2].clone(),
                rows[4].clone(),
                rows[0].clone(),
                rows[3].clone()
            ]
        );
        Ok(())
    }

    #[test]
    fn test_incomparable_keys_fail() {
        let child = MockExecutor::new(
            vec![Value::Int32(1), Value::String("a".to_string())],
            RuntimeType::Any,
        );
        let key = {
            let x = crate::expression::NativeParameter::new("x", RuntimeType::Any);
            NativeLambda::new(vec![x.clone()], NativeExpression::Parameter(x))
        };
        let mut sort =
            SortExecutor::new(Box::new(child), vec![SortCriteria::new(key, SortOrder::Asc)]);
        assert!(sort.init().is_err());
    }
}
