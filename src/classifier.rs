//! Local-evaluability classification.
//!
//! Decides, for each native sub-expression built during translation, whether
//! it is computed up front and replaced by a constant.

use crate::expression::NativeExpression;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied classifier over native nodes
pub type EvaluabilityPredicate = Arc<dyn Fn(&NativeExpression) -> bool + Send + Sync>;

/// Local-evaluability policy
#[derive(Clone)]
pub struct LocalEvaluability {
    predicate: Option<EvaluabilityPredicate>,
    enabled: bool,
}

impl Default for LocalEvaluability {
    fn default() -> Self {
        Self {
            predicate: None,
            enabled: true,
        }
    }
}

impl LocalEvaluability {
    /// Replace the default classification entirely
    pub fn with_predicate(
        predicate: impl Fn(&NativeExpression) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Some(Arc::new(predicate)),
            enabled: true,
        }
    }

    /// Never fold
    pub fn disabled() -> Self {
        Self {
            predicate: None,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn can_be_evaluated_locally(&self, expr: &NativeExpression) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(expr),
            None => is_pure(expr),
        }
    }
}

impl fmt::Debug for LocalEvaluability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEvaluability")
            .field("custom_predicate", &self.predicate.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Default classification: anything that does not reach a lambda parameter,
/// a queryable root or an insert
pub fn is_pure(expr: &NativeExpression) -> bool {
    !expr.any_node(&|node| {
        matches!(
            node,
            NativeExpression::Parameter(_)
                | NativeExpression::Lambda(_)
                | NativeExpression::Query(_)
                | NativeExpression::Aggregate { .. }
                | NativeExpression::Insert { .. }
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{BinaryOperator, NativeParameter};
    use crate::types::{DataType, RuntimeType};
    use crate::value::Value;

    fn int(n: i32) -> NativeExpression {
        NativeExpression::constant(Value::Int32(n), RuntimeType::Scalar(DataType::Int32))
    }

    #[test]
    fn test_default_classification() {
        let closed = NativeExpression::binary(BinaryOperator::Add, int(1), int(2));
        assert!(LocalEvaluability::default().can_be_evaluated_locally(&closed));

        let open = NativeExpression::binary(
            BinaryOperator::Add,
            NativeExpression::Parameter(NativeParameter::new(
                "x",
                RuntimeType::Scalar(DataType::Int32),
            )),
            int(2),
        );
        assert!(!LocalEvaluability::default().can_be_evaluated_locally(&open));
    }

    #[test]
    fn test_override_and_disable() {
        let closed = NativeExpression::binary(BinaryOperator::Add, int(1), int(2));
        assert!(!LocalEvaluability::disabled().can_be_evaluated_locally(&closed));

        let never = LocalEvaluability::with_predicate(|_| false);
        assert!(!never.can_be_evaluated_locally(&closed));
        assert!(never.is_enabled());
    }
}
