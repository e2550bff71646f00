//! Execution options.

use crate::mapper::AnnotationPolicy;
use crate::types::RuntimeType;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which record types carry their descriptor into dynamic results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TypeAnnotationMode {
    /// Every record type
    All,
    /// No record type
    None,
    /// Every record type except anonymous projections
    #[default]
    Named,
}

impl TypeAnnotationMode {
    pub fn policy(&self) -> AnnotationPolicy {
        match self {
            TypeAnnotationMode::All => Arc::new(|ty: &RuntimeType| ty.as_record().is_some()),
            TypeAnnotationMode::None => Arc::new(|_: &RuntimeType| false),
            TypeAnnotationMode::Named => Arc::new(|ty: &RuntimeType| {
                ty.as_record().is_some_and(|record| !record.is_anonymous())
            }),
        }
    }
}

/// Options for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub type_annotation: TypeAnnotationMode,
    /// Fold locally evaluable sub-expressions during translation
    pub fold_local_expressions: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            type_annotation: TypeAnnotationMode::default(),
            fold_local_expressions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, FieldDef, RecordType, TypeDescriptor};

    #[test]
    fn test_named_policy_skips_anonymous_types() {
        let named = RuntimeType::Record(Arc::new(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![],
        )));
        let anonymous = RuntimeType::Record(Arc::new(RecordType::anonymous(vec![FieldDef::new(
            "Id",
            RuntimeType::Scalar(DataType::Int32),
        )])));

        let policy = TypeAnnotationMode::Named.policy();
        assert!(policy(&named));
        assert!(!policy(&anonymous));

        assert!(TypeAnnotationMode::All.policy()(&anonymous));
        assert!(!TypeAnnotationMode::None.policy()(&named));
    }

    #[test]
    fn test_options_from_partial_json() -> anyhow::Result<()> {
        let options: ExecutionOptions = serde_json::from_str(r#"{"type_annotation":"all"}"#)?;
        assert_eq!(options.type_annotation, TypeAnnotationMode::All);
        assert!(options.fold_local_expressions);
        Ok(())
    }
}
