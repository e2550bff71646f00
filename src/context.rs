//! Per-call execution context.
//!
//! Groups the collaborators one execution needs. Caller overrides are
//! explicit function-valued fields supplied at construction; nothing here is
//! process-global.

use crate::classifier::LocalEvaluability;
use crate::config::ExecutionOptions;
use crate::expression::{NativeExpression, NativeQuery};
use crate::mapper::{AnnotationPolicy, ResultMapper};
use crate::source::{DataContext, QueryableRoot, SourceResolver};
use crate::types::{RecordType, RuntimeType, TypeRegistry, TypeResolver};
use std::fmt;
use std::sync::Arc;

/// Rewrites the target query of an insert before the provider sees it
pub type InsertInterceptor = Arc<dyn Fn(NativeQuery) -> NativeQuery + Send + Sync>;

#[derive(Clone)]
pub struct ExecutionContext {
    sources: SourceResolver,
    type_resolver: Arc<dyn TypeResolver>,
    mapper: ResultMapper,
    evaluability: LocalEvaluability,
    insert_interceptor: Option<InsertInterceptor>,
}

impl ExecutionContext {
    pub fn builder(sources: SourceResolver) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            sources,
            type_resolver: None,
            options: ExecutionOptions::default(),
            annotation_policy: None,
            evaluability: None,
            insert_interceptor: None,
        }
    }

    /// Builder for the bound data-context strategy
    pub fn for_data_context(context: Arc<dyn DataContext>) -> ExecutionContextBuilder {
        Self::builder(SourceResolver::context(context))
    }

    /// Builder for the queryable-factory strategy
    pub fn for_factory(
        factory: impl Fn(&RecordType) -> Option<QueryableRoot> + Send + Sync + 'static,
    ) -> ExecutionContextBuilder {
        Self::builder(SourceResolver::factory(factory))
    }

    pub fn sources(&self) -> &SourceResolver {
        &self.sources
    }

    pub fn type_resolver(&self) -> &Arc<dyn TypeResolver> {
        &self.type_resolver
    }

    pub fn mapper(&self) -> &ResultMapper {
        &self.mapper
    }

    pub fn evaluability(&self) -> &LocalEvaluability {
        &self.evaluability
    }

    pub fn insert_interceptor(&self) -> Option<&InsertInterceptor> {
        self.insert_interceptor.as_ref()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("sources", &self.sources)
            .field("evaluability", &self.evaluability)
            .field("insert_interceptor", &self.insert_interceptor.is_some())
            .finish_non_exhaustive()
    }
}

pub struct ExecutionContextBuilder {
    sources: SourceResolver,
    type_resolver: Option<Arc<dyn TypeResolver>>,
    options: ExecutionOptions,
    annotation_policy: Option<AnnotationPolicy>,
    evaluability: Option<LocalEvaluability>,
    insert_interceptor: Option<InsertInterceptor>,
}

impl ExecutionContextBuilder {
    pub fn type_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.type_resolver = Some(resolver);
        self
    }

    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the type-annotation policy of the options
    pub fn annotate_types(
        mut self,
        policy: impl Fn(&RuntimeType) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.annotation_policy = Some(Arc::new(policy));
        self
    }

    /// Replace the default local-evaluability classification
    pub fn can_be_evaluated_locally(
        mut self,
        predicate: impl Fn(&NativeExpression) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.evaluability = Some(LocalEvaluability::with_predicate(predicate));
        self
    }

    pub fn intercept_inserts(
        mut self,
        interceptor: impl Fn(NativeQuery) -> NativeQuery + Send + Sync + 'static,
    ) -> Self {
        self.insert_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> ExecutionContext {
        let mapper = match self.annotation_policy {
            Some(policy) => ResultMapper::with_policy(policy),
            None => ResultMapper::with_mode(self.options.type_annotation),
        };
        let evaluability = if self.options.fold_local_expressions {
            self.evaluability.unwrap_or_default()
        } else {
            LocalEvaluability::disabled()
        };
        let type_resolver = self
            .type_resolver
            .unwrap_or_else(|| Arc::new(TypeRegistry::new()));

        ExecutionContext {
            sources: self.sources,
            type_resolver,
            mapper,
            evaluability,
            insert_interceptor: self.insert_interceptor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeAnnotationMode;
    use crate::types::{DataType, FieldDef, TypeDescriptor};

    #[test]
    fn test_options_shape_the_context() {
        let context = ExecutionContext::for_factory(|_| None)
            .options(ExecutionOptions {
                type_annotation: TypeAnnotationMode::None,
                fold_local_expressions: false,
            })
            .can_be_evaluated_locally(|_| true)
            .build();

        // disabling folding wins over a custom classifier
        assert!(!context.evaluability().is_enabled());

        let order = RuntimeType::Record(Arc::new(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![FieldDef::new("Id", RuntimeType::Scalar(DataType::Int32))],
        )));
        assert!(!context.mapper().annotates(&order));
        assert!(context.insert_interceptor().is_none());
    }

    #[test]
    fn test_explicit_policy_overrides_options() {
        let context = ExecutionContext::for_factory(|_| None)
            .options(ExecutionOptions {
                type_annotation: TypeAnnotationMode::None,
                fold_local_expressions: true,
            })
            .annotate_types(|_| true)
            .intercept_inserts(|query| query)
            .build();

        assert!(context.mapper().annotates(&RuntimeType::Scalar(DataType::Int32)));
        assert!(context.insert_interceptor().is_some());
    }
}
