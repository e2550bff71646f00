//! Query-shaping helpers.
//!
//! Provider markers on hand-built native queries, and builders for marker
//! and insert calls on portable expressions. Markers attach to the query
//! root; a provider that does not understand one ignores it.

use crate::expression::{NativeQuery, PortableExpression};
use crate::source::QueryAnnotation;
use crate::types::TypeDescriptor;

impl NativeQuery {
    /// Ask the provider to eagerly load a related member path
    pub fn load_with<S: Into<String>>(mut self, path: impl IntoIterator<Item = S>) -> Self {
        self.root
            .annotate(QueryAnnotation::LoadWith(path.into_iter().map(Into::into).collect()));
        self
    }

    /// Replace the provider's table reference with a template
    pub fn with_table_expression(mut self, template: impl Into<String>) -> Self {
        self.root
            .annotate(QueryAnnotation::TableExpression(template.into()));
        self
    }

    /// Attach a provider table hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.root.annotate(QueryAnnotation::TableHint(hint.into()));
        self
    }
}

impl PortableExpression {
    /// `LoadWith(source, selector)`; the selector is a member path lambda
    pub fn load_with(self, selector: PortableExpression) -> Self {
        self.call("LoadWith", vec![selector])
    }

    pub fn with_table_expression(self, template: impl Into<String>) -> Self {
        self.call("WithTableExpression", vec![PortableExpression::string(template)])
    }

    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        self.call("With", vec![PortableExpression::string(hint)])
    }

    /// `Insert(source, () => setter)`; the setter constructs the entity
    pub fn insert(self, setter: PortableExpression) -> Self {
        self.call("Insert", vec![PortableExpression::lambda(vec![], setter)])
    }

    /// Inner equi-join with another query
    pub fn join(
        self,
        inner: PortableExpression,
        outer_key: PortableExpression,
        inner_key: PortableExpression,
        result: PortableExpression,
    ) -> Self {
        self.call("Join", vec![inner, outer_key, inner_key, result])
    }

    /// Terminal aggregate call such as `Sum` or `FirstOrDefault`
    pub fn aggregate(self, method: &str, lambda: Option<PortableExpression>) -> Self {
        self.call(method, lambda.into_iter().collect())
    }

    /// A `New` of `ty` with members in the given order
    pub fn entity(ty: TypeDescriptor, members: Vec<(&str, PortableExpression)>) -> Self {
        PortableExpression::new_object(Some(ty), members)
    }
}
