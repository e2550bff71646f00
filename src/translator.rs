//! Portable to native translation.
//!
//! The translator walks the portable tree depth first. Every composite
//! native node it builds is offered to the local-evaluability classifier
//! before its parent is built, so parents always see maximally folded
//! children.

use crate::classifier::LocalEvaluability;
use crate::context::ExecutionContext;
use crate::error::{QueryError, QueryResult};
use crate::expression::portable::MemberInit;
use crate::expression::{
    evaluate_expression, Aggregate, BinaryOperator, Function, NativeExpression, NativeLambda,
    NativeParameter, NativeQuery, PortableExpression, QueryOperator,
};
use crate::mapper::ResultMapper;
use crate::source::{QueryAnnotation, QueryableRoot};
use crate::types::{DataType, FieldDef, RecordType, RuntimeType, TypeDescriptor};
use crate::value::Value;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;

const BOOLEAN: RuntimeType = RuntimeType::Scalar(DataType::Boolean);
const INT32: RuntimeType = RuntimeType::Scalar(DataType::Int32);

/// Parameter name for lambdas synthesized during translation
const SYNTHETIC_PARAMETER: &str = "<>it";

/// Translates one portable expression; holds per-call state only
pub struct Translator<'c> {
    context: &'c ExecutionContext,
    /// Roots resolved so far, so one type always maps to the same root
    roots: HashMap<TypeDescriptor, QueryableRoot>,
    /// Lambda parameters in scope, innermost last
    scopes: Vec<NativeParameter>,
}

impl<'c> Translator<'c> {
    pub fn new(context: &'c ExecutionContext) -> Self {
        Self {
            context,
            roots: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    /// Translate a portable expression into a single native expression
    pub fn translate(&mut self, expr: &PortableExpression) -> QueryResult<NativeExpression> {
        let native = self.visit(expr)?;
        debug!("Translated {} into {}", expr.node_kind(), native);
        Ok(native)
    }

    fn evaluability(&self) -> &LocalEvaluability {
        self.context.evaluability()
    }

    fn resolve_type(&self, descriptor: &TypeDescriptor) -> QueryResult<RuntimeType> {
        self.context.type_resolver().resolve(descriptor)
    }

    fn root_for(&mut self, ty: &RuntimeType) -> QueryResult<QueryableRoot> {
        let descriptor = ty.descriptor();
        if let Some(root) = self.roots.get(&descriptor) {
            return Ok(root.clone());
        }

        let root = self.context.sources().resolve(ty)?;
        debug!(
            "Resolved {} to source '{}' of provider '{}'",
            descriptor,
            root.source(),
            root.provider().name()
        );
        self.roots.insert(descriptor, root.clone());
        Ok(root)
    }

    /// Replace a node by its value when the classifier allows it
    fn fold(&self, node: NativeExpression) -> QueryResult<NativeExpression> {
        if matches!(
            node,
            NativeExpression::Constant { .. }
                | NativeExpression::Lambda(_)
                | NativeExpression::Insert { .. }
        ) || !self.evaluability().can_be_evaluated_locally(&node)
        {
            return Ok(node);
        }

        let value =
            evaluate_expression(&node).map_err(|source| QueryError::evaluation(&node, source))?;
        trace!("Folded {} into {}", node, value);
        Ok(NativeExpression::constant(value, node.result_type()))
    }

    fn visit(&mut self, expr: &PortableExpression) -> QueryResult<NativeExpression> {
        match expr {
            PortableExpression::Constant { value, ty } => {
                let ty = self.resolve_type(ty)?;
                let value = ResultMapper::reconstruct(
                    value,
                    Some(&ty),
                    self.context.type_resolver().as_ref(),
                )
                .map_err(|e| match e {
                    QueryError::Mapping { path, reason } => QueryError::invalid(
                        expr.node_kind(),
                        format!("{} at {}", reason, path),
                    ),
                    other => other,
                })?;
                // captured closure objects arrive untyped
                let ty = match (ty, &value) {
                    (RuntimeType::Any, Value::Record(record)) => {
                        RuntimeType::Record(record.record_type().clone())
                    }
                    (ty, _) => ty,
                };
                Ok(NativeExpression::constant(value, ty))
            }

            PortableExpression::Parameter { name, ty } => {
                let declared = self.resolve_type(ty)?;
                let parameter = self
                    .scopes
                    .iter()
                    .rev()
                    .find(|p| p.name == *name)
                    .cloned()
                    .ok_or_else(|| {
                        QueryError::invalid(
                            expr.node_kind(),
                            "parameter is not bound by an enclosing lambda",
                        )
                    })?;
                if !parameter.ty.accepts(&declared) {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("declared as {} but bound as {}", declared, parameter.ty),
                    ));
                }
                Ok(NativeExpression::Parameter(parameter))
            }

            PortableExpression::Member { target, member } => {
                let target = self.visit(target)?;
                let node = self.member(target, member, &expr.node_kind())?;
                self.fold(node)
            }

            PortableExpression::Binary { op, left, right } => {
                let left = self.visit(left)?;
                let right = self.visit(right)?;
                let (left_ty, right_ty) = (left.result_type(), right.result_type());
                if op.output_type(&left_ty, &right_ty).is_none() {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("operand types {} and {}", left_ty, right_ty),
                    ));
                }
                self.fold(NativeExpression::binary(*op, left, right))
            }

            PortableExpression::Unary { op, operand } => {
                let operand = self.visit(operand)?;
                let ty = operand.result_type();
                if op.output_type(&ty).is_none() {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("operand type {}", ty),
                    ));
                }
                self.fold(NativeExpression::Unary {
                    op: *op,
                    operand: Box::new(operand),
                })
            }

            PortableExpression::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.visit(test)?;
                let if_true = self.visit(if_true)?;
                let if_false = self.visit(if_false)?;
                if !BOOLEAN.accepts(&test.result_type()) {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("test has type {}", test.result_type()),
                    ));
                }
                let (true_ty, false_ty) = (if_true.result_type(), if_false.result_type());
                if !true_ty.accepts(&false_ty) {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("branch types {} and {}", true_ty, false_ty),
                    ));
                }
                self.fold(NativeExpression::Conditional {
                    test: Box::new(test),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                })
            }

            PortableExpression::Convert { operand, ty } => {
                let ty = self.resolve_type(ty)?;
                let operand = self.visit(operand)?;
                self.fold(NativeExpression::Convert {
                    operand: Box::new(operand),
                    ty,
                })
            }

            PortableExpression::Lambda { parameters, .. } => {
                let declared = parameters
                    .iter()
                    .map(|p| self.resolve_type(&p.ty))
                    .collect::<QueryResult<Vec<_>>>()?;
                let lambda = self.lambda(expr, "Lambda", &declared)?;
                Ok(NativeExpression::Lambda(lambda))
            }

            PortableExpression::New { ty: Some(ty), members } => {
                let ty = match self.resolve_type(ty)? {
                    RuntimeType::Record(record) => record,
                    other => {
                        return Err(QueryError::invalid(
                            expr.node_kind(),
                            format!("{} is not a record type", other),
                        ))
                    }
                };
                let node = self.new_record(ty, members, &expr.node_kind())?;
                self.fold(node)
            }

            PortableExpression::New { ty: None, members } => {
                let mut fields = Vec::with_capacity(members.len());
                let mut arguments = Vec::with_capacity(members.len());
                for init in members {
                    if fields.iter().any(|f: &FieldDef| f.name == init.name) {
                        return Err(QueryError::invalid(
                            expr.node_kind(),
                            format!("member {} is initialized twice", init.name),
                        ));
                    }
                    let value = self.visit(&init.value)?;
                    fields.push(FieldDef::new(init.name.clone(), value.result_type()));
                    arguments.push(value);
                }
                self.fold(NativeExpression::New {
                    ty: Arc::new(RecordType::anonymous(fields)),
                    arguments,
                })
            }

            PortableExpression::NewSequence {
                element_type,
                elements,
            } => {
                let element_type = self.resolve_type(element_type)?;
                let elements = elements
                    .iter()
                    .map(|e| self.visit(e))
                    .collect::<QueryResult<Vec<_>>>()?;
                if let Some(bad) = elements
                    .iter()
                    .find(|e| !element_type.accepts(&e.result_type()))
                {
                    return Err(QueryError::invalid(
                        expr.node_kind(),
                        format!("element of type {} in {}", bad.result_type(), element_type),
                    ));
                }
                self.fold(NativeExpression::NewSequence {
                    element_type,
                    elements,
                })
            }

            PortableExpression::QueryRoot { element_type } => {
                let ty = self.resolve_type(element_type)?;
                let root = self.root_for(&ty)?;
                self.fold(NativeExpression::Query(Box::new(NativeQuery::new(root))))
            }

            PortableExpression::Call {
                method,
                instance,
                arguments,
            } => {
                let kind = expr.node_kind();
                let (source, rest) = match instance {
                    Some(instance) => (instance.as_ref(), arguments.as_slice()),
                    None => match arguments.split_first() {
                        Some((source, rest)) => (source, rest),
                        None => {
                            return Err(QueryError::invalid(kind, "missing source argument"))
                        }
                    },
                };
                let node = self.call(method, source, rest, &kind)?;
                self.fold(node)
            }

            PortableExpression::Block { .. } | PortableExpression::TypeIs { .. } => {
                Err(QueryError::unsupported(expr.node_kind()))
            }
        }
    }

    fn member(
        &self,
        target: NativeExpression,
        member: &str,
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        match target.result_type() {
            RuntimeType::Record(record) => {
                let (index, field) = record.field(member).ok_or_else(|| {
                    QueryError::invalid(
                        kind,
                        format!("{} has no member {}", record.descriptor(), member),
                    )
                })?;
                Ok(NativeExpression::Member {
                    index,
                    name: member.to_string(),
                    ty: field.ty.clone(),
                    target: Box::new(target),
                })
            }
            RuntimeType::Sequence(_) | RuntimeType::Scalar(DataType::Varchar)
                if member == "Length" || member == "Count" =>
            {
                Ok(NativeExpression::Call {
                    function: Function::Length,
                    target: Box::new(target),
                    arguments: vec![],
                })
            }
            other => Err(QueryError::invalid(
                kind,
                format!("cannot access member {} on {}", member, other),
            )),
        }
    }

    fn new_record(
        &mut self,
        ty: Arc<RecordType>,
        members: &[MemberInit],
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        let mut arguments: Vec<Option<NativeExpression>> = vec![None; ty.fields().len()];
        for init in members {
            let (index, field) = ty.field(&init.name).ok_or_else(|| {
                QueryError::invalid(
                    kind,
                    format!("{} has no member {}", ty.descriptor(), init.name),
                )
            })?;
            if arguments[index].is_some() {
                return Err(QueryError::invalid(
                    kind,
                    format!("member {} is initialized twice", init.name),
                ));
            }
            let value = self.visit(&init.value)?;
            arguments[index] = Some(self.coerce(value, &field.ty, kind)?);
        }

        let arguments = arguments
            .into_iter()
            .zip(ty.fields())
            .map(|(argument, field)| {
                argument
                    .unwrap_or_else(|| NativeExpression::constant(Value::Null, field.ty.clone()))
            })
            .collect();
        Ok(NativeExpression::New { ty, arguments })
    }

    /// Check a value against a member type, inserting an implicit numeric widening
    fn coerce(
        &self,
        value: NativeExpression,
        target: &RuntimeType,
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        let actual = value.result_type();
        if target.accepts(&actual) {
            return Ok(value);
        }

        let widens = match (actual.scalar(), target.scalar()) {
            (Some(from), Some(to)) => match (from.numeric_rank(), to.numeric_rank()) {
                (Some(from), Some(to)) => from < to,
                _ => false,
            },
            _ => false,
        };
        if !widens {
            return Err(QueryError::invalid(
                kind,
                format!("a value of type {} cannot be stored as {}", actual, target),
            ));
        }

        self.fold(NativeExpression::Convert {
            operand: Box::new(value),
            ty: target.clone(),
        })
    }

    /// Translate a lambda whose parameters are bound to the given types.
    ///
    /// A parameter declared as `core.Object` takes the bound type.
    fn lambda(
        &mut self,
        expr: &PortableExpression,
        kind: &str,
        parameter_types: &[RuntimeType],
    ) -> QueryResult<NativeLambda> {
        let (declarations, body) = match expr {
            PortableExpression::Lambda { parameters, body } => (parameters, body),
            other => {
                return Err(QueryError::invalid(
                    kind,
                    format!("expects a lambda, found {}", other.node_kind()),
                ))
            }
        };
        if declarations.len() != parameter_types.len() {
            return Err(QueryError::invalid(
                kind,
                format!(
                    "expects a lambda of {} parameters, found {}",
                    parameter_types.len(),
                    declarations.len()
                ),
            ));
        }

        let mut parameters = Vec::with_capacity(declarations.len());
        for (declaration, bound) in declarations.iter().zip(parameter_types) {
            let declared = self.resolve_type(&declaration.ty)?;
            let ty = match declared {
                RuntimeType::Any => bound.clone(),
                declared if bound.accepts(&declared) => declared,
                declared => {
                    return Err(QueryError::invalid(
                        kind,
                        format!(
                            "parameter {} is declared as {} but receives {}",
                            declaration.name, declared, bound
                        ),
                    ))
                }
            };
            parameters.push(NativeParameter::new(declaration.name.clone(), ty));
        }

        let depth = self.scopes.len();
        self.scopes.extend(parameters.iter().cloned());
        let body = self.visit(body);
        self.scopes.truncate(depth);

        Ok(NativeLambda::new(parameters, body?))
    }

    fn predicate(
        &mut self,
        expr: &PortableExpression,
        kind: &str,
        element: &RuntimeType,
    ) -> QueryResult<NativeLambda> {
        let lambda = self.lambda(expr, kind, std::slice::from_ref(element))?;
        if !BOOLEAN.accepts(&lambda.return_type()) {
            return Err(QueryError::invalid(
                kind,
                format!("predicate returns {}", lambda.return_type()),
            ));
        }
        Ok(lambda)
    }

    fn expect_query(source: NativeExpression, kind: &str) -> QueryResult<NativeQuery> {
        match source {
            NativeExpression::Query(query) => Ok(*query),
            other => Err(QueryError::invalid(
                kind,
                format!("requires a queryable source, found {}", other.result_type()),
            )),
        }
    }

    fn expect_arguments(
        arguments: &[PortableExpression],
        range: (usize, usize),
        kind: &str,
    ) -> QueryResult<()> {
        let (min, max) = range;
        if arguments.len() < min || arguments.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(QueryError::invalid(
                kind,
                format!("expects {} arguments, found {}", expected, arguments.len()),
            ));
        }
        Ok(())
    }

    fn call(
        &mut self,
        method: &str,
        source: &PortableExpression,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        match method {
            "Where" | "Select" | "OrderBy" | "OrderByDescending" | "ThenBy"
            | "ThenByDescending" | "Skip" | "Take" | "Distinct" | "Join" => {
                let query = Self::expect_query(self.visit(source)?, kind)?;
                let query = self.query_operator(method, query, arguments, kind)?;
                Ok(NativeExpression::Query(Box::new(query)))
            }

            "LoadWith" | "WithTableExpression" | "With" => {
                let query = Self::expect_query(self.visit(source)?, kind)?;
                let query = self.marker(method, query, arguments, kind)?;
                Ok(NativeExpression::Query(Box::new(query)))
            }

            "Insert" => {
                let target = Self::expect_query(self.visit(source)?, kind)?;
                self.insert(target, arguments, kind)
            }

            "Count" | "LongCount" | "Any" | "All" | "First" | "FirstOrDefault" | "Single"
            | "SingleOrDefault" | "Sum" | "Min" | "Max" | "Average" | "Contains" => {
                let source = self.visit(source)?;
                match source {
                    NativeExpression::Query(query) => {
                        let aggregate = self.aggregate(method, &query, arguments, kind)?;
                        Ok(NativeExpression::Aggregate {
                            source: query,
                            aggregate,
                        })
                    }
                    other => self.function(method, other, arguments, kind),
                }
            }

            _ => {
                let source = self.visit(source)?;
                self.function(method, source, arguments, kind)
            }
        }
    }

    fn query_operator(
        &mut self,
        method: &str,
        query: NativeQuery,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<NativeQuery> {
        let element = query.element_type.clone();
        match method {
            "Where" => {
                Self::expect_arguments(arguments, (1, 1), kind)?;
                let predicate = self.predicate(&arguments[0], kind, &element)?;
                Ok(query.compose(QueryOperator::Where(predicate), element))
            }

            "Select" => {
                Self::expect_arguments(arguments, (1, 1), kind)?;
                let selector = self.lambda(&arguments[0], kind, std::slice::from_ref(&element))?;
                let projected = selector.return_type();
                Ok(query.compose(QueryOperator::Select(selector), projected))
            }

            "OrderBy" | "OrderByDescending" | "ThenBy" | "ThenByDescending" => {
                Self::expect_arguments(arguments, (1, 1), kind)?;
                let descending = method.ends_with("Descending");
                let key = self.lambda(&arguments[0], kind, std::slice::from_ref(&element))?;
                if !matches!(key.return_type(), RuntimeType::Scalar(_) | RuntimeType::Any) {
                    return Err(QueryError::invalid(
                        kind,
                        format!("cannot order by values of type {}", key.return_type()),
                    ));
                }

                let operator = if method.starts_with("ThenBy") {
                    if !matches!(
                        query.operators.last(),
                        Some(QueryOperator::OrderBy { .. } | QueryOperator::ThenBy { .. })
                    ) {
                        return Err(QueryError::invalid(
                            kind,
                            "must directly follow OrderBy or another ThenBy",
                        ));
                    }
                    QueryOperator::ThenBy { key, descending }
                } else {
                    QueryOperator::OrderBy { key, descending }
                };
                Ok(query.compose(operator, element))
            }

            "Skip" | "Take" => {
                Self::expect_arguments(arguments, (1, 1), kind)?;
                let count = self.visit(&arguments[0])?;
                if !INT32.accepts(&count.result_type()) {
                    return Err(QueryError::invalid(
                        kind,
                        format!("count has type {}", count.result_type()),
                    ));
                }
                let operator = if method == "Skip" {
                    QueryOperator::Skip(Box::new(count))
                } else {
                    QueryOperator::Take(Box::new(count))
                };
                Ok(query.compose(operator, element))
            }

            "Distinct" => {
                Self::expect_arguments(arguments, (0, 0), kind)?;
                Ok(query.compose(QueryOperator::Distinct, element))
            }

            "Join" => {
                Self::expect_arguments(arguments, (4, 4), kind)?;
                let inner = Self::expect_query(self.visit(&arguments[0])?, kind)?;
                let inner_element = inner.element_type.clone();
                let outer_key = self.lambda(&arguments[1], kind, std::slice::from_ref(&element))?;
                let inner_key =
                    self.lambda(&arguments[2], kind, std::slice::from_ref(&inner_element))?;
                let (outer_ty, inner_ty) = (outer_key.return_type(), inner_key.return_type());
                if BinaryOperator::Eq.output_type(&outer_ty, &inner_ty).is_none() {
                    return Err(QueryError::invalid(
                        kind,
                        format!("key types {} and {} are not comparable", outer_ty, inner_ty),
                    ));
                }
                let result = self.lambda(&arguments[3], kind, &[element, inner_element])?;
                let projected = result.return_type();
                Ok(query.compose(
                    QueryOperator::Join {
                        inner: Box::new(inner),
                        outer_key,
                        inner_key,
                        result,
                    },
                    projected,
                ))
            }

            _ => Err(QueryError::unsupported(kind)),
        }
    }

    fn aggregate(
        &mut self,
        method: &str,
        query: &NativeQuery,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<Aggregate> {
        let element = query.element_type.clone();

        if method == "Contains" {
            // Contains(x) on a query is Any(it => it == x)
            Self::expect_arguments(arguments, (1, 1), kind)?;
            let value = self.visit(&arguments[0])?;
            if BinaryOperator::Eq
                .output_type(&element, &value.result_type())
                .is_none()
            {
                return Err(QueryError::invalid(
                    kind,
                    format!("cannot look for {} in {}", value.result_type(), element),
                ));
            }
            let parameter = NativeParameter::new(SYNTHETIC_PARAMETER, element);
            let body = NativeExpression::binary(
                BinaryOperator::Eq,
                NativeExpression::Parameter(parameter.clone()),
                value,
            );
            return Ok(Aggregate::Any(Some(NativeLambda::new(vec![parameter], body))));
        }

        let has_selector = matches!(method, "Sum" | "Min" | "Max" | "Average");
        let range = if method == "All" { (1, 1) } else { (0, 1) };
        Self::expect_arguments(arguments, range, kind)?;
        let lambda = match arguments.first() {
            Some(argument) if has_selector => Some(self.lambda(
                argument,
                kind,
                std::slice::from_ref(&element),
            )?),
            Some(argument) => Some(self.predicate(argument, kind, &element)?),
            None => None,
        };

        let aggregate = match method {
            "Count" => Aggregate::Count(lambda),
            "LongCount" => Aggregate::LongCount(lambda),
            "Any" => Aggregate::Any(lambda),
            "All" => match lambda {
                Some(predicate) => Aggregate::All(predicate),
                None => return Err(QueryError::invalid(kind, "requires a predicate")),
            },
            "First" | "FirstOrDefault" => Aggregate::First {
                predicate: lambda,
                or_default: method.ends_with("OrDefault"),
            },
            "Single" | "SingleOrDefault" => Aggregate::Single {
                predicate: lambda,
                or_default: method.ends_with("OrDefault"),
            },
            "Sum" => Aggregate::Sum(lambda),
            "Min" => Aggregate::Min(lambda),
            "Max" => Aggregate::Max(lambda),
            "Average" => Aggregate::Average(lambda),
            _ => return Err(QueryError::unsupported(kind)),
        };

        if aggregate.result_type(&element).is_none() {
            return Err(QueryError::invalid(
                kind,
                format!("cannot aggregate values of type {}", element),
            ));
        }
        Ok(aggregate)
    }

    fn marker(
        &mut self,
        method: &str,
        mut query: NativeQuery,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<NativeQuery> {
        Self::expect_arguments(arguments, (1, 1), kind)?;
        let annotation = match method {
            "LoadWith" => {
                let root = RuntimeType::Record(query.root.element_type().clone());
                let selector = self.lambda(&arguments[0], kind, &[root])?;
                QueryAnnotation::LoadWith(member_path(&selector).ok_or_else(|| {
                    QueryError::invalid(kind, "selector must be a member path from its parameter")
                })?)
            }
            _ => {
                let text = match self.visit(&arguments[0])? {
                    NativeExpression::Constant {
                        value: Value::String(text),
                        ..
                    } => text,
                    other => {
                        return Err(QueryError::invalid(
                            kind,
                            format!("expects a constant string, found {}", other),
                        ))
                    }
                };
                if method == "With" {
                    QueryAnnotation::TableHint(text)
                } else {
                    QueryAnnotation::TableExpression(text)
                }
            }
        };

        debug!("Attached {} to source '{}'", annotation, query.root.source());
        query.root.annotate(annotation);
        Ok(query)
    }

    fn insert(
        &mut self,
        target: NativeQuery,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        Self::expect_arguments(arguments, (1, 1), kind)?;
        if !target.operators.is_empty() {
            return Err(QueryError::invalid(
                kind,
                "insert target must be a table, not a composed query",
            ));
        }

        let setter = self.lambda(&arguments[0], kind, &[])?;
        let entity = target.root.element_type().clone();
        let constructs_entity = match setter.body.as_ref() {
            NativeExpression::New { ty, .. } => ty.descriptor() == entity.descriptor(),
            NativeExpression::Constant {
                value: Value::Record(record),
                ..
            } => record.record_type().descriptor() == entity.descriptor(),
            _ => false,
        };
        if !constructs_entity {
            return Err(QueryError::invalid(
                kind,
                format!("setter must construct a single {}", entity.descriptor()),
            ));
        }

        Ok(NativeExpression::Insert {
            target: Box::new(target),
            values: setter.body,
        })
    }

    fn function(
        &mut self,
        method: &str,
        target: NativeExpression,
        arguments: &[PortableExpression],
        kind: &str,
    ) -> QueryResult<NativeExpression> {
        let function =
            Function::from_name(method).ok_or_else(|| QueryError::unsupported(kind))?;
        let arguments = arguments
            .iter()
            .map(|a| self.visit(a))
            .collect::<QueryResult<Vec<_>>>()?;
        let argument_types: Vec<RuntimeType> = arguments.iter().map(|a| a.result_type()).collect();
        if function
            .result_type(&target.result_type(), &argument_types)
            .is_none()
        {
            return Err(QueryError::invalid(
                kind,
                format!(
                    "not applicable to {} with {} arguments",
                    target.result_type(),
                    arguments.len()
                ),
            ));
        }

        Ok(NativeExpression::Call {
            function,
            target: Box::new(target),
            arguments,
        })
    }
}

/// Member names from a lambda's parameter down to its body, if the body is
/// a plain member chain
fn member_path(lambda: &NativeLambda) -> Option<Vec<String>> {
    let parameter = match lambda.parameters.as_slice() {
        [parameter] => parameter,
        _ => return None,
    };

    let mut path = Vec::new();
    let mut node = lambda.body.as_ref();
    loop {
        match node {
            NativeExpression::Member { target, name, .. } => {
                path.push(name.clone());
                node = target;
            }
            NativeExpression::Parameter(p) if p.name == parameter.name && !path.is_empty() => {
                path.reverse();
                return Some(path);
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Aggregate, ParameterDecl};
    use crate::provider::{QueryProvider, RowStream};
    use crate::source::SourceResolver;
    use crate::types::{TypeRegistry, TypeResolver};
    use crate::value::Record;
    use anyhow::Result;

    struct StubProvider;

    impl QueryProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn execute_query(&self, _query: &NativeQuery) -> Result<RowStream> {
            Ok(Box::new(std::iter::empty()))
        }

        fn execute_scalar(&self, _query: &NativeQuery, _aggregate: &Aggregate) -> Result<Value> {
            Ok(Value::Int32(0))
        }

        fn insert(&self, _target: &NativeQuery, _record: Record) -> Result<usize> {
            Ok(1)
        }
    }

    fn order() -> TypeDescriptor {
        TypeDescriptor::named("shop.Order")
    }

    fn context() -> Result<ExecutionContext> {
        let registry = Arc::new(TypeRegistry::new());
        let customer = registry.register(RecordType::new(
            TypeDescriptor::named("shop.Customer"),
            vec![FieldDef::new("Name", RuntimeType::Scalar(DataType::Varchar))],
        ))?;
        let orders = registry.register(RecordType::new(
            order(),
            vec![
                FieldDef::new("Id", INT32),
                FieldDef::new("Amount", RuntimeType::Scalar(DataType::Int64)),
                FieldDef::new("Customer", RuntimeType::Record(customer)),
            ],
        ))?;

        let provider: Arc<dyn QueryProvider> = Arc::new(StubProvider);
        let sources = SourceResolver::factory(move |ty| {
            (ty.descriptor() == orders.descriptor())
                .then(|| QueryableRoot::new(orders.clone(), "Orders", provider.clone()))
        });
        let resolver: Arc<dyn TypeResolver> = registry;
        Ok(ExecutionContext::builder(sources)
            .type_resolver(resolver)
            .build())
    }

    fn amount_over(threshold: PortableExpression) -> PortableExpression {
        PortableExpression::query_root(order()).filter(PortableExpression::lambda1(
            "o",
            order(),
            |o| PortableExpression::gt(o.member("Amount"), threshold),
        ))
    }

    fn single_query(native: NativeExpression) -> NativeQuery {
        match native {
            NativeExpression::Query(query) => *query,
            other => panic!("expected a query, got {}", other),
        }
    }

    #[test]
    fn test_filter_translates_and_folds() -> Result<()> {
        let context = context()?;
        let threshold = PortableExpression::binary(
            BinaryOperator::Mul,
            PortableExpression::int32(50),
            PortableExpression::int32(2),
        );
        let query = single_query(Translator::new(&context).translate(&amount_over(threshold))?);

        assert_eq!(query.root.source(), "Orders");
        assert_eq!(query.operators.len(), 1);
        // constant arithmetic is folded before the provider sees it
        assert_eq!(
            query.operators[0].to_string(),
            "Where(o => (o.Amount > 100))"
        );
        Ok(())
    }

    #[test]
    fn test_folding_can_be_disabled() -> Result<()> {
        let context = ExecutionContext::builder(context()?.sources().clone())
            .type_resolver(context()?.type_resolver().clone())
            .can_be_evaluated_locally(|_| false)
            .build();
        let threshold = PortableExpression::binary(
            BinaryOperator::Mul,
            PortableExpression::int32(50),
            PortableExpression::int32(2),
        );
        let query = single_query(Translator::new(&context).translate(&amount_over(threshold))?);
        assert_eq!(
            query.operators[0].to_string(),
            "Where(o => (o.Amount > (50 * 2)))"
        );
        Ok(())
    }

    #[test]
    fn test_folding_failure_aborts_translation() -> Result<()> {
        let context = context()?;
        let threshold = PortableExpression::binary(
            BinaryOperator::Div,
            PortableExpression::int32(1),
            PortableExpression::int32(0),
        );
        let err = Translator::new(&context)
            .translate(&amount_over(threshold))
            .unwrap_err();
        assert!(matches!(err, QueryError::Evaluation { .. }));
        Ok(())
    }

    #[test]
    fn test_unknown_member_and_unbound_parameter() -> Result<()> {
        let context = context()?;
        let err = Translator::new(&context)
            .translate(&PortableExpression::query_root(order()).filter(
                PortableExpression::lambda1("o", order(), |o| {
                    PortableExpression::gt(o.member("Total"), PortableExpression::int32(1))
                }),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("has no member Total"));

        let err = Translator::new(&context)
            .translate(&PortableExpression::parameter("x", TypeDescriptor::object()))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpression { .. }));
        Ok(())
    }

    #[test]
    fn test_unsupported_nodes_are_named() -> Result<()> {
        let context = context()?;
        let err = Translator::new(&context)
            .translate(&PortableExpression::query_root(order()).call("Zip", vec![]))
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnsupportedExpression { ref node } if node == "Call(Zip)"
        ));

        let err = Translator::new(&context)
            .translate(&PortableExpression::Block {
                expressions: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedExpression { ref node } if node == "Block"));
        Ok(())
    }

    #[test]
    fn test_markers_attach_to_root() -> Result<()> {
        let context = context()?;
        let expr = amount_over(PortableExpression::int32(1))
            .call(
                "LoadWith",
                vec![PortableExpression::lambda1("o", order(), |o| {
                    o.member("Customer")
                })],
            )
            .call("With", vec![PortableExpression::string("NOLOCK")]);
        let query = single_query(Translator::new(&context).translate(&expr)?);

        assert_eq!(query.operators.len(), 1);
        assert_eq!(
            query.root.annotations(),
            &[
                QueryAnnotation::LoadWith(vec!["Customer".to_string()]),
                QueryAnnotation::TableHint("NOLOCK".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_select_projects_anonymous_type() -> Result<()> {
        let context = context()?;
        let expr = PortableExpression::query_root(order()).select(PortableExpression::lambda1(
            "o",
            order(),
            |o| PortableExpression::new_object(None, vec![("Id", o.member("Id"))]),
        ));
        let query = single_query(Translator::new(&context).translate(&expr)?);
        let projected = query.element_type.as_record().unwrap();
        assert!(projected.is_anonymous());
        assert_eq!(projected.fields()[0].name, "Id");
        Ok(())
    }

    #[test]
    fn test_insert_widens_and_requires_entity() -> Result<()> {
        let context = context()?;
        let expr = PortableExpression::query_root(order()).call(
            "Insert",
            vec![PortableExpression::lambda(
                vec![],
                PortableExpression::new_object(
                    Some(order()),
                    vec![
                        ("Id", PortableExpression::int32(1)),
                        ("Amount", PortableExpression::int32(10)),
                    ],
                ),
            )],
        );
        match Translator::new(&context).translate(&expr)? {
            NativeExpression::Insert { values, .. } => match values.as_constant() {
                Some(Value::Record(record)) => {
                    assert_eq!(record.get("Amount"), Some(&Value::Int64(10)));
                    assert_eq!(record.get("Customer"), Some(&Value::Null));
                }
                other => panic!("unexpected values {:?}", other),
            },
            other => panic!("unexpected {}", other),
        }

        let not_entity = PortableExpression::query_root(order()).call(
            "Insert",
            vec![PortableExpression::lambda(vec![], PortableExpression::int32(1))],
        );
        assert!(Translator::new(&context).translate(&not_entity).is_err());
        Ok(())
    }

    #[test]
    fn test_lambda_parameter_type_mismatch() -> Result<()> {
        let context = context()?;
        let expr = PortableExpression::query_root(order()).filter(PortableExpression::lambda(
            vec![ParameterDecl::new("o", TypeDescriptor::scalar(DataType::Int32))],
            PortableExpression::boolean(true),
        ));
        let err = Translator::new(&context).translate(&expr).unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpression { .. }));
        Ok(())
    }

    #[test]
    fn test_contains_on_query_becomes_any() -> Result<()> {
        let context = context()?;
        let expr = PortableExpression::query_root(order())
            .select(PortableExpression::lambda1("o", order(), |o| o.member("Id")))
            .call("Contains", vec![PortableExpression::int32(5)]);
        match Translator::new(&context).translate(&expr)? {
            NativeExpression::Aggregate {
                aggregate: Aggregate::Any(Some(predicate)),
                ..
            } => assert_eq!(predicate.to_string(), "<>it => (<>it == 5)"),
            other => panic!("unexpected {}", other),
        }
        Ok(())
    }
}
