//! Native expression tree.
//!
//! The composable form handed to a backing provider. Unlike the portable
//! tree, every type here is resolved, members are resolved to positions, and
//! query operators hang off a concrete [`QueryableRoot`].

use crate::expression::eval::Scope;
use crate::expression::operator::{BinaryOperator, UnaryOperator};
use crate::source::QueryableRoot;
use crate::types::{DataType, RecordType, RuntimeType};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Lambda parameter with its resolved type
#[derive(Debug, Clone, PartialEq)]
pub struct NativeParameter {
    pub name: String,
    pub ty: RuntimeType,
}

impl NativeParameter {
    pub fn new(name: impl Into<String>, ty: RuntimeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeLambda {
    pub parameters: Vec<NativeParameter>,
    pub body: Box<NativeExpression>,
}

impl NativeLambda {
    pub fn new(parameters: Vec<NativeParameter>, body: NativeExpression) -> Self {
        Self {
            parameters,
            body: Box::new(body),
        }
    }

    pub fn return_type(&self) -> RuntimeType {
        self.body.result_type()
    }

    fn bind_with(&self, scope: &Scope<'_>, shadowed: &mut Vec<String>) -> NativeLambda {
        let depth = shadowed.len();
        shadowed.extend(self.parameters.iter().map(|p| p.name.clone()));
        let body = self.body.bind_with(scope, shadowed);
        shadowed.truncate(depth);
        NativeLambda {
            parameters: self.parameters.clone(),
            body: Box::new(body),
        }
    }
}

/// Scalar functions callable on values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Trim,
    Length,
    Abs,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Contains" => Some(Function::Contains),
            "StartsWith" => Some(Function::StartsWith),
            "EndsWith" => Some(Function::EndsWith),
            "ToUpper" => Some(Function::ToUpper),
            "ToLower" => Some(Function::ToLower),
            "Trim" => Some(Function::Trim),
            "Length" | "Count" => Some(Function::Length),
            "Abs" => Some(Function::Abs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Contains => "Contains",
            Function::StartsWith => "StartsWith",
            Function::EndsWith => "EndsWith",
            Function::ToUpper => "ToUpper",
            Function::ToLower => "ToLower",
            Function::Trim => "Trim",
            Function::Length => "Length",
            Function::Abs => "Abs",
        }
    }

    /// Number of arguments besides the target
    pub fn arity(&self) -> usize {
        match self {
            Function::Contains | Function::StartsWith | Function::EndsWith => 1,
            _ => 0,
        }
    }

    pub fn result_type(
        &self,
        target: &RuntimeType,
        arguments: &[RuntimeType],
    ) -> Option<RuntimeType> {
        let string = RuntimeType::Scalar(DataType::Varchar);
        let boolean = RuntimeType::Scalar(DataType::Boolean);
        if arguments.len() != self.arity() {
            return None;
        }

        match self {
            Function::Contains => match target {
                RuntimeType::Sequence(element) => element.accepts(&arguments[0]).then_some(boolean),
                _ => (string.accepts(target) && string.accepts(&arguments[0])).then_some(boolean),
            },
            Function::StartsWith | Function::EndsWith => {
                (string.accepts(target) && string.accepts(&arguments[0])).then_some(boolean)
            }
            Function::ToUpper | Function::ToLower | Function::Trim => {
                string.accepts(target).then_some(string)
            }
            Function::Length => match target {
                RuntimeType::Sequence(_) | RuntimeType::Any => {
                    Some(RuntimeType::Scalar(DataType::Int32))
                }
                RuntimeType::Scalar(DataType::Varchar) => {
                    Some(RuntimeType::Scalar(DataType::Int32))
                }
                _ => None,
            },
            Function::Abs => match target {
                RuntimeType::Any => Some(RuntimeType::Any),
                t if t.is_numeric() => Some(t.clone()),
                _ => None,
            },
        }
    }
}

/// Sequence operators composed onto a queryable root
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Where(NativeLambda),
    Select(NativeLambda),
    OrderBy {
        key: NativeLambda,
        descending: bool,
    },
    ThenBy {
        key: NativeLambda,
        descending: bool,
    },
    Skip(Box<NativeExpression>),
    Take(Box<NativeExpression>),
    Distinct,
    Join {
        inner: Box<NativeQuery>,
        outer_key: NativeLambda,
        inner_key: NativeLambda,
        result: NativeLambda,
    },
}

impl QueryOperator {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOperator::Where(_) => "Where",
            QueryOperator::Select(_) => "Select",
            QueryOperator::OrderBy {
                descending: false, ..
            } => "OrderBy",
            QueryOperator::OrderBy {
                descending: true, ..
            } => "OrderByDescending",
            QueryOperator::ThenBy {
                descending: false, ..
            } => "ThenBy",
            QueryOperator::ThenBy {
                descending: true, ..
            } => "ThenByDescending",
            QueryOperator::Skip(_) => "Skip",
            QueryOperator::Take(_) => "Take",
            QueryOperator::Distinct => "Distinct",
            QueryOperator::Join { .. } => "Join",
        }
    }

    fn bind_with(&self, scope: &Scope<'_>, shadowed: &mut Vec<String>) -> QueryOperator {
        match self {
            QueryOperator::Where(predicate) => {
                QueryOperator::Where(predicate.bind_with(scope, shadowed))
            }
            QueryOperator::Select(selector) => {
                QueryOperator::Select(selector.bind_with(scope, shadowed))
            }
            QueryOperator::OrderBy { key, descending } => QueryOperator::OrderBy {
                key: key.bind_with(scope, shadowed),
                descending: *descending,
            },
            QueryOperator::ThenBy { key, descending } => QueryOperator::ThenBy {
                key: key.bind_with(scope, shadowed),
                descending: *descending,
            },
            QueryOperator::Skip(count) => {
                QueryOperator::Skip(Box::new(count.bind_with(scope, shadowed)))
            }
            QueryOperator::Take(count) => {
                QueryOperator::Take(Box::new(count.bind_with(scope, shadowed)))
            }
            QueryOperator::Distinct => QueryOperator::Distinct,
            QueryOperator::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => QueryOperator::Join {
                inner: Box::new(inner.bind_with(scope, shadowed)),
                outer_key: outer_key.bind_with(scope, shadowed),
                inner_key: inner_key.bind_with(scope, shadowed),
                result: result.bind_with(scope, shadowed),
            },
        }
    }

    fn lambdas(&self) -> Vec<&NativeLambda> {
        match self {
            QueryOperator::Where(l) | QueryOperator::Select(l) => vec![l],
            QueryOperator::OrderBy { key, .. } | QueryOperator::ThenBy { key, .. } => vec![key],
            QueryOperator::Join {
                outer_key,
                inner_key,
                result,
                ..
            } => vec![outer_key, inner_key, result],
            QueryOperator::Skip(_) | QueryOperator::Take(_) | QueryOperator::Distinct => vec![],
        }
    }
}

/// Terminal operators that reduce a query to a single value
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Count(Option<NativeLambda>),
    LongCount(Option<NativeLambda>),
    Any(Option<NativeLambda>),
    All(NativeLambda),
    First {
        predicate: Option<NativeLambda>,
        or_default: bool,
    },
    Single {
        predicate: Option<NativeLambda>,
        or_default: bool,
    },
    Sum(Option<NativeLambda>),
    Min(Option<NativeLambda>),
    Max(Option<NativeLambda>),
    Average(Option<NativeLambda>),
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count(_) => "Count",
            Aggregate::LongCount(_) => "LongCount",
            Aggregate::Any(_) => "Any",
            Aggregate::All(_) => "All",
            Aggregate::First {
                or_default: false, ..
            } => "First",
            Aggregate::First {
                or_default: true, ..
            } => "FirstOrDefault",
            Aggregate::Single {
                or_default: false, ..
            } => "Single",
            Aggregate::Single {
                or_default: true, ..
            } => "SingleOrDefault",
            Aggregate::Sum(_) => "Sum",
            Aggregate::Min(_) => "Min",
            Aggregate::Max(_) => "Max",
            Aggregate::Average(_) => "Average",
        }
    }

    /// Predicate or selector lambda, if any
    pub fn lambda(&self) -> Option<&NativeLambda> {
        match self {
            Aggregate::All(l) => Some(l),
            Aggregate::Count(l)
            | Aggregate::LongCount(l)
            | Aggregate::Any(l)
            | Aggregate::Sum(l)
            | Aggregate::Min(l)
            | Aggregate::Max(l)
            | Aggregate::Average(l) => l.as_ref(),
            Aggregate::First { predicate, .. } | Aggregate::Single { predicate, .. } => {
                predicate.as_ref()
            }
        }
    }

    /// Whether the lambda (if any) selects a value rather than filters
    pub fn has_selector(&self) -> bool {
        matches!(
            self,
            Aggregate::Sum(_) | Aggregate::Min(_) | Aggregate::Max(_) | Aggregate::Average(_)
        )
    }

    pub fn result_type(&self, element: &RuntimeType) -> Option<RuntimeType> {
        let value_type = match (self.has_selector(), self.lambda()) {
            (true, Some(selector)) => selector.return_type(),
            _ => element.clone(),
        };

        match self {
            Aggregate::Count(_) => Some(RuntimeType::Scalar(DataType::Int32)),
            Aggregate::LongCount(_) => Some(RuntimeType::Scalar(DataType::Int64)),
            Aggregate::Any(_) | Aggregate::All(_) => Some(RuntimeType::Scalar(DataType::Boolean)),
            Aggregate::First { .. } | Aggregate::Single { .. } => Some(element.clone()),
            Aggregate::Sum(_) => match value_type {
                RuntimeType::Any => Some(RuntimeType::Any),
                t if t.is_numeric() => Some(t),
                _ => None,
            },
            Aggregate::Average(_) => (value_type == RuntimeType::Any || value_type.is_numeric())
                .then_some(RuntimeType::Scalar(DataType::Float64)),
            Aggregate::Min(_) | Aggregate::Max(_) => match value_type {
                RuntimeType::Any | RuntimeType::Scalar(_) => Some(value_type),
                _ => None,
            },
        }
    }

    fn bind_with(&self, scope: &Scope<'_>, shadowed: &mut Vec<String>) -> Aggregate {
        let bind = |l: &Option<NativeLambda>, shadowed: &mut Vec<String>| {
            l.as_ref().map(|l| l.bind_with(scope, shadowed))
        };
        match self {
            Aggregate::Count(l) => Aggregate::Count(bind(l, shadowed)),
            Aggregate::LongCount(l) => Aggregate::LongCount(bind(l, shadowed)),
            Aggregate::Any(l) => Aggregate::Any(bind(l, shadowed)),
            Aggregate::All(l) => Aggregate::All(l.bind_with(scope, shadowed)),
            Aggregate::First {
                predicate,
                or_default,
            } => Aggregate::First {
                predicate: bind(predicate, shadowed),
                or_default: *or_default,
            },
            Aggregate::Single {
                predicate,
                or_default,
            } => Aggregate::Single {
                predicate: bind(predicate, shadowed),
                or_default: *or_default,
            },
            Aggregate::Sum(l) => Aggregate::Sum(bind(l, shadowed)),
            Aggregate::Min(l) => Aggregate::Min(bind(l, shadowed)),
            Aggregate::Max(l) => Aggregate::Max(bind(l, shadowed)),
            Aggregate::Average(l) => Aggregate::Average(bind(l, shadowed)),
        }
    }
}

/// A queryable root with the operators composed onto it
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub root: QueryableRoot,
    pub operators: Vec<QueryOperator>,
    /// Element type after all operators
    pub element_type: RuntimeType,
}

impl NativeQuery {
    pub fn new(root: QueryableRoot) -> Self {
        let element_type = RuntimeType::Record(root.element_type().clone());
        Self {
            root,
            operators: Vec::new(),
            element_type,
        }
    }

    /// Compose an operator, recording the resulting element type
    pub fn compose(mut self, operator: QueryOperator, element_type: RuntimeType) -> Self {
        self.operators.push(operator);
        self.element_type = element_type;
        self
    }

    /// Replace free parameters bound in `scope` with constants
    pub fn bind(&self, scope: &Scope<'_>) -> NativeQuery {
        self.bind_with(scope, &mut Vec::new())
    }

    fn bind_with(&self, scope: &Scope<'_>, shadowed: &mut Vec<String>) -> NativeQuery {
        NativeQuery {
            root: self.root.clone(),
            operators: self
                .operators
                .iter()
                .map(|op| op.bind_with(scope, shadowed))
                .collect(),
            element_type: self.element_type.clone(),
        }
    }

    fn any_node(&self, pred: &dyn Fn(&NativeExpression) -> bool) -> bool {
        self.operators.iter().any(|op| match op {
            QueryOperator::Skip(count) | QueryOperator::Take(count) => count.any_node(pred),
            QueryOperator::Join { inner, .. } if inner.any_node(pred) => true,
            other => other.lambdas().iter().any(|l| l.body.any_node(pred)),
        })
    }
}

/// Native expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum NativeExpression {
    Constant {
        value: Value,
        ty: RuntimeType,
    },
    Parameter(NativeParameter),
    Member {
        target: Box<NativeExpression>,
        index: usize,
        name: String,
        ty: RuntimeType,
    },
    Binary {
        op: BinaryOperator,
        left: Box<NativeExpression>,
        right: Box<NativeExpression>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<NativeExpression>,
    },
    Conditional {
        test: Box<NativeExpression>,
        if_true: Box<NativeExpression>,
        if_false: Box<NativeExpression>,
    },
    Convert {
        operand: Box<NativeExpression>,
        ty: RuntimeType,
    },
    Lambda(NativeLambda),
    New {
        ty: Arc<RecordType>,
        arguments: Vec<NativeExpression>,
    },
    NewSequence {
        element_type: RuntimeType,
        elements: Vec<NativeExpression>,
    },
    Call {
        function: Function,
        target: Box<NativeExpression>,
        arguments: Vec<NativeExpression>,
    },
    Query(Box<NativeQuery>),
    Aggregate {
        source: Box<NativeQuery>,
        aggregate: Aggregate,
    },
    Insert {
        target: Box<NativeQuery>,
        values: Box<NativeExpression>,
    },
}

impl NativeExpression {
    pub fn constant(value: Value, ty: RuntimeType) -> Self {
        NativeExpression::Constant { value, ty }
    }

    pub fn binary(op: BinaryOperator, left: Self, right: Self) -> Self {
        NativeExpression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, NativeExpression::Constant { .. })
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            NativeExpression::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Short name of the node kind
    pub fn node_kind(&self) -> &'static str {
        match self {
            NativeExpression::Constant { .. } => "Constant",
            NativeExpression::Parameter(_) => "Parameter",
            NativeExpression::Member { .. } => "Member",
            NativeExpression::Binary { .. } => "Binary",
            NativeExpression::Unary { .. } => "Unary",
            NativeExpression::Conditional { .. } => "Conditional",
            NativeExpression::Convert { .. } => "Convert",
            NativeExpression::Lambda(_) => "Lambda",
            NativeExpression::New { .. } => "New",
            NativeExpression::NewSequence { .. } => "NewSequence",
            NativeExpression::Call { .. } => "Call",
            NativeExpression::Query(_) => "Query",
            NativeExpression::Aggregate { .. } => "Aggregate",
            NativeExpression::Insert { .. } => "Insert",
        }
    }

    /// Static result type of this node
    pub fn result_type(&self) -> RuntimeType {
        match self {
            NativeExpression::Constant { ty, .. } => ty.clone(),
            NativeExpression::Parameter(p) => p.ty.clone(),
            NativeExpression::Member { ty, .. } => ty.clone(),
            NativeExpression::Binary { op, left, right } => op
                .output_type(&left.result_type(), &right.result_type())
                .unwrap_or(RuntimeType::Any),
            NativeExpression::Unary { op, operand } => op
                .output_type(&operand.result_type())
                .unwrap_or(RuntimeType::Any),
            NativeExpression::Conditional {
                if_true, if_false, ..
            } => match if_true.result_type() {
                RuntimeType::Any => if_false.result_type(),
                ty => ty,
            },
            NativeExpression::Convert { ty, .. } => ty.clone(),
            NativeExpression::Lambda(_) => RuntimeType::Any,
            NativeExpression::New { ty, .. } => RuntimeType::Record(ty.clone()),
            NativeExpression::NewSequence { element_type, .. } => {
                RuntimeType::sequence(element_type.clone())
            }
            NativeExpression::Call {
                function,
                target,
                arguments,
            } => {
                let argument_types: Vec<RuntimeType> =
                    arguments.iter().map(|a| a.result_type()).collect();
                function
                    .result_type(&target.result_type(), &argument_types)
                    .unwrap_or(RuntimeType::Any)
            }
            NativeExpression::Query(query) => RuntimeType::sequence(query.element_type.clone()),
            NativeExpression::Aggregate { source, aggregate } => aggregate
                .result_type(&source.element_type)
                .unwrap_or(RuntimeType::Any),
            NativeExpression::Insert { .. } => RuntimeType::Scalar(DataType::Int32),
        }
    }

    /// Whether this node or any node below it (lambda bodies and query
    /// operators included) satisfies `pred`
    pub fn any_node(&self, pred: &dyn Fn(&NativeExpression) -> bool) -> bool {
        if pred(self) {
            return true;
        }

        match self {
            NativeExpression::Constant { .. } | NativeExpression::Parameter(_) => false,
            NativeExpression::Member { target, .. } => target.any_node(pred),
            NativeExpression::Binary { left, right, .. } => {
                left.any_node(pred) || right.any_node(pred)
            }
            NativeExpression::Unary { operand, .. } | NativeExpression::Convert { operand, .. } => {
                operand.any_node(pred)
            }
            NativeExpression::Conditional {
                test,
                if_true,
                if_false,
            } => test.any_node(pred) || if_true.any_node(pred) || if_false.any_node(pred),
            NativeExpression::Lambda(lambda) => lambda.body.any_node(pred),
            NativeExpression::New { arguments, .. } => arguments.iter().any(|a| a.any_node(pred)),
            NativeExpression::NewSequence { elements, .. } => {
                elements.iter().any(|e| e.any_node(pred))
            }
            NativeExpression::Call {
                target, arguments, ..
            } => target.any_node(pred) || arguments.iter().any(|a| a.any_node(pred)),
            NativeExpression::Query(query) => query.any_node(pred),
            NativeExpression::Aggregate { source, aggregate } => {
                source.any_node(pred) || aggregate.lambda().is_some_and(|l| l.body.any_node(pred))
            }
            NativeExpression::Insert { target, values } => {
                target.any_node(pred) || values.any_node(pred)
            }
        }
    }

    /// Replace free parameters bound in `scope` with constants
    pub fn bind(&self, scope: &Scope<'_>) -> NativeExpression {
        self.bind_with(scope, &mut Vec::new())
    }

    fn bind_with(&self, scope: &Scope<'_>, shadowed: &mut Vec<String>) -> NativeExpression {
        let bind = |e: &NativeExpression, shadowed: &mut Vec<String>| {
            Box::new(e.bind_with(scope, shadowed))
        };

        match self {
            NativeExpression::Parameter(p) if !shadowed.contains(&p.name) => {
                match scope.lookup(&p.name) {
                    Some(value) => NativeExpression::constant(value.clone(), p.ty.clone()),
                    None => self.clone(),
                }
            }
            NativeExpression::Constant { .. } | NativeExpression::Parameter(_) => self.clone(),
            NativeExpression::Member {
                target,
                index,
                name,
                ty,
            } => NativeExpression::Member {
                target: bind(target, shadowed),
                index: *index,
                name: name.clone(),
                ty: ty.clone(),
            },
            NativeExpression::Binary { op, left, right } => NativeExpression::Binary {
                op: *op,
                left: bind(left, shadowed),
                right: bind(right, shadowed),
            },
            NativeExpression::Unary { op, operand } => NativeExpression::Unary {
                op: *op,
                operand: bind(operand, shadowed),
            },
            NativeExpression::Conditional {
                test,
                if_true,
                if_false,
            } => NativeExpression::Conditional {
                test: bind(test, shadowed),
                if_true: bind(if_true, shadowed),
                if_false: bind(if_false, shadowed),
            },
            NativeExpression::Convert { operand, ty } => NativeExpression::Convert {
                operand: bind(operand, shadowed),
                ty: ty.clone(),
            },
            NativeExpression::Lambda(lambda) => {
                NativeExpression::Lambda(lambda.bind_with(scope, shadowed))
            }
            NativeExpression::New { ty, arguments } => NativeExpression::New {
                ty: ty.clone(),
                arguments: arguments
                    .iter()
                    .map(|a| a.bind_with(scope, shadowed))
                    .collect(),
            },
            NativeExpression::NewSequence {
                element_type,
                elements,
            } => NativeExpression::NewSequence {
                element_type: element_type.clone(),
                elements: elements
                    .iter()
                    .map(|e| e.bind_with(scope, shadowed))
                    .collect(),
            },
            NativeExpression::Call {
                function,
                target,
                arguments,
            } => NativeExpression::Call {
                function: *function,
                target: bind(target, shadowed),
                arguments: arguments
                    .iter()
                    .map(|a| a.bind_with(scope, shadowed))
                    .collect(),
            },
            NativeExpression::Query(query) => {
                NativeExpression::Query(Box::new(query.bind_with(scope, shadowed)))
            }
            NativeExpression::Aggregate { source, aggregate } => NativeExpression::Aggregate {
                source: Box::new(source.bind_with(scope, shadowed)),
                aggregate: aggregate.bind_with(scope, shadowed),
            },
            NativeExpression::Insert { target, values } => NativeExpression::Insert {
                target: Box::new(target.bind_with(scope, shadowed)),
                values: bind(values, shadowed),
            },
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for NativeLambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameters.as_slice() {
            [single] => write!(f, "{} => {}", single.name, self.body),
            parameters => {
                let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
                write!(f, "({}) => {}", names.join(", "), self.body)
            }
        }
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Where(l) | QueryOperator::Select(l) => {
                write!(f, "{}({})", self.name(), l)
            }
            QueryOperator::OrderBy { key, .. } | QueryOperator::ThenBy { key, .. } => {
                write!(f, "{}({})", self.name(), key)
            }
            QueryOperator::Skip(count) | QueryOperator::Take(count) => {
                write!(f, "{}({})", self.name(), count)
            }
            QueryOperator::Distinct => write!(f, "Distinct()"),
            QueryOperator::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => write!(
                f,
                "Join({}, {}, {}, {})",
                inner, outer_key, inner_key, result
            ),
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", self.root.source())?;
        for operator in &self.operators {
            write!(f, ".{}", operator)?;
        }
        Ok(())
    }
}

impl fmt::Display for NativeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeExpression::Constant { value, .. } => write!(f, "{}", value),
            NativeExpression::Parameter(p) => write!(f, "{}", p.name),
            NativeExpression::Member { target, name, .. } => write!(f, "{}.{}", target, name),
            NativeExpression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            NativeExpression::Unary { op, operand } => write!(f, "{}{}", op.as_str(), operand),
            NativeExpression::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            NativeExpression::Convert { operand, ty } => write!(f, "({}){}", ty, operand),
            NativeExpression::Lambda(lambda) => write!(f, "{}", lambda),
            NativeExpression::New { ty, arguments } => {
                write!(f, "new {}(", ty.descriptor())?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            NativeExpression::NewSequence { elements, .. } => {
                write!(f, "[")?;
                write_list(f, elements)?;
                write!(f, "]")
            }
            NativeExpression::Call {
                function,
                target,
                arguments,
            } => {
                write!(f, "{}.{}(", target, function.name())?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            NativeExpression::Query(query) => write!(f, "{}", query),
            NativeExpression::Aggregate { source, aggregate } => {
                write!(f, "{}.{}(", source, aggregate.name())?;
                if let Some(lambda) = aggregate.lambda() {
                    write!(f, "{}", lambda)?;
                }
                write!(f, ")")
            }
            NativeExpression::Insert { target, values } => {
                write!(f, "{}.Insert({})", target, values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDef, TypeDescriptor};

    fn order_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            TypeDescriptor::named("shop.Order"),
            vec![FieldDef::new("Amount", RuntimeType::Scalar(DataType::Int32))],
        ))
    }

    fn amount_of(parameter: &str) -> NativeExpression {
        NativeExpression::Member {
            target: Box::new(NativeExpression::Parameter(NativeParameter::new(
                parameter,
                RuntimeType::Record(order_type()),
            ))),
            index: 0,
            name: "Amount".to_string(),
            ty: RuntimeType::Scalar(DataType::Int32),
        }
    }

    #[test]
    fn test_result_types() {
        let sum = NativeExpression::binary(
            BinaryOperator::Add,
            amount_of("o"),
            NativeExpression::constant(Value::Int64(1), RuntimeType::Scalar(DataType::Int64)),
        );
        assert_eq!(sum.result_type(), RuntimeType::Scalar(DataType::Int64));

        let length = NativeExpression::Call {
            function: Function::Length,
            target: Box::new(NativeExpression::constant(
                Value::String("abc".to_string()),
                RuntimeType::Scalar(DataType::Varchar),
            )),
            arguments: vec![],
        };
        assert_eq!(length.result_type(), RuntimeType::Scalar(DataType::Int32));
    }

    #[test]
    fn test_display() {
        let predicate = NativeLambda::new(
            vec![NativeParameter::new("o", RuntimeType::Record(order_type()))],
            NativeExpression::binary(
                BinaryOperator::Gt,
                amount_of("o"),
                NativeExpression::constant(Value::Int32(100), RuntimeType::Scalar(DataType::Int32)),
            ),
        );
        assert_eq!(predicate.to_string(), "o => (o.Amount > 100)");
    }

    #[test]
    fn test_bind_respects_shadowing() {
        let outer = Value::Record(
            crate::value::Record::new(order_type(), vec![Value::Int32(7)]).unwrap(),
        );
        let bindings = [("o", &outer)];
        let scope = Scope::new(&bindings);

        // free `o` is replaced
        let bound = amount_of("o").bind(&scope);
        assert_eq!(bound.to_string(), "Record(shop.Order).Amount");

        // `o` bound by an inner lambda is left alone
        let lambda = NativeExpression::Lambda(NativeLambda::new(
            vec![NativeParameter::new("o", RuntimeType::Record(order_type()))],
            amount_of("o"),
        ));
        assert_eq!(lambda.bind(&scope), lambda);
    }

    #[test]
    fn test_any_node_reaches_lambda_bodies() {
        let lambda = NativeExpression::Lambda(NativeLambda::new(vec![], amount_of("o")));
        assert!(lambda.any_node(&|n| matches!(n, NativeExpression::Parameter(_))));
        assert!(!lambda.any_node(&|n| matches!(n, NativeExpression::Query(_))));
    }
}
