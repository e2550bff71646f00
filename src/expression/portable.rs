//! Portable expression tree.
//!
//! This is the serializable form a remote caller builds and ships across the
//! boundary. Every node carries the type descriptors it needs, so the tree can
//! be translated with nothing but a type resolver and a source resolver.

use crate::dynamic::DynamicValue;
use crate::expression::operator::{BinaryOperator, UnaryOperator};
use crate::types::{DataType, TypeDescriptor};
use serde::{Deserialize, Serialize};

/// Lambda parameter declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl ParameterDecl {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Member initializer of a `New` node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInit {
    pub name: String,
    pub value: PortableExpression,
}

/// Portable expression tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableExpression {
    /// Constant value together with its declared type
    Constant {
        value: DynamicValue,
        ty: TypeDescriptor,
    },

    /// Reference to a lambda parameter
    Parameter { name: String, ty: TypeDescriptor },

    /// Member access on a record value
    Member {
        target: Box<PortableExpression>,
        member: String,
    },

    Binary {
        op: BinaryOperator,
        left: Box<PortableExpression>,
        right: Box<PortableExpression>,
    },

    Unary {
        op: UnaryOperator,
        operand: Box<PortableExpression>,
    },

    Conditional {
        test: Box<PortableExpression>,
        if_true: Box<PortableExpression>,
        if_false: Box<PortableExpression>,
    },

    /// Explicit conversion to another type
    Convert {
        operand: Box<PortableExpression>,
        ty: TypeDescriptor,
    },

    Lambda {
        parameters: Vec<ParameterDecl>,
        body: Box<PortableExpression>,
    },

    /// Object construction; `ty` is `None` for anonymous projections
    New {
        ty: Option<TypeDescriptor>,
        members: Vec<MemberInit>,
    },

    NewSequence {
        element_type: TypeDescriptor,
        elements: Vec<PortableExpression>,
    },

    /// The queryable source of an entity type
    QueryRoot { element_type: TypeDescriptor },

    /// Method call; query operators are static-style with the source first
    Call {
        method: String,
        instance: Option<Box<PortableExpression>>,
        arguments: Vec<PortableExpression>,
    },

    /// Statement block
    Block { expressions: Vec<PortableExpression> },

    /// Runtime type test
    TypeIs {
        operand: Box<PortableExpression>,
        ty: TypeDescriptor,
    },
}

impl PortableExpression {
    /// Short name of the node kind, used in diagnostics
    pub fn node_kind(&self) -> String {
        match self {
            PortableExpression::Constant { .. } => "Constant".to_string(),
            PortableExpression::Parameter { name, .. } => format!("Parameter({})", name),
            PortableExpression::Member { member, .. } => format!("Member({})", member),
            PortableExpression::Binary { op, .. } => format!("Binary({})", op.as_str()),
            PortableExpression::Unary { op, .. } => format!("Unary({})", op.as_str()),
            PortableExpression::Conditional { .. } => "Conditional".to_string(),
            PortableExpression::Convert { ty, .. } => format!("Convert({})", ty),
            PortableExpression::Lambda { .. } => "Lambda".to_string(),
            PortableExpression::New { ty: Some(ty), .. } => format!("New({})", ty),
            PortableExpression::New { ty: None, .. } => "New(anonymous)".to_string(),
            PortableExpression::NewSequence { .. } => "NewSequence".to_string(),
            PortableExpression::QueryRoot { element_type } => {
                format!("QueryRoot({})", element_type)
            }
            PortableExpression::Call { method, .. } => format!("Call({})", method),
            PortableExpression::Block { .. } => "Block".to_string(),
            PortableExpression::TypeIs { .. } => "TypeIs".to_string(),
        }
    }

    pub fn constant(value: DynamicValue, ty: TypeDescriptor) -> Self {
        PortableExpression::Constant { value, ty }
    }

    pub fn int32(value: i32) -> Self {
        Self::constant(DynamicValue::Int32(value), TypeDescriptor::scalar(DataType::Int32))
    }

    pub fn int64(value: i64) -> Self {
        Self::constant(DynamicValue::Int64(value), TypeDescriptor::scalar(DataType::Int64))
    }

    pub fn float64(value: f64) -> Self {
        Self::constant(
            DynamicValue::Float64(value),
            TypeDescriptor::scalar(DataType::Float64),
        )
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::constant(
            DynamicValue::String(value.into()),
            TypeDescriptor::scalar(DataType::Varchar),
        )
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(
            DynamicValue::Boolean(value),
            TypeDescriptor::scalar(DataType::Boolean),
        )
    }

    pub fn null(ty: TypeDescriptor) -> Self {
        Self::constant(DynamicValue::Null, ty)
    }

    pub fn parameter(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        PortableExpression::Parameter {
            name: name.into(),
            ty,
        }
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        PortableExpression::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    pub fn binary(op: BinaryOperator, left: Self, right: Self) -> Self {
        PortableExpression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Self) -> Self {
        PortableExpression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn eq(left: Self, right: Self) -> Self {
        Self::binary(BinaryOperator::Eq, left, right)
    }

    pub fn gt(left: Self, right: Self) -> Self {
        Self::binary(BinaryOperator::Gt, left, right)
    }

    pub fn lt(left: Self, right: Self) -> Self {
        Self::binary(BinaryOperator::Lt, left, right)
    }

    pub fn and(left: Self, right: Self) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    pub fn conditional(test: Self, if_true: Self, if_false: Self) -> Self {
        PortableExpression::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn convert(self, ty: TypeDescriptor) -> Self {
        PortableExpression::Convert {
            operand: Box::new(self),
            ty,
        }
    }

    pub fn lambda(parameters: Vec<ParameterDecl>, body: Self) -> Self {
        PortableExpression::Lambda {
            parameters,
            body: Box::new(body),
        }
    }

    /// Single-parameter lambda `name => body(name)`
    pub fn lambda1(
        name: &str,
        ty: TypeDescriptor,
        body: impl FnOnce(PortableExpression) -> PortableExpression,
    ) -> Self {
        let parameter = Self::parameter(name, ty.clone());
        Self::lambda(vec![ParameterDecl::new(name, ty)], body(parameter))
    }

    pub fn new_object(
        ty: Option<TypeDescriptor>,
        members: Vec<(&str, PortableExpression)>,
    ) -> Self {
        PortableExpression::New {
            ty,
            members: members
                .into_iter()
                .map(|(name, value)| MemberInit {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        }
    }

    pub fn new_sequence(element_type: TypeDescriptor, elements: Vec<PortableExpression>) -> Self {
        PortableExpression::NewSequence {
            element_type,
            elements,
        }
    }

    pub fn query_root(element_type: TypeDescriptor) -> Self {
        PortableExpression::QueryRoot { element_type }
    }

    /// Static-style call with `self` as the first argument
    pub fn call(self, method: &str, mut arguments: Vec<PortableExpression>) -> Self {
        arguments.insert(0, self);
        PortableExpression::Call {
            method: method.to_string(),
            instance: None,
            arguments,
        }
    }

    /// Instance call on `self`
    pub fn invoke(self, method: &str, arguments: Vec<PortableExpression>) -> Self {
        PortableExpression::Call {
            method: method.to_string(),
            instance: Some(Box::new(self)),
            arguments,
        }
    }

    pub fn filter(self, predicate: Self) -> Self {
        self.call("Where", vec![predicate])
    }

    pub fn select(self, selector: Self) -> Self {
        self.call("Select", vec![selector])
    }

    pub fn order_by(self, key: Self) -> Self {
        self.call("OrderBy", vec![key])
    }

    pub fn order_by_descending(self, key: Self) -> Self {
        self.call("OrderByDescending", vec![key])
    }

    pub fn then_by(self, key: Self) -> Self {
        self.call("ThenBy", vec![key])
    }

    pub fn skip(self, count: i32) -> Self {
        self.call("Skip", vec![Self::int32(count)])
    }

    pub fn take(self, count: i32) -> Self {
        self.call("Take", vec![Self::int32(count)])
    }

    pub fn distinct(self) -> Self {
        self.call("Distinct", vec![])
    }

    pub fn count(self) -> Self {
        self.call("Count", vec![])
    }
}
