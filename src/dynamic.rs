//! Portable dynamic result representation.
//!
//! A [`DynamicObject`] stands in for one record on the far side of the
//! boundary: an ordered list of named members plus, optionally, the
//! descriptor of the type it was produced from.

use crate::types::TypeDescriptor;
use serde::{Deserialize, Serialize};

/// Self-describing portable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Object(DynamicObject),
    Sequence(Vec<DynamicValue>),
}

impl DynamicValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DynamicValue::Null => "null",
            DynamicValue::Boolean(_) => "Boolean",
            DynamicValue::Int32(_) => "Int32",
            DynamicValue::Int64(_) => "Int64",
            DynamicValue::Float64(_) => "Float64",
            DynamicValue::String(_) => "String",
            DynamicValue::Object(_) => "Object",
            DynamicValue::Sequence(_) => "Sequence",
        }
    }

    pub fn as_object(&self) -> Option<&DynamicObject> {
        match self {
            DynamicValue::Object(object) => Some(object),
            _ => None,
        }
    }
}

/// A named member of a dynamic object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicMember {
    pub name: String,
    pub value: DynamicValue,
}

/// Portable stand-in for one record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicObject {
    /// Descriptor of the originating type, when type annotation was requested
    #[serde(default)]
    pub type_info: Option<TypeDescriptor>,
    #[serde(default)]
    pub members: Vec<DynamicMember>,
}

impl DynamicObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(type_info: TypeDescriptor) -> Self {
        Self {
            type_info: Some(type_info),
            members: Vec::new(),
        }
    }

    /// Set a member, replacing an existing one of the same name in place
    pub fn set(&mut self, name: impl Into<String>, value: DynamicValue) {
        let name = name.into();
        match self.members.iter_mut().find(|m| m.name == name) {
            Some(member) => member.value = value,
            None => self.members.push(DynamicMember { name, value }),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: DynamicValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.value)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_order_and_replace() {
        let mut object = DynamicObject::new()
            .with("B", DynamicValue::Int32(1))
            .with("A", DynamicValue::Null);
        object.set("B", DynamicValue::String("x".to_string()));

        let names: Vec<&str> = object.member_names().collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(object.get("B"), Some(&DynamicValue::String("x".to_string())));
        assert_eq!(object.len(), 2);
    }

    #[test]
    fn test_json_shape() -> anyhow::Result<()> {
        let object = DynamicObject::with_type(TypeDescriptor::named("shop.Order"))
            .with("Id", DynamicValue::Int32(7));
        let json = serde_json::to_string(&object)?;
        let back: DynamicObject = serde_json::from_str(&json)?;
        assert_eq!(back, object);
        Ok(())
    }
}
