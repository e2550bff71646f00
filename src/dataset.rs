//! Dataset and query files for the command-line tool.
//!
//! A dataset is a JSON document declaring record types and the tables that
//! hold their rows:
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "shop.Order", "fields": [
//!         { "name": "Id", "type": "Int32" },
//!         { "name": "Tags", "type": "String[]" } ] }
//!   ],
//!   "tables": [
//!     { "name": "Orders", "type": "shop.Order", "rows": [ { "Id": 1, "Tags": [] } ] }
//!   ]
//! }
//! ```
//!
//! Field types are built-in scalar names, `Object`, a previously declared
//! record type, or any of those followed by `[]`. Queries are portable
//! expressions, stored as JSON or as bincode when the file ends in `.bin`.

use crate::codec;
use crate::dynamic::{DynamicObject, DynamicValue};
use crate::engine::MemoryDatabase;
use crate::executor::QueryOutcome;
use crate::expression::PortableExpression;
use crate::mapper::ResultMapper;
use crate::types::{DataType, FieldDef, RecordType, RuntimeType, TypeDescriptor, TypeResolver};
use crate::value::Value;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetFile {
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub tables: Vec<TableDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Dotted full name, e.g. `shop.Order`
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDecl {
    pub name: String,
    /// Full name of the record type of the rows
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub fn load_dataset(path: &Path) -> Result<DatasetFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid dataset: {:?}", path))
}

pub fn load_query(path: &Path) -> Result<PortableExpression> {
    if path.extension().is_some_and(|ext| ext == "bin") {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read query: {:?}", path))?;
        return codec::decode_expression(&bytes)
            .with_context(|| format!("Invalid query payload: {:?}", path));
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid query: {:?}", path))
}

/// Parse a field type name into a descriptor
pub fn parse_type_name(name: &str) -> TypeDescriptor {
    if let Some(element) = name.strip_suffix("[]") {
        return TypeDescriptor::sequence(parse_type_name(element));
    }
    match name {
        "Object" => TypeDescriptor::object(),
        _ => match DataType::from_name(name) {
            Some(data_type) => TypeDescriptor::scalar(data_type),
            None => TypeDescriptor::named(name),
        },
    }
}

/// Create an in-memory database holding the dataset
pub fn build_database(dataset: &DatasetFile) -> Result<Arc<MemoryDatabase>> {
    let db = Arc::new(MemoryDatabase::new("memory"));
    let registry = db.type_registry().clone();

    for decl in &dataset.types {
        let fields = decl
            .fields
            .iter()
            .map(|field| {
                let ty = registry
                    .resolve(&parse_type_name(&field.ty))
                    .with_context(|| format!("Field {}.{}", decl.name, field.name))?;
                Ok(FieldDef::new(field.name.clone(), ty))
            })
            .collect::<Result<Vec<_>>>()?;
        db.register_type(RecordType::new(TypeDescriptor::named(&decl.name), fields))?;
        debug!("Registered type {}", decl.name);
    }

    for table in &dataset.tables {
        let element_type = match registry.resolve(&TypeDescriptor::named(&table.element_type))? {
            RuntimeType::Record(record) => record,
            other => bail!("Table '{}' must hold a record type, not {}", table.name, other),
        };
        db.create_table(&table.name, element_type.clone())?;

        let expected = RuntimeType::Record(element_type);
        let mut rows = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            let object = json_object(row);
            let row = DynamicValue::Object(object);
            match ResultMapper::reconstruct(&row, Some(&expected), &*registry)
                .with_context(|| format!("Table '{}' row {}", table.name, i))?
            {
                Value::Record(record) => rows.push(record.values().to_vec()),
                other => bail!("Table '{}' row {} is {}", table.name, i, other.kind_name()),
            }
        }
        let inserted = db.insert_rows(&table.name, rows)?;
        info!("Loaded {} rows into '{}'", inserted, table.name);
    }

    Ok(db)
}

/// Convert parsed JSON into the portable value form.
///
/// Integers that fit 32 bits become Int32; reconstruction widens them when
/// the member type asks for more.
pub fn json_to_dynamic(value: &serde_json::Value) -> DynamicValue {
    match value {
        serde_json::Value::Null => DynamicValue::Null,
        serde_json::Value::Bool(b) => DynamicValue::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => match i32::try_from(i) {
                Ok(small) => DynamicValue::Int32(small),
                Err(_) => DynamicValue::Int64(i),
            },
            None => DynamicValue::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => DynamicValue::String(s.clone()),
        serde_json::Value::Array(items) => {
            DynamicValue::Sequence(items.iter().map(json_to_dynamic).collect())
        }
        serde_json::Value::Object(map) => DynamicValue::Object(json_object(map)),
    }
}

fn json_object(map: &serde_json::Map<String, serde_json::Value>) -> DynamicObject {
    let mut object = DynamicObject::new();
    for (name, value) in map {
        object.set(name.clone(), json_to_dynamic(value));
    }
    object
}

/// Plain JSON rendering of portable values; type information goes under `$type`
pub fn dynamic_to_json(value: &DynamicValue) -> serde_json::Value {
    match value {
        DynamicValue::Null => serde_json::Value::Null,
        DynamicValue::Boolean(b) => serde_json::Value::Bool(*b),
        DynamicValue::Int32(n) => serde_json::Value::from(*n),
        DynamicValue::Int64(n) => serde_json::Value::from(*n),
        DynamicValue::Float64(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        DynamicValue::String(s) => serde_json::Value::String(s.clone()),
        DynamicValue::Sequence(items) => {
            serde_json::Value::Array(items.iter().map(dynamic_to_json).collect())
        }
        DynamicValue::Object(object) => {
            let mut map = serde_json::Map::new();
            if let Some(type_info) = &object.type_info {
                map.insert("$type".to_string(), serde_json::Value::String(type_info.to_string()));
            }
            for member in &object.members {
                map.insert(member.name.clone(), dynamic_to_json(&member.value));
            }
            serde_json::Value::Object(map)
        }
    }
}

pub fn outcome_to_json(outcome: &QueryOutcome) -> serde_json::Value {
    match outcome {
        QueryOutcome::Scalar(value) => dynamic_to_json(value),
        QueryOutcome::Sequence(items) => {
            serde_json::Value::Array(items.iter().map(dynamic_to_json).collect())
        }
    }
}
