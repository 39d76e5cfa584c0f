//! Declarative module input schemas.
//!
//! A schema is data, not code, so it can be shared once between the agent
//! (which validates before dispatching to `handle`) and the coordinator
//! (which validates before publishing), per DESIGN NOTES "module contract
//! abstraction".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Other field names in the input that are accepted in place of `name`
    /// (e.g. `ping_module` accepts `target` as a synonym of `host`).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Inclusive lower bound, for `Int` fields (e.g. `count >= 1`).
    #[serde(default)]
    pub min_int: Option<i64>,
}

impl FieldSpec {
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self { name: name.to_string(), field_type, aliases: vec![], required: true, default: None, min_int: None }
    }

    pub fn optional(name: &str, field_type: FieldType, default: Value) -> Self {
        Self { name: name.to_string(), field_type, aliases: vec![], required: false, default: Some(default), min_int: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn with_min_int(mut self, min: i64) -> Self {
        self.min_int = Some(min);
        self
    }
}

/// A module's declared input contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSchema {
    pub module_name: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{0}' has wrong type, expected {1:?}")]
    WrongType(String, FieldType),
    #[error("field '{0}' must be >= {1}")]
    BelowMinimum(String, i64),
}

/// Validates `input` against `schema`, filling defaults for absent optional
/// fields and resolving aliases, and returns the normalized object.
pub fn validate(schema: &ModuleSchema, input: &Value) -> Result<Value, ValidationError> {
    let input_obj = input.as_object().cloned().unwrap_or_default();
    let mut output = serde_json::Map::new();

    // Carry through fields the schema doesn't know about (e.g. `id`).
    for (k, v) in &input_obj {
        if !schema.fields.iter().any(|f| &f.name == k || f.aliases.contains(k)) {
            output.insert(k.clone(), v.clone());
        }
    }

    for field in &schema.fields {
        let raw = input_obj
            .get(&field.name)
            .or_else(|| field.aliases.iter().find_map(|a| input_obj.get(a)));

        let value = match raw {
            Some(v) => v.clone(),
            None => match &field.default {
                Some(d) if !field.required => d.clone(),
                _ => {
                    if field.required {
                        return Err(ValidationError::MissingField(field.name.clone()));
                    }
                    Value::Null
                }
            },
        };

        check_type(field, &value)?;
        output.insert(field.name.clone(), value);
    }

    Ok(Value::Object(output))
}

fn check_type(field: &FieldSpec, value: &Value) -> Result<(), ValidationError> {
    match field.field_type {
        FieldType::String => {
            if !value.is_string() {
                return Err(ValidationError::WrongType(field.name.clone(), field.field_type));
            }
        }
        FieldType::Int => {
            let n = value.as_i64().ok_or_else(|| ValidationError::WrongType(field.name.clone(), field.field_type))?;
            if let Some(min) = field.min_int {
                if n < min {
                    return Err(ValidationError::BelowMinimum(field.name.clone(), min));
                }
            }
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                return Err(ValidationError::WrongType(field.name.clone(), field.field_type));
            }
        }
    }
    Ok(())
}

/// A registry of known module schemas, keyed by module name. Populated
/// statically for built-in modules, and updatable from agent announcements
/// per §4.6 step 1 ("either from a local registry populated by agent
/// announcements, or from a static registry").
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ModuleSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ModuleSchema) {
        self.schemas.insert(schema.module_name.clone(), schema);
    }

    pub fn get(&self, module_name: &str) -> Option<&ModuleSchema> {
        self.schemas.get(module_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ping_schema() -> ModuleSchema {
        ModuleSchema {
            module_name: "ping_module".to_string(),
            fields: vec![
                FieldSpec::required("host", FieldType::String).with_alias("target"),
                FieldSpec::optional("count", FieldType::Int, json!(3)).with_min_int(1),
                FieldSpec::optional("port", FieldType::Int, json!(80)),
            ],
        }
    }

    #[test]
    fn fills_defaults() {
        let out = validate(&ping_schema(), &json!({"host": "8.8.8.8"})).unwrap();
        assert_eq!(out["count"], json!(3));
        assert_eq!(out["port"], json!(80));
    }

    #[test]
    fn accepts_target_alias() {
        let out = validate(&ping_schema(), &json!({"target": "8.8.8.8"})).unwrap();
        assert_eq!(out["host"], json!("8.8.8.8"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate(&ping_schema(), &json!({"count": 3})).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("host".to_string()));
    }

    #[test]
    fn rejects_count_below_minimum() {
        let err = validate(&ping_schema(), &json!({"host": "x", "count": 0})).unwrap_err();
        assert_eq!(err, ValidationError::BelowMinimum("count".to_string(), 1));
    }

    #[test]
    fn carries_through_unknown_fields_like_id() {
        let out = validate(&ping_schema(), &json!({"id": "w1", "host": "x"})).unwrap();
        assert_eq!(out["id"], json!("w1"));
    }
}
