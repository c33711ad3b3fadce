//! Data-driven parameter schemas for tools.
//!
//! Tool authors, plugins, and MCP servers all register parameter specs
//! at runtime, so validation is interpreted rather than typed: a schema
//! is a map of property specs plus a required list, serialisable to the
//! JSON-Schema shape the chat-completions API expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Supported parameter types, mirroring JSON Schema primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn json_name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Specification of one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Parameter type
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Human-readable description shown to the model
    pub description: String,
    /// Allowed values, when constrained
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enum_values: Option<Vec<String>>,
}

/// A tool's parameter schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Property name → spec, in stable order
    pub properties: BTreeMap<String, PropertySpec>,
    /// Names of required properties
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Create an empty schema (a tool with no parameters).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property. Builder-style.
    pub fn property(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(
            name,
            PropertySpec {
                param_type,
                description: description.into(),
                enum_values: None,
            },
        );
        self
    }

    /// Render as the JSON-Schema object embedded in a tool definition.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, spec) in &self.properties {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(spec.param_type.json_name()));
            prop.insert("description".into(), json!(spec.description));
            if let Some(ref values) = spec.enum_values {
                prop.insert("enum".into(), json!(values));
            }
            properties.insert(name.clone(), Value::Object(prop));
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// Build a schema from a JSON-Schema object (as provided by MCP
    /// servers). Unknown property types map to `Object`.
    pub fn from_json_schema(schema: &Value) -> Self {
        let mut result = ParameterSchema::new();

        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let param_type = match prop.get("type").and_then(Value::as_str) {
                    Some("string") => ParamType::String,
                    Some("number") => ParamType::Number,
                    Some("integer") => ParamType::Integer,
                    Some("boolean") => ParamType::Boolean,
                    Some("array") => ParamType::Array,
                    _ => ParamType::Object,
                };
                result.properties.insert(
                    name.clone(),
                    PropertySpec {
                        param_type,
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        enum_values: None,
                    },
                );
            }
        }
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            result.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }

        result
    }

    /// Validate arguments against the schema, coercing scalar types
    /// where unambiguous. Unknown extra arguments pass through.
    pub fn validate(&self, args: &Value) -> Result<Value> {
        let object = args
            .as_object()
            .ok_or_else(|| Error::InvalidInput("arguments must be an object".to_string()))?;

        for name in &self.required {
            if !object.contains_key(name) {
                return Err(Error::InvalidInput(format!(
                    "missing required argument '{}'",
                    name
                )));
            }
        }

        let mut coerced = Map::new();
        for (name, value) in object {
            match self.properties.get(name) {
                Some(spec) => {
                    coerced.insert(name.clone(), coerce(value, spec.param_type, name)?);
                }
                None => {
                    coerced.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(Value::Object(coerced))
    }
}

/// Coerce a value to the expected type, or fail with `InvalidInput`.
fn coerce(value: &Value, expected: ParamType, name: &str) -> Result<Value> {
    let mismatch = || {
        Error::InvalidInput(format!(
            "argument '{}' expected {}, got {}",
            name,
            expected.json_name(),
            type_name(value)
        ))
    };

    match expected {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(mismatch)?;
                if f.fract() == 0.0 {
                    Ok(json!(f as i64))
                } else {
                    Err(mismatch())
                }
            }
            Value::String(s) => s.trim().parse::<i64>().map(|i| json!(i)).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().map(|f| json!(f)).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Ok(json!(true)),
                "false" | "0" => Ok(json!(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        ParamType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
