//! Data contracts for step inputs and outputs
//!
//! A JSON Schema subset. Values cross node boundaries as `serde_json::Value`,
//! so every boundary is checked with [`validate`]; [`Schema::accepts`] is the
//! static counterpart used when a workflow is committed.

use super::foreach::ItemResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Declared shape of a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array {
        items: Box<Schema>,
    },
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default)]
        required: Vec<String>,
    },
    Nullable {
        inner: Box<Schema>,
    },
}

/// A value (or a contract) that does not match the declared shape
#[derive(Debug, Clone, PartialEq, Error)]
#[error("at {path}: expected {expected}, found {found}")]
pub struct SchemaViolation {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl SchemaViolation {
    fn new(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl Schema {
    /// Object whose listed properties are all required
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        for (name, schema) in fields {
            let name = name.into();
            required.push(name.clone());
            properties.insert(name, schema);
        }
        Schema::Object {
            properties,
            required,
        }
    }

    /// Add a property that may be absent. No-op on non-object schemas.
    pub fn optional_field(mut self, name: impl Into<String>, schema: Schema) -> Self {
        if let Schema::Object { properties, .. } = &mut self {
            properties.insert(name.into(), schema);
        }
        self
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
        }
    }

    pub fn nullable(inner: Schema) -> Self {
        match inner {
            Schema::Any | Schema::Null | Schema::Nullable { .. } => inner,
            other => Schema::Nullable {
                inner: Box::new(other),
            },
        }
    }

    /// Short name of the schema kind, used in violation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::Null => "null",
            Schema::Boolean => "boolean",
            Schema::Integer => "integer",
            Schema::Number => "number",
            Schema::String => "string",
            Schema::Array { .. } => "array",
            Schema::Object { .. } => "object",
            Schema::Nullable { .. } => "nullable",
        }
    }

    /// Check a value against this schema
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<(), SchemaViolation> {
        match self {
            Schema::Any => Ok(()),
            Schema::Nullable { inner } => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate_at(path, value)
                }
            }
            Schema::Null => expect(value.is_null(), path, self, value),
            Schema::Boolean => expect(value.is_boolean(), path, self, value),
            Schema::Integer => expect(value.is_i64() || value.is_u64(), path, self, value),
            Schema::Number => expect(value.is_number(), path, self, value),
            Schema::String => expect(value.is_string(), path, self, value),
            Schema::Array { items } => {
                let Some(elements) = value.as_array() else {
                    return Err(SchemaViolation::new(path, "array", value_kind(value)));
                };
                for (i, element) in elements.iter().enumerate() {
                    items.validate_at(&format!("{}[{}]", path, i), element)?;
                }
                Ok(())
            }
            Schema::Object {
                properties,
                required,
            } => {
                let Some(map) = value.as_object() else {
                    return Err(SchemaViolation::new(path, "object", value_kind(value)));
                };
                for name in required {
                    if !map.contains_key(name) {
                        return Err(SchemaViolation::new(
                            &format!("{}.{}", path, name),
                            "required property",
                            "nothing",
                        ));
                    }
                }
                for (name, schema) in properties {
                    match map.get(name) {
                        Some(v) => schema.validate_at(&format!("{}.{}", path, name), v)?,
                        None => continue,
                    }
                }
                Ok(())
            }
        }
    }

    /// Check that every value conforming to `upstream` also conforms to `self`
    ///
    /// `Any` on either side cannot be decided statically and is accepted; the
    /// run-time boundary check covers it.
    pub fn accepts(&self, upstream: &Schema) -> Result<(), SchemaViolation> {
        self.accepts_at("$", upstream)
    }

    fn accepts_at(&self, path: &str, upstream: &Schema) -> Result<(), SchemaViolation> {
        match (self, upstream) {
            (Schema::Any, _) | (_, Schema::Any) => Ok(()),
            (Schema::Nullable { inner }, Schema::Nullable { inner: up }) => {
                inner.accepts_at(path, up)
            }
            (Schema::Nullable { .. }, Schema::Null) => Ok(()),
            (Schema::Nullable { inner }, other) => inner.accepts_at(path, other),
            (_, Schema::Nullable { .. }) => {
                Err(SchemaViolation::new(path, self.kind(), "nullable value"))
            }
            (Schema::Null, Schema::Null)
            | (Schema::Boolean, Schema::Boolean)
            | (Schema::Integer, Schema::Integer)
            | (Schema::Number, Schema::Number | Schema::Integer)
            | (Schema::String, Schema::String) => Ok(()),
            (Schema::Array { items }, Schema::Array { items: up }) => {
                items.accepts_at(&format!("{}[]", path), up)
            }
            (
                Schema::Object {
                    properties,
                    required,
                },
                Schema::Object {
                    properties: up_properties,
                    required: up_required,
                },
            ) => {
                for name in required {
                    if !up_required.contains(name) {
                        return Err(SchemaViolation::new(
                            &format!("{}.{}", path, name),
                            "required property",
                            "optional or missing property",
                        ));
                    }
                }
                for (name, schema) in properties {
                    if let Some(up) = up_properties.get(name) {
                        schema.accepts_at(&format!("{}.{}", path, name), up)?;
                    }
                }
                Ok(())
            }
            _ => Err(SchemaViolation::new(path, self.kind(), upstream.kind())),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Array { items } => write!(f, "array<{}>", items),
            Schema::Nullable { inner } => write!(f, "{}?", inner),
            Schema::Object {
                properties,
                required,
            } => {
                write!(f, "{{")?;
                for (i, (name, schema)) in properties.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let marker = if required.contains(name) { "" } else { "?" };
                    write!(f, "{}{}: {}", name, marker, schema)?;
                }
                write!(f, "}}")
            }
            other => f.write_str(other.kind()),
        }
    }
}

fn expect(ok: bool, path: &str, schema: &Schema, value: &Value) -> Result<(), SchemaViolation> {
    if ok {
        Ok(())
    } else {
        Err(SchemaViolation::new(path, schema.kind(), value_kind(value)))
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate `value` against `schema`, handing the value back on success
pub fn validate<'a>(value: &'a Value, schema: &Schema) -> Result<&'a Value, SchemaViolation> {
    schema.validate(value)?;
    Ok(value)
}

/// A Rust type with a declared data contract
///
/// Implement this for every type that flows between steps:
///
/// ```ignore
/// impl Shape for Totals {
///     fn schema() -> Schema {
///         Schema::object([("sum", Schema::Integer)])
///             .optional_field("failed_count", Schema::Integer)
///     }
/// }
/// ```
pub trait Shape: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn schema() -> Schema;
}

macro_rules! primitive_shape {
    ($schema:expr => $($ty:ty),+) => {
        $(impl Shape for $ty {
            fn schema() -> Schema {
                $schema
            }
        })+
    };
}

primitive_shape!(Schema::Integer => i32, i64, u32, u64, usize);
primitive_shape!(Schema::Number => f32, f64);
primitive_shape!(Schema::Boolean => bool);
primitive_shape!(Schema::String => String, chrono::NaiveDate);
primitive_shape!(Schema::Any => Value);
primitive_shape!(Schema::Null => ());

impl<T: Shape> Shape for Vec<T> {
    fn schema() -> Schema {
        Schema::array(T::schema())
    }
}

impl<T: Shape> Shape for Option<T> {
    fn schema() -> Schema {
        Schema::nullable(T::schema())
    }
}

// Slots are externally tagged `{"Ok": ..}` / `{"Err": ..}`; consumers decode
// them into the typed result, so the slot itself is not constrained.
impl<T: Shape> Shape for ItemResult<T> {
    fn schema() -> Schema {
        Schema::Any
    }
}
