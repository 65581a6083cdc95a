//! Declarative payload schemas, validated once at the transport
//! boundary (and again on save import).
//!
//! Each command type registers the shape its payload must have. The
//! checks are intentionally shallow — field presence and scalar kind —
//! because handlers re-parse payloads into typed structs anyway; the
//! registry exists so malformed envelopes are rejected before they
//! occupy queue capacity.

use indexmap::IndexMap;
use serde_json::Value;

use lode_core::validate_identifier;

/// Scalar kind accepted for a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Any JSON string.
    String,
    /// A string matching the identifier rules (`^[A-Za-z0-9_-]{1,64}$`).
    Identifier,
    /// A non-negative integer.
    UInt,
    /// Any finite number.
    Number,
    /// A boolean.
    Bool,
    /// Any JSON value.
    Any,
}

impl FieldKind {
    fn check(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Identifier => value
                .as_str()
                .is_some_and(|s| validate_identifier(s).is_ok()),
            Self::UInt => value.as_u64().is_some(),
            Self::Number => value.as_f64().is_some(),
            Self::Bool => value.is_boolean(),
            Self::Any => true,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Identifier => "an identifier",
            Self::UInt => "a non-negative integer",
            Self::Number => "a number",
            Self::Bool => "a boolean",
            Self::Any => "any value",
        }
    }
}

/// One field in a payload schema.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Accepted kind.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
}

impl FieldSpec {
    /// A required field.
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    /// An optional field.
    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Shape check for one command type's payload.
#[derive(Clone, Debug)]
pub struct PayloadSchema {
    fields: Vec<FieldSpec>,
    allow_unknown: bool,
}

impl PayloadSchema {
    /// A schema requiring a JSON object with the given fields.
    pub fn object(fields: &[FieldSpec]) -> Self {
        Self {
            fields: fields.to_vec(),
            allow_unknown: false,
        }
    }

    /// Permit fields beyond the declared set.
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    /// A schema accepting any payload (including null).
    pub fn any() -> Self {
        Self {
            fields: Vec::new(),
            allow_unknown: true,
        }
    }

    /// Validate a payload against this schema.
    pub fn validate(&self, payload: &Value) -> Result<(), String> {
        if self.fields.is_empty() && self.allow_unknown {
            return Ok(());
        }
        let Some(object) = payload.as_object() else {
            return Err("payload must be an object".to_string());
        };
        for field in &self.fields {
            match object.get(field.name) {
                Some(value) => {
                    if !field.kind.check(value) {
                        return Err(format!(
                            "field {:?} must be {}",
                            field.name,
                            field.kind.describe()
                        ));
                    }
                }
                None if field.required => {
                    return Err(format!("missing required field {:?}", field.name));
                }
                None => {}
            }
        }
        if !self.allow_unknown {
            for key in object.keys() {
                if !self.fields.iter().any(|f| f.name == key) {
                    return Err(format!("unknown field {key:?}"));
                }
            }
        }
        Ok(())
    }
}

/// Command type → payload schema registry.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, PayloadSchema>,
}

impl SchemaRegistry {
    /// An empty registry (every payload accepted).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema for a command type.
    pub fn register(&mut self, kind: impl Into<String>, schema: PayloadSchema) {
        self.schemas.insert(kind.into(), schema);
    }

    /// Validate a payload for a command type.
    ///
    /// Command types without a registered schema accept any payload;
    /// the dispatcher will still reject them as unsupported if no
    /// handler is wired.
    pub fn validate(&self, kind: &str, payload: &Value) -> Result<(), String> {
        match self.schemas.get(kind) {
            Some(schema) => schema.validate(payload),
            None => Ok(()),
        }
    }

    /// Whether a schema is registered for a command type.
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }
}
