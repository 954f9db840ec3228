//! Input schema synthesis for tool parameters.
//!
//! A tool declares its parameters as a list of [`ParamSpec`]s. Each spec
//! carries a [`ParamType`] descriptor, usually derived from a Rust type via
//! [`ParamKind`], plus optional metadata. [`synthesize`] turns the list into
//! the JSON Schema advertised by `tools/list`.
//!
//! Required-ness resolves in this order, first match wins:
//!
//! 1. explicit [`ParamSpec::required`] / [`ParamSpec::optional`]
//! 2. nullability: explicit [`ParamSpec::nullable`], else an `Option<T>`
//!    declared type (nullable parameters are not required)
//! 3. required
//!
//! Descriptions resolve from the tool-parameter description, then the
//! property description, then the schema description.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Type descriptor of a tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
    /// String-keyed map with values of the given type.
    Map(Box<ParamType>),
    /// One of a fixed set of string literals.
    Enum(Vec<String>),
    /// Unconstrained; also the fallback for types with no mapping.
    Any,
}

impl ParamType {
    /// The JSON Schema node for this type.
    pub fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(items) => json!({"type": "array", "items": items.to_schema()}),
            Self::Map(values) => {
                let mut node = json!({"type": "object"});
                if **values != Self::Any {
                    node["additionalProperties"] = values.to_schema();
                }
                node
            }
            Self::Enum(variants) => json!({"type": "string", "enum": variants}),
            Self::Any => json!({}),
        }
    }

    /// Short name used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::String | Self::Enum(_) => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Map(_) => "object",
            Self::Any => "any",
        }
    }
}

/// Rust types that can be declared as tool parameters.
pub trait ParamKind {
    fn param_type() -> ParamType;

    /// Whether the type itself admits absence.
    fn nullable() -> bool {
        false
    }
}

macro_rules! param_kind {
    ($variant:ident => $($ty:ty),+) => {
        $(impl ParamKind for $ty {
            fn param_type() -> ParamType {
                ParamType::$variant
            }
        })+
    };
}

param_kind!(String => String, char);
param_kind!(Integer => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
param_kind!(Number => f32, f64);
param_kind!(Boolean => bool);
param_kind!(Any => Value);

impl<T: ParamKind> ParamKind for Option<T> {
    fn param_type() -> ParamType {
        T::param_type()
    }

    fn nullable() -> bool {
        true
    }
}

impl<T: ParamKind> ParamKind for Vec<T> {
    fn param_type() -> ParamType {
        ParamType::Array(Box::new(T::param_type()))
    }
}

impl<T: ParamKind, S> ParamKind for HashMap<String, T, S> {
    fn param_type() -> ParamType {
        ParamType::Map(Box::new(T::param_type()))
    }
}

impl<T: ParamKind> ParamKind for BTreeMap<String, T> {
    fn param_type() -> ParamType {
        ParamType::Map(Box::new(T::param_type()))
    }
}

impl ParamKind for Map<String, Value> {
    fn param_type() -> ParamType {
        ParamType::Map(Box::new(ParamType::Any))
    }
}

/// One declared tool parameter and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    name: String,
    param_type: ParamType,
    type_nullable: bool,
    required: Option<bool>,
    nullable: Option<bool>,
    description: Option<String>,
    property_description: Option<String>,
    schema_description: Option<String>,
}

impl ParamSpec {
    /// Declares a parameter typed after `T`.
    pub fn of<T: ParamKind>(name: impl Into<String>) -> Self {
        Self::with_type(name, T::param_type()).type_nullable(T::nullable())
    }

    /// Declares a parameter with an explicit descriptor.
    pub fn with_type(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            type_nullable: false,
            required: None,
            nullable: None,
            description: None,
            property_description: None,
            schema_description: None,
        }
    }

    /// Declares an unconstrained parameter.
    pub fn any(name: impl Into<String>) -> Self {
        Self::with_type(name, ParamType::Any)
    }

    fn type_nullable(mut self, nullable: bool) -> Self {
        self.type_nullable = nullable;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn optional(self) -> Self {
        self.required(false)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Tool-parameter description; takes precedence over the others.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn property_description(mut self, text: impl Into<String>) -> Self {
        self.property_description = Some(text.into());
        self
    }

    pub fn schema_description(mut self, text: impl Into<String>) -> Self {
        self.schema_description = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> &ParamType {
        &self.param_type
    }

    pub fn is_required(&self) -> bool {
        if let Some(required) = self.required {
            return required;
        }
        match self.nullable {
            Some(nullable) => !nullable,
            None => !self.type_nullable,
        }
    }

    pub fn resolved_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or(self.property_description.as_deref())
            .or(self.schema_description.as_deref())
    }

    fn to_property(&self) -> Value {
        let mut node = self.param_type.to_schema();
        if let (Some(text), Value::Object(obj)) = (self.resolved_description(), &mut node) {
            obj.insert("description".to_string(), Value::String(text.to_string()));
        }
        node
    }
}

/// Builds the input schema for a parameter list.
pub fn synthesize(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        properties.insert(param.name.clone(), param.to_property());
        if param.is_required() {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Schema validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("arguments must be an object")]
    NotAnObject,
    #[error("missing required argument '{0}'")]
    MissingRequired(String),
}

/// Checks an argument object against an input schema's `required` list.
///
/// `null` counts as missing. Type checking is left to coercion.
pub fn validate(schema: &Value, arguments: &Value) -> Result<(), SchemaError> {
    let args = match arguments {
        Value::Object(obj) => obj,
        Value::Null => return validate(schema, &Value::Object(Map::new())),
        _ => return Err(SchemaError::NotAnObject),
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for name in required.iter().filter_map(Value::as_str) {
        if args.get(name).map_or(true, Value::is_null) {
            return Err(SchemaError::MissingRequired(name.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_required() {
        let params = [ParamSpec::of::<String>("jobName")];
        let schema = synthesize(&params);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["jobName"], json!({"type": "string"}));
        assert_eq!(schema["required"], json!(["jobName"]));
    }

    #[test]
    fn test_option_type_is_not_required() {
        let params = [ParamSpec::of::<Option<u32>>("limit")];
        let schema = synthesize(&params);
        assert_eq!(schema["properties"]["limit"], json!({"type": "integer"}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn test_explicit_required_beats_nullability() {
        let spec = ParamSpec::of::<Option<String>>("branch").required(true);
        assert!(spec.is_required());

        let spec = ParamSpec::of::<String>("branch").nullable(true).required(true);
        assert!(spec.is_required());

        let spec = ParamSpec::of::<String>("branch").optional();
        assert!(!spec.is_required());
    }

    #[test]
    fn test_explicit_nullability_beats_type() {
        assert!(!ParamSpec::of::<String>("a").nullable(true).is_required());
        assert!(ParamSpec::of::<Option<String>>("a").nullable(false).is_required());
    }

    #[test]
    fn test_description_precedence() {
        let spec = ParamSpec::of::<String>("x")
            .schema_description("schema")
            .property_description("property")
            .description("tool");
        assert_eq!(spec.resolved_description(), Some("tool"));

        let spec = ParamSpec::of::<String>("x")
            .schema_description("schema")
            .property_description("property");
        assert_eq!(spec.resolved_description(), Some("property"));

        let spec = ParamSpec::of::<String>("x").schema_description("schema");
        assert_eq!(spec.resolved_description(), Some("schema"));

        assert_eq!(ParamSpec::of::<String>("x").resolved_description(), None);
    }

    #[test]
    fn test_nested_types() {
        let params = [
            ParamSpec::of::<Vec<String>>("tags").description("Tags to match"),
            ParamSpec::of::<HashMap<String, i64>>("weights"),
            ParamSpec::of::<Value>("extra"),
            ParamSpec::with_type("mode", ParamType::Enum(vec!["fast".into(), "full".into()])),
        ];
        let schema = synthesize(&params);
        assert_eq!(
            schema["properties"]["tags"],
            json!({"type": "array", "items": {"type": "string"}, "description": "Tags to match"})
        );
        assert_eq!(
            schema["properties"]["weights"],
            json!({"type": "object", "additionalProperties": {"type": "integer"}})
        );
        assert_eq!(schema["properties"]["extra"], json!({}));
        assert_eq!(
            schema["properties"]["mode"],
            json!({"type": "string", "enum": ["fast", "full"]})
        );
    }

    #[test]
    fn test_unconstrained_node_keeps_description() {
        let params = [ParamSpec::any("payload").description("Raw payload")];
        let schema = synthesize(&params);
        assert_eq!(
            schema["properties"]["payload"],
            json!({"description": "Raw payload"})
        );
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let params = vec![
            ParamSpec::of::<String>("b"),
            ParamSpec::of::<Option<bool>>("a").description("flag"),
        ];
        assert_eq!(synthesize(&params), synthesize(&params));
    }

    #[test]
    fn test_validate_checks_required() {
        let schema = synthesize(&[
            ParamSpec::of::<String>("jobName"),
            ParamSpec::of::<Option<u32>>("limit"),
        ]);
        assert!(validate(&schema, &json!({"jobName": "main"})).is_ok());
        assert_eq!(
            validate(&schema, &json!({"limit": 3})),
            Err(SchemaError::MissingRequired("jobName".into()))
        );
        assert_eq!(
            validate(&schema, &json!({"jobName": null})),
            Err(SchemaError::MissingRequired("jobName".into()))
        );
        assert_eq!(validate(&schema, &json!(42)), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn test_validate_treats_null_arguments_as_empty() {
        let schema = synthesize(&[ParamSpec::of::<Option<u32>>("limit")]);
        assert!(validate(&schema, &Value::Null).is_ok());
    }
}
