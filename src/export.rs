//! Structured export of host domain objects.
//!
//! Host types that opt into structured export implement [`Exportable`]; tool
//! results holding such values are rendered through the host's
//! [`StructuredExporter`] instead of the plain JSON encoder.

use serde_json::{Map, Value};
use thiserror::Error;

/// Visibility given to properties that do not ask for anything else.
pub const DEFAULT_VISIBILITY: u32 = 1;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to export {class}: {reason}")]
    Failed { class: String, reason: String },
}

/// One exported property.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedProperty {
    pub name: String,
    pub value: Value,
    /// The property is rendered while the exporter depth is below this.
    pub visibility: u32,
}

impl ExportedProperty {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            visibility: DEFAULT_VISIBILITY,
        }
    }

    pub fn with_visibility(mut self, visibility: u32) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Capability marker for values rendered by the host exporter.
pub trait Exportable: Send + Sync {
    /// Type discriminator written as `_class`.
    fn export_class(&self) -> &str;

    fn exported_properties(&self) -> Vec<ExportedProperty>;
}

/// The host's serializer for [`Exportable`] values.
pub trait StructuredExporter: Send + Sync {
    fn export(&self, value: &dyn Exportable) -> Result<String, ExportError>;
}

/// Renders exportable values as flat JSON objects.
///
/// Properties whose visibility does not exceed `depth` are omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter {
    pub depth: u32,
}

impl JsonExporter {
    pub fn to_value(&self, value: &dyn Exportable) -> Value {
        let mut object = Map::new();
        object.insert(
            "_class".to_string(),
            Value::String(value.export_class().to_string()),
        );
        for property in value.exported_properties() {
            if property.visibility > self.depth {
                object.insert(property.name, property.value);
            }
        }
        Value::Object(object)
    }
}

impl StructuredExporter for JsonExporter {
    fn export(&self, value: &dyn Exportable) -> Result<String, ExportError> {
        serde_json::to_string(&self.to_value(value)).map_err(|e| ExportError::Failed {
            class: value.export_class().to_string(),
            reason: e.to_string(),
        })
    }
}
