//! Tool (function) declarations shared across all provider wire formats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-Schema-shaped description of a tool's parameters.
///
/// `schema_type` is stored exactly as given (case preserved) but compared
/// and emitted case-insensitively: [`ToolSchema::normalized`] lowercases
/// every `type` string recursively, which is what providers that require
/// lowercase JSON Schema types (Anthropic, Ollama) actually send on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ToolSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ToolSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolSchema {
    #[must_use]
    pub fn object(properties: BTreeMap<String, ToolSchema>, required: Vec<String>) -> Self {
        Self {
            schema_type: Some("object".to_string()),
            properties,
            required,
            enum_values: None,
            items: None,
            description: None,
        }
    }

    #[must_use]
    pub fn scalar(schema_type: impl Into<String>) -> Self {
        Self {
            schema_type: Some(schema_type.into()),
            properties: BTreeMap::new(),
            required: Vec::new(),
            enum_values: None,
            items: None,
            description: None,
        }
    }

    /// Return a copy with every `type` string lowercased, recursively
    /// through `properties` and `items`. This is the form emitted on the
    /// wire for providers that require lowercase JSON Schema types.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            schema_type: self.schema_type.as_ref().map(|t| t.to_ascii_lowercase()),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.normalized()))
                .collect(),
            required: self.required.clone(),
            enum_values: self.enum_values.clone(),
            items: self.items.as_ref().map(|i| Box::new(i.normalized())),
            description: self.description.clone(),
        }
    }
}

/// Definition of a tool that can be called by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolSchema,
}

impl ToolDefinition {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
