//! Tool definitions as advertised by tool servers and as held in the catalog

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable operation as it travels over the wire (`tools.list`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (e.g., "search_pubmed")
    pub name: String,
    /// Human-readable description for the calling model
    #[serde(default)]
    pub description: String,
    /// JSON schema for input parameters
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

/// `{"type": "object", "properties": {}, "required": []}`
pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

impl ToolSpec {
    /// Create a new tool spec with an empty object schema
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
        }
    }

    /// Set input schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Convert to the OpenAI-compatible `tools` entry
    pub fn to_function_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// A catalog entry: a tool spec bound to the backend that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name in the unified namespace
    pub name: String,
    /// Name on the owning backend (differs when qualified on collision)
    pub remote_name: String,
    pub description: String,
    pub input_schema: Value,
    /// Identifier of the owning backend
    pub backend: String,
}

impl ToolDescriptor {
    /// Bind a spec to its backend, keeping the advertised name
    pub fn from_spec(spec: ToolSpec, backend: impl Into<String>) -> Self {
        Self {
            name: spec.name.clone(),
            remote_name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
            backend: backend.into(),
        }
    }

    /// Expose under a different unified name
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The spec the router advertises to its own callers
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}
