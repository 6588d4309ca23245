//! Tool surface shared by every component.
//!
//! Components expose a single `execute(call_id, args)` entrypoint and answer
//! with a [`ToolResponse`]: one text content item holding the JSON-encoded
//! result. Errors never escape as errors; they are folded into the result
//! with a `status` discriminant so the invoker always gets a response.

pub mod custom;

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::Result;

pub use custom::{CustomTool, CustomToolConfig};

#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    pub text: String,
}

/// Envelope returned from every tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
}

impl ToolResponse {
    pub fn json(value: &Value) -> Self {
        Self {
            content: vec![ToolContent {
                text: serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
            }],
        }
    }

    /// Fold a component result into the envelope, encoding errors in-band.
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::json(&value),
            Err(e) => Self::json(&json!({
                "status": "error",
                "code": e.code(),
                "error": e.to_string(),
            })),
        }
    }

    /// The JSON-encoded result text.
    pub fn text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }

    /// Decode the result text back into a value (test and CLI convenience).
    pub fn value(&self) -> Value {
        serde_json::from_str(self.text()).unwrap_or(Value::Null)
    }
}

/// Build the custom-tool set from declarative config.
///
/// Entries missing a name, a description, or an execution mode are skipped,
/// as are entries that would shadow an existing tool name.
pub fn register_custom_tools(
    configs: &[CustomToolConfig],
    existing: &HashSet<String>,
) -> Vec<CustomTool> {
    let mut registered: HashSet<String> = existing.clone();
    let mut tools = Vec::new();

    for config in configs {
        if config.name.is_empty() || config.description.is_empty() {
            warn!(name = %config.name, "Skipping custom tool without name/description");
            continue;
        }
        if config.endpoint.is_none() && config.script.is_none() {
            warn!(name = %config.name, "Skipping custom tool without endpoint or script");
            continue;
        }
        if !registered.insert(config.name.clone()) {
            warn!(name = %config.name, "Skipping custom tool shadowing an existing tool");
            continue;
        }
        tools.push(CustomTool::new(config.clone()));
    }

    tools
}
