//! Tool catalogue client.
//!
//! The workflow engine needs exactly two operations from the tool server:
//! `list_tools` and `call_tool`. Tools carry a JSON Schema for their
//! arguments; planned arguments are validated against it before dispatch so
//! a bad plan yields a typed `InvalidArguments` error instead of an
//! upstream type failure.

mod http;
mod memory;

pub use http::HttpToolCatalogue;
pub use memory::InMemoryToolCatalogue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool `{tool}` is not listed by the catalogue")]
    NotFound { tool: String },
    #[error("arguments for tool `{tool}` do not match its schema: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool `{tool}` failed upstream: {message}")]
    UpstreamFailure { tool: String, message: String },
    #[error("tool `{tool}` timed out")]
    Timeout { tool: String },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object"})
}

#[async_trait]
pub trait ToolCatalogue: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, ToolError>;
}

/// Validate call arguments against a tool's declared input schema.
pub fn validate_arguments(descriptor: &ToolDescriptor, arguments: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(&descriptor.input_schema).map_err(|error| {
        ToolError::InvalidArguments {
            tool: descriptor.name.clone(),
            message: format!("tool declares an invalid schema: {error}"),
        }
    })?;

    if let Err(error) = validator.validate(arguments) {
        return Err(ToolError::InvalidArguments {
            tool: descriptor.name.clone(),
            message: error.to_string(),
        });
    }
    Ok(())
}

/// Unwrap the MCP text-content envelope.
///
/// Tool servers return payloads like `[{"type": "text", "text": "<json>"}]`;
/// callers want the parsed JSON inside. Non-envelope values pass through
/// unchanged, and text that is not valid JSON is kept as a plain string.
pub fn unwrap_text_content(raw: Value) -> Value {
    match raw {
        Value::Array(items) => {
            let mut unwrapped: Vec<Value> =
                items.into_iter().map(unwrap_single_content).collect();
            if unwrapped.len() == 1 {
                unwrapped.remove(0)
            } else {
                Value::Array(unwrapped)
            }
        }
        other => unwrap_single_content(other),
    }
}

fn unwrap_single_content(item: Value) -> Value {
    let Value::Object(ref map) = item else { return item };
    if map.get("type").and_then(Value::as_str) != Some("text") {
        return item;
    }
    match map.get("text") {
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(other) => other.clone(),
        None => item,
    }
}
