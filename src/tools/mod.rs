//! Built-in tool system.
//!
//! - [`registry`]: registration, validation, timed execution and stats
//! - [`calculator`], [`statistics`]: math tools
//! - [`time`]: timezone-aware clock
//! - [`file`]: sandboxed file read/write/list
//! - [`system`]: host information via sysinfo
//! - [`data`]: JSON parse/query and JSON⇄CSV transforms
//! - [`web`]: allow-listed outbound HTTP

pub mod calculator;
pub mod data;
pub mod file;
pub mod registry;
pub mod statistics;
pub mod system;
pub mod time;
pub mod web;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::ToolDefinition;

pub use registry::ToolRegistry;

/// Outcome class of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    Partial,
    Timeout,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::Partial => "partial",
            ToolStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a tool execution, as returned over the tools API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            data,
            error: None,
            metadata: Map::new(),
        }
    }

    /// Data was produced but something was off.
    pub fn partial(data: Value, warning: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Partial,
            error: Some(warning.into()),
            ..Self::success(data)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            data: Value::Null,
            error: Some(message.into()),
            metadata: Map::new(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Timeout,
            ..Self::error(message)
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Render for inclusion in a `tool` message sent back to the model.
    pub fn to_llm_string(&self) -> String {
        let error = self.error.as_deref().unwrap_or("");
        match self.status {
            ToolStatus::Success => match &self.data {
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            },
            ToolStatus::Error => format!("Error: {error}"),
            ToolStatus::Partial => format!("Partial result: {}\nWarning: {error}", self.data),
            ToolStatus::Timeout => format!("Timeout: {error}"),
        }
    }
}

/// Errors raised inside a tool. The registry turns them into
/// [`ToolStatus::Error`] results.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Parameter {name} must be {expected}")]
    InvalidType { name: String, expected: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Grouping used by the tools API listing.
    fn category(&self) -> &str;

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError>;

    /// OpenAI function definition for this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters())
    }
}

// ─── Argument helpers ─────────────────────────────────────────────────────

fn present<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

fn invalid(name: &str, expected: &str) -> ToolError {
    ToolError::InvalidType {
        name: name.to_string(),
        expected: expected.to_string(),
    }
}

pub(crate) fn opt_str<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<Option<&'a str>, ToolError> {
    match present(args, name) {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| invalid(name, "a string")),
    }
}

pub(crate) fn req_str<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    opt_str(args, name)?.ok_or_else(|| ToolError::MissingParameter(name.to_string()))
}

pub(crate) fn opt_bool(args: &Map<String, Value>, name: &str) -> Result<Option<bool>, ToolError> {
    match present(args, name) {
        None => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| invalid(name, "a boolean")),
    }
}

pub(crate) fn opt_u64(args: &Map<String, Value>, name: &str) -> Result<Option<u64>, ToolError> {
    match present(args, name) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| invalid(name, "a non-negative integer")),
    }
}

pub(crate) fn opt_numbers(
    args: &Map<String, Value>,
    name: &str,
) -> Result<Option<Vec<f64>>, ToolError> {
    match present(args, name) {
        None => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| invalid(name, "an array of numbers")))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(name, "an array of numbers")),
    }
}

pub(crate) fn opt_strings(
    args: &Map<String, Value>,
    name: &str,
) -> Result<Option<Vec<String>>, ToolError> {
    match present(args, name) {
        None => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(name, "an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(name, "an array of strings")),
    }
}

/// Render an f64 the way a JSON-native calculator would: integral values
/// become integers.
pub(crate) fn number_value(x: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if x.is_finite() && x.fract() == 0.0 && x.abs() < MAX_EXACT {
        Value::from(x as i64)
    } else {
        serde_json::Number::from_f64(x)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_llm_rendering() {
        assert_eq!(ToolResult::success(json!("plain")).to_llm_string(), "plain");
        assert_eq!(
            ToolResult::error("boom").to_llm_string(),
            "Error: boom"
        );
        assert!(ToolResult::timeout("slow")
            .to_llm_string()
            .starts_with("Timeout:"));
    }

    #[test]
    fn test_result_wire_shape() {
        let wire = serde_json::to_value(ToolResult::error("nope")).unwrap();
        assert_eq!(wire["status"], "error");
        assert_eq!(wire["error"], "nope");
        assert!(wire["data"].is_null());
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(42.0), json!(42));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_arg_helpers() {
        let args = json!({"a": "x", "n": 3, "v": [1, 2.5], "bad": 1}).as_object().cloned().unwrap();
        assert_eq!(req_str(&args, "a").unwrap(), "x");
        assert!(matches!(req_str(&args, "missing"), Err(ToolError::MissingParameter(_))));
        assert!(matches!(opt_str(&args, "bad"), Err(ToolError::InvalidType { .. })));
        assert_eq!(opt_u64(&args, "n").unwrap(), Some(3));
        assert_eq!(opt_numbers(&args, "v").unwrap(), Some(vec![1.0, 2.5]));
    }
}
