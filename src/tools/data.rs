//! JSON parsing, path queries and JSON⇄CSV conversion.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{req_str, Tool, ToolError, ToolResult};

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub struct JsonParseTool;

#[async_trait]
impl Tool for JsonParseTool {
    fn name(&self) -> &str {
        "json_parse"
    }

    fn description(&self) -> &str {
        "Parse and validate JSON string"
    }

    fn category(&self) -> &str {
        "data"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "json_string": {"type": "string", "description": "JSON string to parse"},
                "validate_schema": {
                    "type": "object",
                    "description": "Optional JSON schema for validation"
                }
            },
            "required": ["json_string"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = req_str(args, "json_string")?;
        let data: Value = serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidArgument(format!(
                "JSON parse error at line {}, column {}: {e}",
                e.line(),
                e.column()
            ))
        })?;

        let required = args
            .get("validate_schema")
            .and_then(|s| s.get("required"))
            .and_then(Value::as_array);
        if let Some(required) = required {
            let missing: Vec<String> = required
                .iter()
                .filter_map(Value::as_str)
                .filter(|field| data.get(field).is_none())
                .map(|field| format!("Missing required field: {field}"))
                .collect();
            if !missing.is_empty() {
                return Ok(ToolResult::partial(data, missing.join("; ")));
            }
        }

        let kind = type_name(&data);
        Ok(ToolResult::success(data)
            .with_meta("type", kind)
            .with_meta("size", raw.len()))
    }
}

/// Walk a dotted path like `users.0.name`. Numeric segments index arrays.
pub fn query_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, key| {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        next.filter(|v| !v.is_null())
    })
}

pub struct JsonQueryTool;

#[async_trait]
impl Tool for JsonQueryTool {
    fn name(&self) -> &str {
        "json_query"
    }

    fn description(&self) -> &str {
        "Query JSON data with simple path expressions"
    }

    fn category(&self) -> &str {
        "data"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "data": {
                    "type": ["string", "object", "array"],
                    "description": "JSON data to query"
                },
                "path": {
                    "type": "string",
                    "description": "Simple path expression (e.g., 'users.0.name')"
                }
            },
            "required": ["data", "path"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = req_str(args, "path")?;
        let parsed;
        let data = match args.get("data") {
            Some(Value::String(raw)) => {
                parsed = serde_json::from_str::<Value>(raw)
                    .map_err(|e| ToolError::InvalidArgument(format!("Invalid JSON data: {e}")))?;
                &parsed
            }
            Some(other) => other,
            None => return Err(ToolError::MissingParameter("data".to_string())),
        };

        let found = query_path(data, path)
            .ok_or_else(|| ToolError::NotFound(format!("Path not found: {path}")))?;
        Ok(ToolResult::success(found.clone()).with_meta("path", path))
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse CSV with a header row into an array of string-valued objects.
pub fn csv_to_json(input: &str) -> Result<Value, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

/// Render an array of objects (header from the first object) or an array of
/// arrays as CSV. Anything else renders as an empty string.
pub fn json_to_csv(data: &Value) -> Result<String, ToolError> {
    let Some(rows) = data.as_array().filter(|rows| !rows.is_empty()) else {
        return Ok(String::new());
    };
    let fail = |e: csv::Error| ToolError::Failed(format!("CSV write error: {e}"));
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    if let Some(first) = rows[0].as_object() {
        let header: Vec<&String> = first.keys().collect();
        writer.write_record(header.iter().map(|h| h.as_str())).map_err(fail)?;
        for row in rows {
            let obj = row.as_object().ok_or_else(|| {
                ToolError::InvalidArgument("All rows must be objects".to_string())
            })?;
            let cells: Vec<String> = header
                .iter()
                .map(|h| obj.get(h.as_str()).map(cell).unwrap_or_default())
                .collect();
            writer.write_record(&cells).map_err(fail)?;
        }
    } else {
        for row in rows {
            let cells: Vec<String> = match row {
                Value::Array(items) => items.iter().map(cell).collect(),
                other => vec![cell(other)],
            };
            writer.write_record(&cells).map_err(fail)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ToolError::Failed(format!("CSV write error: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ToolError::Failed(e.to_string()))
}

pub struct DataTransformTool;

#[async_trait]
impl Tool for DataTransformTool {
    fn name(&self) -> &str {
        "data_transform"
    }

    fn description(&self) -> &str {
        "Transform data between JSON and CSV formats"
    }

    fn category(&self) -> &str {
        "data"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "data": {"description": "Data to transform"},
                "from_format": {
                    "type": "string",
                    "description": "Input format",
                    "enum": ["json", "csv"]
                },
                "to_format": {
                    "type": "string",
                    "description": "Output format",
                    "enum": ["json", "csv"]
                }
            },
            "required": ["data", "from_format", "to_format"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let from = req_str(args, "from_format")?;
        let to = req_str(args, "to_format")?;
        let data = args
            .get("data")
            .ok_or_else(|| ToolError::MissingParameter("data".to_string()))?;

        let parsed = match (from, data) {
            ("json", Value::String(raw)) => serde_json::from_str(raw)
                .map_err(|e| ToolError::InvalidArgument(format!("Invalid JSON data: {e}")))?,
            ("json", other) => other.clone(),
            ("csv", Value::String(raw)) => csv_to_json(raw)
                .map_err(|e| ToolError::InvalidArgument(format!("Invalid CSV data: {e}")))?,
            ("csv", _) => {
                return Err(ToolError::InvalidArgument("CSV data must be string".to_string()))
            }
            (other, _) => {
                return Err(ToolError::InvalidArgument(format!(
                    "Unknown from_format: {other}"
                )))
            }
        };

        let output = match to {
            "json" => serde_json::to_string_pretty(&parsed)
                .map_err(|e| ToolError::Failed(e.to_string()))?,
            "csv" => json_to_csv(&parsed)?,
            other => {
                return Err(ToolError::InvalidArgument(format!(
                    "Unknown to_format: {other}"
                )))
            }
        };

        Ok(ToolResult::success(Value::String(output))
            .with_meta("from_format", from)
            .with_meta("to_format", to))
    }
}
