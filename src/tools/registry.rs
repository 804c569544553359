//! Tool registry: registration, argument validation, timed execution and
//! per-tool usage statistics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::metrics::Metrics;
use crate::protocol::ToolDefinition;
use crate::tools::calculator::CalculatorTool;
use crate::tools::data::{DataTransformTool, JsonParseTool, JsonQueryTool};
use crate::tools::file::{FileListTool, FileReadTool, FileWriteTool, PathGuard};
use crate::tools::statistics::StatisticsTool;
use crate::tools::system::{EnvironmentTool, ProcessListTool, SystemInfoTool};
use crate::tools::time::TimeTool;
use crate::tools::web::ApiRequestTool;
use crate::tools::{Tool, ToolResult, ToolStatus};

#[derive(Debug, Default, Clone)]
struct UsageCounters {
    usage: u64,
    success: u64,
    error: u64,
    last_used: Option<DateTime<Utc>>,
}

struct Entry {
    tool: Arc<dyn Tool>,
    counters: Mutex<UsageCounters>,
}

/// Usage statistics for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub usage_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub success_rate: f64,
}

/// Registry-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub categories: Vec<String>,
    pub tools: Vec<ToolStats>,
}

/// Summary of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters: Value,
    pub timeout: f64,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    metrics: Option<Arc<Metrics>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn with_builtin_tools(config: &ToolsConfig) -> Self {
        let guard = PathGuard::new(config.allowed_paths.clone());
        let mut registry = Self::new();

        registry.register(Arc::new(FileReadTool::new(guard.clone(), config.max_file_bytes)));
        registry.register(Arc::new(FileWriteTool::new(guard.clone(), config.max_file_bytes)));
        registry.register(Arc::new(FileListTool::new(guard)));

        registry.register(Arc::new(SystemInfoTool));
        registry.register(Arc::new(ProcessListTool));
        registry.register(Arc::new(EnvironmentTool::new(config.allowed_env_vars.clone())));

        registry.register(Arc::new(CalculatorTool));
        registry.register(Arc::new(StatisticsTool));
        registry.register(Arc::new(TimeTool::new(&config.default_timezone)));

        registry.register(Arc::new(JsonParseTool));
        registry.register(Arc::new(JsonQueryTool));
        registry.register(Arc::new(DataTransformTool));

        if !config.allowed_hosts.is_empty() {
            match ApiRequestTool::new(config.allowed_hosts.clone()) {
                Ok(tool) => registry.register(Arc::new(tool)),
                Err(e) => warn!(error = %e, "api_request tool disabled"),
            }
        }

        info!(
            tools = registry.len(),
            categories = registry.categories().len(),
            "Initialized tool registry"
        );
        registry
    }

    pub fn set_metrics(&mut self, metrics: Arc<Metrics>) {
        self.metrics = Some(metrics);
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.entries.contains_key(&name) {
            warn!(tool = %name, "Tool already registered, overwriting");
        } else {
            self.order.push(name.clone());
        }
        info!(tool = %name, category = tool.category(), "Registered tool");
        self.entries.insert(
            name,
            Entry {
                tool,
                counters: Mutex::new(UsageCounters::default()),
            },
        );
    }

    /// Remove a tool. Returns false if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        if self.entries.remove(name).is_none() {
            return false;
        }
        self.order.retain(|n| n != name);
        info!(tool = name, "Unregistered tool");
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(name).map(|e| e.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        self.order.iter().filter_map(|n| self.entries.get(n))
    }

    /// Tool names, optionally restricted to a category.
    pub fn list(&self, category: Option<&str>) -> Vec<String> {
        self.ordered()
            .filter(|e| category.is_none_or(|c| e.tool.category() == c))
            .map(|e| e.tool.name().to_string())
            .collect()
    }

    /// Distinct categories in registration order.
    pub fn categories(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for entry in self.ordered() {
            let category = entry.tool.category();
            if !seen.iter().any(|c: &String| c == category) {
                seen.push(category.to_string());
            }
        }
        seen
    }

    pub fn info(&self, name: &str) -> Option<ToolInfo> {
        self.entries.get(name).map(|e| tool_info(e.tool.as_ref()))
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.ordered().map(|e| tool_info(e.tool.as_ref())).collect()
    }

    /// OpenAI function definitions, optionally restricted to a category.
    pub fn definitions(&self, category: Option<&str>) -> Vec<ToolDefinition> {
        self.ordered()
            .filter(|e| category.is_none_or(|c| e.tool.category() == c))
            .map(|e| e.tool.definition())
            .collect()
    }

    /// Execute a tool by name. Never fails: every problem is reported in
    /// the returned [`ToolResult`].
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> ToolResult {
        let Some(entry) = self.entries.get(name) else {
            return ToolResult::error(format!("Tool '{name}' not found"))
                .with_meta("available_tools", self.list(None));
        };

        if let Err(message) = validate_params(&entry.tool.parameters(), args) {
            self.record(name, entry, ToolStatus::Error);
            return ToolResult::error(message);
        }

        let timeout = entry.tool.timeout();
        let result = match tokio::time::timeout(timeout, entry.tool.execute(args)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool failed");
                ToolResult::error(e.to_string())
            }
            Err(_) => {
                warn!(tool = name, timeout_secs = timeout.as_secs_f64(), "Tool timed out");
                ToolResult::timeout(format!(
                    "Tool execution timed out after {} seconds",
                    timeout.as_secs_f64()
                ))
            }
        };

        self.record(name, entry, result.status);
        result
    }

    fn record(&self, name: &str, entry: &Entry, status: ToolStatus) {
        if let Ok(mut counters) = entry.counters.lock() {
            counters.usage += 1;
            counters.last_used = Some(Utc::now());
            if status == ToolStatus::Success {
                counters.success += 1;
            } else {
                counters.error += 1;
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_tool(name, status.as_str());
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let tools = self
            .ordered()
            .map(|e| {
                let c = e.counters.lock().map(|c| c.clone()).unwrap_or_default();
                ToolStats {
                    name: e.tool.name().to_string(),
                    usage_count: c.usage,
                    success_count: c.success,
                    error_count: c.error,
                    last_used: c.last_used,
                    success_rate: if c.usage > 0 {
                        c.success as f64 / c.usage as f64
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        RegistryStats {
            total_tools: self.len(),
            categories: self.categories(),
            tools,
        }
    }

    pub fn reset_stats(&self) {
        for entry in self.entries.values() {
            if let Ok(mut counters) = entry.counters.lock() {
                *counters = UsageCounters::default();
            }
        }
    }
}

fn tool_info(tool: &dyn Tool) -> ToolInfo {
    ToolInfo {
        name: tool.name().to_string(),
        category: tool.category().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters(),
        timeout: tool.timeout().as_secs_f64(),
    }
}

/// Check `args` against the `required` list and the declared property types.
/// `null` values count as absent.
pub fn validate_params(schema: &Value, args: &Map<String, Value>) -> Result<(), String> {
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for name in required.iter().filter_map(Value::as_str) {
        if args.get(name).is_none_or(Value::is_null) {
            return Err(format!("Missing required parameter: {name}"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in args {
        if value.is_null() {
            continue;
        }
        let Some(declared) = properties.get(name).and_then(|p| p.get("type")) else {
            continue;
        };
        let allowed: Vec<&str> = match declared {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if !allowed.iter().any(|t| matches_type(t, value)) {
            return Err(format!("Parameter {name} must be {}", article(&allowed)));
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn article(types: &[&str]) -> String {
    types
        .iter()
        .map(|t| match t.chars().next() {
            Some('a' | 'e' | 'i' | 'o' | 'u') => format!("an {t}"),
            _ => format!("a {t}"),
        })
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn category(&self) -> &str {
            "test"
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success(Value::Null))
        }
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validate_required_and_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "data": {"type": ["string", "object", "array"]},
                "n": {"type": "integer"}
            },
            "required": ["path"]
        });
        assert_eq!(
            validate_params(&schema, &args(json!({}))).unwrap_err(),
            "Missing required parameter: path"
        );
        assert_eq!(
            validate_params(&schema, &args(json!({"path": 1}))).unwrap_err(),
            "Parameter path must be a string"
        );
        assert!(validate_params(&schema, &args(json!({"path": "x", "data": [1]}))).is_ok());
        assert!(validate_params(&schema, &args(json!({"path": "x", "n": 1.5}))).is_err());
        assert!(validate_params(&schema, &args(json!({"path": "x", "extra": true}))).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", &Map::new()).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.error.as_deref(), Some("Tool 'nope' not found"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_counted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));

        let result = registry.execute("slow", &Map::new()).await;
        assert_eq!(result.status, ToolStatus::Timeout);

        let stats = registry.stats();
        assert_eq!(stats.tools[0].usage_count, 1);
        assert_eq!(stats.tools[0].error_count, 1);

        registry.reset_stats();
        assert_eq!(registry.stats().tools[0].usage_count, 0);
    }

    #[tokio::test]
    async fn test_builtin_registry_executes_calculator() {
        let registry = ToolRegistry::with_builtin_tools(&ToolsConfig::default());
        assert!(registry.contains("calculator"));
        assert!(!registry.contains("api_request"));

        let result = registry
            .execute("calculator", &args(json!({"expression": "6 * 7"})))
            .await;
        assert!(result.is_success());
        assert_eq!(result.data["result"], json!(42));

        let stats = registry.stats();
        let calc = stats.tools.iter().find(|t| t.name == "calculator").unwrap();
        assert_eq!(calc.success_rate, 1.0);
    }

    #[test]
    fn test_register_overwrite_and_unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(SlowTool));
        assert_eq!(registry.list(None), vec!["slow".to_string()]);
        assert_eq!(registry.list(Some("other")), Vec::<String>::new());
        assert_eq!(registry.categories(), vec!["test".to_string()]);

        assert!(registry.unregister("slow"));
        assert!(!registry.unregister("slow"));
        assert!(registry.is_empty());
    }
}
