//! Host information tools backed by sysinfo.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sysinfo::{Disks, Networks, System};

use crate::tools::{opt_str, opt_u64, req_str, Tool, ToolError, ToolResult};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

fn gib(bytes: u64) -> f64 {
    (bytes as f64 / GIB * 100.0).round() / 100.0
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// A `System` with CPU usage sampled over the minimum update interval.
fn sampled_system() -> System {
    let mut sys = System::new_all();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_all();
    sys
}

fn os_info() -> Value {
    json!({
        "system": System::name(),
        "release": System::kernel_version(),
        "version": System::os_version(),
        "machine": std::env::consts::ARCH,
        "hostname": System::host_name(),
        "uptime_secs": System::uptime(),
    })
}

fn cpu_info(sys: &System) -> Value {
    let cpus = sys.cpus();
    json!({
        "count": cpus.len(),
        "brand": cpus.first().map(|c| c.brand().to_string()),
        "frequency_mhz": cpus.first().map(|c| c.frequency()),
        "usage_percent": round1(sys.global_cpu_usage() as f64),
    })
}

fn memory_info(sys: &System) -> Value {
    let total = sys.total_memory();
    let used = sys.used_memory();
    let percent = if total == 0 {
        0.0
    } else {
        round1(used as f64 / total as f64 * 100.0)
    };
    json!({
        "total_gb": gib(total),
        "available_gb": gib(sys.available_memory()),
        "used_gb": gib(used),
        "percent": percent,
    })
}

fn disk_info() -> Value {
    let disks = Disks::new_with_refreshed_list();
    let entries: Vec<Value> = disks
        .list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);
            let percent = if total == 0 {
                0.0
            } else {
                round1(used as f64 / total as f64 * 100.0)
            };
            json!({
                "mount_point": disk.mount_point().display().to_string(),
                "total_gb": gib(total),
                "used_gb": gib(used),
                "free_gb": gib(free),
                "percent": percent,
            })
        })
        .collect();
    Value::Array(entries)
}

fn network_info() -> Value {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces = Map::new();
    for (name, data) in &networks {
        let addrs: Vec<Value> = data
            .ip_networks()
            .iter()
            .map(|net| {
                json!({
                    "address": net.addr.to_string(),
                    "prefix": net.prefix,
                    "family": if net.addr.is_ipv4() { "ipv4" } else { "ipv6" },
                })
            })
            .collect();
        interfaces.insert(name.clone(), Value::Array(addrs));
    }
    Value::Object(interfaces)
}

/// Collect the sections named by `info_type`.
pub fn collect_system_info(info_type: &str) -> Result<Value, ToolError> {
    let mut out = Map::new();
    match info_type {
        "os" => {
            out.insert("os".into(), os_info());
        }
        "cpu" => {
            out.insert("cpu".into(), cpu_info(&sampled_system()));
        }
        "memory" => {
            let mut sys = System::new();
            sys.refresh_memory();
            out.insert("memory".into(), memory_info(&sys));
        }
        "disk" => {
            out.insert("disk".into(), disk_info());
        }
        "network" => {
            out.insert("network".into(), network_info());
        }
        "all" => {
            let sys = sampled_system();
            out.insert("os".into(), os_info());
            out.insert("cpu".into(), cpu_info(&sys));
            out.insert("memory".into(), memory_info(&sys));
            out.insert("disk".into(), disk_info());
            out.insert("network".into(), network_info());
        }
        other => {
            return Err(ToolError::InvalidArgument(format!(
                "Unknown info_type: {other}"
            )))
        }
    }
    Ok(Value::Object(out))
}

pub struct SystemInfoTool;

#[async_trait]
impl Tool for SystemInfoTool {
    fn name(&self) -> &str {
        "system_info"
    }

    fn description(&self) -> &str {
        "Get system information (CPU, memory, disk, network)"
    }

    fn category(&self) -> &str {
        "system"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "info_type": {
                    "type": "string",
                    "enum": ["all", "os", "cpu", "memory", "disk", "network"],
                    "description": "Type of system information to retrieve",
                    "default": "all"
                }
            }
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let info_type = opt_str(args, "info_type")?.unwrap_or("all").to_string();
        let data = tokio::task::spawn_blocking(move || collect_system_info(&info_type))
            .await
            .map_err(|e| ToolError::Failed(format!("system info task panicked: {e}")))??;
        Ok(ToolResult::success(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSort {
    Cpu,
    Memory,
    Name,
}

impl ProcessSort {
    fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw {
            "cpu" => Ok(Self::Cpu),
            "memory" => Ok(Self::Memory),
            "name" => Ok(Self::Name),
            other => Err(ToolError::InvalidArgument(format!(
                "Invalid sort_by: {other}. Use 'cpu', 'memory', or 'name'"
            ))),
        }
    }
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRow {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

impl ProcessRow {
    fn to_json(&self) -> Value {
        json!({
            "pid": self.pid,
            "name": self.name,
            "cpu_percent": round1(self.cpu_percent as f64),
            "memory_mb": round1(self.memory_mb),
        })
    }
}

/// Sort descending by usage (ascending by name) and keep the top `limit`.
pub fn top_processes(mut rows: Vec<ProcessRow>, sort: ProcessSort, limit: usize) -> Vec<ProcessRow> {
    match sort {
        ProcessSort::Cpu => rows.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent)),
        ProcessSort::Memory => rows.sort_by(|a, b| b.memory_mb.total_cmp(&a.memory_mb)),
        ProcessSort::Name => rows.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    rows.truncate(limit);
    rows
}

fn snapshot_processes() -> Vec<ProcessRow> {
    let sys = sampled_system();
    sys.processes()
        .iter()
        .map(|(pid, process)| ProcessRow {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() as f64 / MIB,
        })
        .collect()
}

pub struct ProcessListTool;

#[async_trait]
impl Tool for ProcessListTool {
    fn name(&self) -> &str {
        "process_list"
    }

    fn description(&self) -> &str {
        "List running processes"
    }

    fn category(&self) -> &str {
        "system"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sort_by": {
                    "type": "string",
                    "enum": ["cpu", "memory", "name"],
                    "description": "Sort processes by",
                    "default": "cpu"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of processes to return",
                    "default": 10
                }
            }
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let sort = ProcessSort::parse(opt_str(args, "sort_by")?.unwrap_or("cpu"))?;
        let limit = opt_u64(args, "limit")?.unwrap_or(10) as usize;

        let rows = tokio::task::spawn_blocking(snapshot_processes)
            .await
            .map_err(|e| ToolError::Failed(format!("process listing task panicked: {e}")))?;
        let total = rows.len();
        let top: Vec<Value> = top_processes(rows, sort, limit)
            .iter()
            .map(ProcessRow::to_json)
            .collect();

        Ok(ToolResult::success(Value::Array(top)).with_meta("total_processes", total))
    }
}

/// Reads environment variables from an allow-list.
pub struct EnvironmentTool {
    allowed: Vec<String>,
}

impl EnvironmentTool {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Tool for EnvironmentTool {
    fn name(&self) -> &str {
        "env_get"
    }

    fn description(&self) -> &str {
        "Get environment variable value (only allowed variables)"
    }

    fn category(&self) -> &str {
        "system"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "var_name": {"type": "string", "description": "Environment variable name"},
                "default": {"type": "string", "description": "Default value if variable not found"}
            },
            "required": ["var_name"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let name = req_str(args, "var_name")?;
        if !self.allowed.iter().any(|a| a == name) {
            return Err(ToolError::AccessDenied(format!(
                "Environment variable {name} is not in the allowed list"
            )));
        }
        let value = std::env::var(name)
            .ok()
            .or_else(|| opt_str(args, "default").ok().flatten().map(str::to_string));
        Ok(ToolResult::success(json!(value)).with_meta("var_name", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pid: u32, name: &str, cpu: f32, mem: f64) -> ProcessRow {
        ProcessRow {
            pid,
            name: name.to_string(),
            cpu_percent: cpu,
            memory_mb: mem,
        }
    }

    #[test]
    fn test_top_processes_sorting() {
        let rows = vec![
            row(1, "init", 0.1, 12.0),
            row(2, "vllm", 95.0, 4096.0),
            row(3, "bash", 2.0, 8.0),
        ];
        let by_cpu = top_processes(rows.clone(), ProcessSort::Cpu, 2);
        assert_eq!(by_cpu.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![2, 3]);

        let by_name = top_processes(rows.clone(), ProcessSort::Name, 10);
        assert_eq!(by_name[0].name, "bash");

        let by_mem = top_processes(rows, ProcessSort::Memory, 1);
        assert_eq!(by_mem[0].name, "vllm");
    }

    #[test]
    fn test_unknown_info_type() {
        assert!(collect_system_info("gpu").is_err());
        let os = collect_system_info("os").unwrap();
        assert_eq!(os["os"]["machine"], std::env::consts::ARCH);
    }

    #[tokio::test]
    async fn test_env_allow_list() {
        let tool = EnvironmentTool::new(vec!["PATH".to_string(), "UNSET_FOR_TEST_X".to_string()]);

        let args = json!({"var_name": "SECRET_KEY"}).as_object().cloned().unwrap();
        assert!(matches!(tool.execute(&args).await, Err(ToolError::AccessDenied(_))));

        let args = json!({"var_name": "UNSET_FOR_TEST_X", "default": "fallback"})
            .as_object()
            .cloned()
            .unwrap();
        let result = tool.execute(&args).await.unwrap();
        assert_eq!(result.data, json!("fallback"));
    }

    #[test]
    fn test_invalid_sort() {
        assert!(ProcessSort::parse("pid").is_err());
    }
}
