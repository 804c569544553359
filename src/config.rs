//! Runtime configuration for vllm-tool-proxy.
//!
//! Configuration is loaded from a JSON file (missing file or fields fall back
//! to defaults) and then patched from a handful of environment variables.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vllm-tool-proxy",
    version,
    about = "Tool-calling proxy and deployment helper for a vLLM workstation"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the OpenAI-compatible tool-calling proxy.
    Serve(ServeArgs),

    /// Manage the docker compose stack (vLLM + proxy).
    Stack(StackArgs),

    /// Check or sync Dockerfile version pins.
    Versions(VersionsArgs),

    /// Probe a health endpoint until it answers.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP listen address (overrides the config file).
    #[arg(long, env = "PROXY_LISTEN")]
    pub listen: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    #[command(subcommand)]
    pub action: StackCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StackCommand {
    /// Start all services in the background.
    Start {
        /// Wait for the vLLM health endpoint after starting.
        #[arg(long)]
        wait: bool,
    },
    /// Stop and remove all services.
    Stop,
    /// Restart all services.
    Restart,
    /// Show service status.
    Status,
    /// Show service logs.
    Logs {
        /// Optional service name.
        service: Option<String>,
        /// Follow log output.
        #[arg(short, long)]
        follow: bool,
        /// Number of lines from the end of the logs.
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },
    /// Build the local vLLM image.
    Build,
}

#[derive(Args, Debug, Clone)]
pub struct VersionsArgs {
    /// JSON file holding the version pins.
    #[arg(long, default_value = "versions.json")]
    pub pins: PathBuf,

    /// Dockerfiles to check or rewrite.
    #[arg(long = "dockerfile", required = true)]
    pub dockerfiles: Vec<PathBuf>,

    #[arg(value_enum)]
    pub mode: VersionsMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VersionsMode {
    Check,
    Sync,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Base URL to probe (defaults to the upstream vLLM URL).
    #[arg(long)]
    pub url: Option<String>,

    /// Number of attempts before giving up.
    #[arg(long, default_value_t = 30)]
    pub attempts: u32,

    /// Seconds between attempts.
    #[arg(long, default_value_t = 2)]
    pub interval_secs: u64,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream vLLM connection.
    pub upstream: UpstreamConfig,

    /// Built-in tool settings.
    pub tools: ToolsConfig,

    /// Fallback strategy tuning.
    pub routing: RoutingConfig,

    /// Docker stack management.
    pub stack: StackConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8001").
    pub listen: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8001".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Upstream vLLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the vLLM OpenAI server, without the `/v1` suffix.
    pub base_url: String,

    /// Model name served by vLLM.
    pub model: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory roots the file tools may touch.
    pub allowed_paths: Vec<PathBuf>,

    /// Largest file the file tools will read or write, in bytes.
    pub max_file_bytes: u64,

    /// Environment variables `env_get` may reveal.
    pub allowed_env_vars: Vec<String>,

    /// Hosts `api_request` may call. Empty disables the tool.
    pub allowed_hosts: Vec<String>,

    /// Default timezone for `time_now`.
    pub default_timezone: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_paths: vec![PathBuf::from("/tmp")],
            max_file_bytes: 10 * 1024 * 1024, // 10 MB
            allowed_env_vars: [
                "PATH", "HOME", "USER", "SHELL", "PWD", "LANG", "PORT", "HOST",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_hosts: Vec::new(),
            default_timezone: "Asia/Seoul".to_string(),
        }
    }
}

/// Tool-calling strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Temperature used for the auto + guided strategy.
    pub guided_temperature: f64,

    /// Token budget for the routing prompt answer.
    pub routing_max_tokens: u32,

    /// Maximum tool round-trips in agent mode.
    pub max_tool_rounds: usize,

    /// Instruction appended to the system prompt to encourage tool use.
    pub tool_use_instruction: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            guided_temperature: 0.1,
            routing_max_tokens: 150,
            max_tool_rounds: 4,
            tool_use_instruction: "정확성을 위해 가능한 경우 항상 제공된 도구를 사용하세요."
                .to_string(),
        }
    }
}

/// Docker stack settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// docker compose file.
    pub compose_file: PathBuf,

    /// docker compose project name.
    pub project: String,

    /// Dockerfile used to build the local vLLM image.
    pub dockerfile: PathBuf,

    /// Tag for the locally built vLLM image.
    pub image_tag: String,

    /// `TORCH_CUDA_ARCH_LIST` build argument (12.0 = Blackwell / sm_120).
    pub torch_cuda_arch_list: String,

    /// Seconds to wait between readiness probes.
    pub probe_interval_secs: u64,

    /// Readiness probes before `start --wait` gives up.
    pub probe_attempts: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            project: "gpt-oss".to_string(),
            dockerfile: PathBuf::from("Dockerfile.vllm"),
            image_tag: "vllm-local:latest".to_string(),
            torch_cuda_arch_list: "12.0".to_string(),
            probe_interval_secs: 5,
            probe_attempts: 60,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides. The lookup is injected so tests do not
    /// have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VLLM_URL") {
            self.upstream.base_url = normalize_base_url(&url);
        }
        if let Some(model) = lookup("VLLM_MODEL") {
            self.upstream.model = model;
        }
        if let Some(listen) = lookup("PROXY_LISTEN") {
            self.server.listen = listen;
        }
    }
}

/// Accept either a base URL or a full `/v1/chat/completions` URL, as the
/// deployment scripts historically exported the latter.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    for suffix in ["/v1/chat/completions", "/v1"] {
        if let Some(base) = trimmed.strip_suffix(suffix) {
            return base.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.server.listen, "0.0.0.0:8001");
        assert_eq!(cfg.upstream.base_url, "http://localhost:8000");
        assert_eq!(cfg.routing.routing_max_tokens, 150);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"upstream": {"model": "qwen3"}}"#).unwrap();
        assert_eq!(cfg.upstream.model, "qwen3");
        assert_eq!(cfg.upstream.timeout_secs, 30);
        assert_eq!(cfg.stack.project, "gpt-oss");
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| match key {
            "VLLM_URL" => Some("http://vllm:8000/v1/chat/completions".to_string()),
            "PROXY_LISTEN" => Some("127.0.0.1:9000".to_string()),
            _ => None,
        });
        assert_eq!(cfg.upstream.base_url, "http://vllm:8000");
        assert_eq!(cfg.server.listen, "127.0.0.1:9000");
        assert_eq!(cfg.upstream.model, "openai/gpt-oss-20b");
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://h:8000/"), "http://h:8000");
        assert_eq!(normalize_base_url("http://h:8000/v1"), "http://h:8000");
    }
}
