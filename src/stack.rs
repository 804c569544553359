//! Docker lifecycle for the vLLM serving stack.
//!
//! Wraps `docker compose` for the service lifecycle and `docker build` for
//! the local vLLM image. Argument vectors are built separately from
//! execution so they can be checked without Docker.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{StackCommand, StackConfig};
use crate::probe::{wait_for_health, ProbeError, ProbeReport};

#[derive(Debug, Error)]
pub enum StackError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", .code.map_or("a signal".to_string(), |c| format!("status {c}")))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("services started but vLLM is not ready: {0}")]
    NotReady(#[from] ProbeError),
}

/// A lifecycle operation on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackAction {
    Start,
    Stop,
    Restart,
    Status,
    Logs {
        service: Option<String>,
        follow: bool,
        tail: usize,
    },
    Build,
}

impl From<&StackCommand> for StackAction {
    fn from(command: &StackCommand) -> Self {
        match command {
            StackCommand::Start { .. } => StackAction::Start,
            StackCommand::Stop => StackAction::Stop,
            StackCommand::Restart => StackAction::Restart,
            StackCommand::Status => StackAction::Status,
            StackCommand::Logs {
                service,
                follow,
                tail,
            } => StackAction::Logs {
                service: service.clone(),
                follow: *follow,
                tail: *tail,
            },
            StackCommand::Build => StackAction::Build,
        }
    }
}

pub struct Stack {
    config: StackConfig,
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl Stack {
    pub fn new(config: StackConfig) -> Self {
        Self { config }
    }

    /// Arguments to `docker` for `action`.
    pub fn args(&self, action: &StackAction) -> Vec<String> {
        let subcommand: Vec<String> = match action {
            StackAction::Build => return self.build_args(),
            StackAction::Start => vec!["up".into(), "-d".into()],
            StackAction::Stop => vec!["down".into()],
            StackAction::Restart => vec!["restart".into()],
            StackAction::Status => vec!["ps".into()],
            StackAction::Logs {
                service,
                follow,
                tail,
            } => {
                let mut logs = vec!["logs".to_string(), "--tail".to_string(), tail.to_string()];
                if *follow {
                    logs.push("-f".to_string());
                }
                logs.extend(service.clone());
                logs
            }
        };

        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            path_arg(&self.config.compose_file),
            "-p".to_string(),
            self.config.project.clone(),
        ];
        args.extend(subcommand);
        args
    }

    /// `docker build` for the local vLLM image. The build context is the
    /// Dockerfile's directory.
    pub fn build_args(&self) -> Vec<String> {
        let context = self
            .config
            .dockerfile
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| ".".to_string(), path_arg);
        vec![
            "build".to_string(),
            "--build-arg".to_string(),
            format!("TORCH_CUDA_ARCH_LIST={}", self.config.torch_cuda_arch_list),
            "-t".to_string(),
            self.config.image_tag.clone(),
            "-f".to_string(),
            path_arg(&self.config.dockerfile),
            context,
        ]
    }

    /// Run `docker` for `action`, streaming its output to ours.
    pub async fn run(&self, action: &StackAction) -> Result<(), StackError> {
        let args = self.args(action);
        let command = format!("docker {}", args.join(" "));
        info!(command = %command, "Running");

        let status = tokio::process::Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| StackError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            warn!(command = %command, code = ?status.code(), "Command failed");
            Err(StackError::CommandFailed {
                command,
                code: status.code(),
            })
        }
    }

    /// Poll vLLM's health endpoint with the configured attempts and interval.
    pub async fn wait_ready(&self, base_url: &str) -> Result<ProbeReport, StackError> {
        let interval = Duration::from_secs(self.config.probe_interval_secs);
        info!(
            url = base_url,
            attempts = self.config.probe_attempts,
            "Waiting for vLLM to become ready"
        );
        Ok(wait_for_health(base_url, self.config.probe_attempts, interval).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> Stack {
        Stack::new(StackConfig::default())
    }

    #[test]
    fn test_compose_args() {
        let s = stack();
        assert_eq!(
            s.args(&StackAction::Start),
            ["compose", "-f", "docker-compose.yml", "-p", "gpt-oss", "up", "-d"]
        );
        assert_eq!(s.args(&StackAction::Stop).last().map(String::as_str), Some("down"));
        assert_eq!(s.args(&StackAction::Status).last().map(String::as_str), Some("ps"));
        assert_eq!(
            s.args(&StackAction::Logs {
                service: Some("vllm".into()),
                follow: true,
                tail: 50
            })[5..],
            ["logs", "--tail", "50", "-f", "vllm"]
        );
        assert_eq!(
            s.args(&StackAction::Logs {
                service: None,
                follow: false,
                tail: 100
            })[5..],
            ["logs", "--tail", "100"]
        );
    }

    #[test]
    fn test_build_args() {
        let s = Stack::new(StackConfig {
            dockerfile: "docker/Dockerfile.vllm".into(),
            ..StackConfig::default()
        });
        assert_eq!(
            s.args(&StackAction::Build),
            [
                "build",
                "--build-arg",
                "TORCH_CUDA_ARCH_LIST=12.0",
                "-t",
                "vllm-local:latest",
                "-f",
                "docker/Dockerfile.vllm",
                "docker"
            ]
        );
        assert_eq!(stack().build_args().last().map(String::as_str), Some("."));
    }

    #[test]
    fn test_from_cli_command() {
        assert_eq!(
            StackAction::from(&StackCommand::Start { wait: true }),
            StackAction::Start
        );
        assert_eq!(
            StackAction::from(&StackCommand::Logs {
                service: None,
                follow: true,
                tail: 10
            }),
            StackAction::Logs {
                service: None,
                follow: true,
                tail: 10
            }
        );
    }

    #[test]
    fn test_failed_command_message() {
        let err = StackError::CommandFailed {
            command: "docker compose ps".into(),
            code: Some(1),
        };
        assert_eq!(err.to_string(), "`docker compose ps` exited with status 1");
    }
}
