//! vllm-tool-proxy: tool calling for a self-hosted vLLM server.
//!
//! Sits between OpenAI-style clients and vLLM. Requests that carry tools go
//! through a prioritized fallback chain so models with unreliable native
//! tool calling still answer with well-formed `tool_calls`:
//!   named tool_choice → auto + guided prompt → structured bridge → two-pass router
//!
//! Also ships a registry of built-in tools, an agent loop that executes
//! them server-side, and the operational helpers for the Docker stack
//! (compose lifecycle, image build, version pins, readiness probe).

pub mod config;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod protocol;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod stack;
pub mod tools;
pub mod upstream;
pub mod versions;
