//! Upstream vLLM connection.
//!
//! - [`client`]: reqwest-backed [`VllmClient`]
//!
//! The proxy only talks to upstream through [`ChatBackend`], so tests can
//! swap in a scripted backend.

pub mod client;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ChatCompletionRequest, ChatCompletionResponse, ModelList};

pub use client::VllmClient;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("vLLM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to reach vLLM: {0}")]
    Transport(String),

    #[error("vLLM request timed out")]
    Timeout,

    #[error("could not decode vLLM response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// An OpenAI-compatible chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one non-streaming chat completion.
    async fn chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError>;

    /// List served models.
    async fn models(&self) -> Result<ModelList, UpstreamError>;

    /// Check that the backend answers its health endpoint.
    async fn health(&self) -> Result<(), UpstreamError>;
}
