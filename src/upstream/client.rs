//! reqwest client for the vLLM OpenAI server.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::UpstreamConfig;
use crate::protocol::{ChatCompletionRequest, ChatCompletionResponse, ModelList};
use crate::upstream::{ChatBackend, UpstreamError};

/// Client for a single vLLM server.
#[derive(Debug, Clone)]
pub struct VllmClient {
    http: reqwest::Client,
    base_url: String,
}

impl VllmClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "vLLM HTTP error");
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// vLLM rejects `null` content on some message roles; send empty strings.
fn sanitize(request: &ChatCompletionRequest) -> ChatCompletionRequest {
    let mut request = request.clone();
    request.stream = false;
    for message in &mut request.messages {
        if message.content.is_none() {
            message.content = Some(String::new());
        }
    }
    request
}

#[async_trait]
impl ChatBackend for VllmClient {
    async fn chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, UpstreamError> {
        let payload = sanitize(request);
        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            tools = payload.tool_list().len(),
            "vLLM chat request"
        );

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn models(&self) -> Result<ModelList, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn health(&self) -> Result<(), UpstreamError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }
}
