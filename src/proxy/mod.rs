//! Tool calling proxy.
//!
//! - [`stats`]: strategy identifiers and request counters
//! - [`agent`]: server-side tool execution loop
//!
//! Requests carrying tools go through four strategies in priority order
//! until one produces tool calls (or a justified direct answer). Requests
//! without tools pass straight through to vLLM.

pub mod agent;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RoutingConfig;
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::protocol::{
    last_user_message, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ToolChoice,
};
use crate::routing::{
    detect_primary_tool, enhance_messages, fallback_detection, parse_routing_decision,
    routing_prompt, RoutingDecision,
};
use crate::tools::ToolRegistry;
use crate::upstream::{ChatBackend, UpstreamError};

pub use agent::{AgentOutcome, ToolTrace};
pub use stats::{ProxyCounters, ProxyStats, Strategy};

/// Why a single strategy did not produce an answer.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("could not determine primary tool")]
    NoCandidate,

    #[error("no tool_calls in response")]
    NoToolCalls,

    #[error("model selected tool '{0}', which the request does not offer")]
    UnknownTool(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub struct ToolCallProxy {
    /// Upstream chat backend (vLLM).
    backend: Arc<dyn ChatBackend>,

    /// Local tools, used to verify bridged calls and for agent mode.
    registry: Arc<ToolRegistry>,

    metrics: Arc<Metrics>,

    /// Strategy tuning.
    config: RoutingConfig,

    /// Model used when a request leaves `model` empty.
    default_model: String,

    counters: ProxyCounters,
}

impl ToolCallProxy {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<ToolRegistry>,
        metrics: Arc<Metrics>,
        config: RoutingConfig,
        default_model: &str,
    ) -> Self {
        Self {
            backend,
            registry,
            metrics,
            config,
            default_model: default_model.to_string(),
            counters: ProxyCounters::default(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn stats(&self) -> ProxyStats {
        self.counters.snapshot()
    }

    /// Handle one chat completion request.
    pub async fn process(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProxyError> {
        self.counters.record_request();
        self.metrics.inc_requests();
        if request.model.is_empty() {
            request.model = self.default_model.clone();
        }
        request.stream = false;

        let tool_count = request.tool_list().len();
        info!(model = %request.model, tools = tool_count, "Processing chat completion");

        let opted_out = request.tool_choice.as_ref().is_some_and(ToolChoice::is_none);
        if tool_count == 0 || opted_out {
            debug!("No tools in play, passing through to vLLM");
            self.counters.record_passthrough();
            return Ok(self.backend.chat(&request.without_tools()).await?);
        }

        let started = Instant::now();
        for strategy in Strategy::ALL {
            match self.attempt(strategy, &request).await {
                Ok(response) => {
                    info!(
                        strategy = strategy.label(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "{} succeeded",
                        strategy.describe()
                    );
                    self.counters.record_success(strategy);
                    self.metrics.inc_strategy(strategy.label(), true);
                    return Ok(response);
                }
                Err(e) => {
                    warn!(strategy = strategy.label(), error = %e, "{} failed", strategy.describe());
                    self.metrics.inc_strategy(strategy.label(), false);
                }
            }
        }

        self.counters.record_failure();
        Err(ProxyError::StrategiesExhausted)
    }

    /// Run a single strategy.
    pub async fn attempt(
        &self,
        strategy: Strategy,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        match strategy {
            Strategy::NamedFunction => self.named_function(request).await,
            Strategy::AutoGuided => self.auto_guided(request).await,
            Strategy::StructuredBridge => self.structured_bridge(request).await,
            Strategy::TwoPassRouter => self.two_pass_router(request).await,
        }
    }

    async fn named_function(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        let tool = detect_primary_tool(&request.messages, &request.tool_names())
            .ok_or(StrategyError::NoCandidate)?;
        debug!(tool = %tool, "Forcing named tool choice");

        let forced = ChatCompletionRequest {
            tool_choice: Some(ToolChoice::named(&tool)),
            ..request.clone()
        };
        let response = self.backend.chat(&forced).await?;
        if response.has_tool_calls() {
            Ok(response)
        } else {
            Err(StrategyError::NoToolCalls)
        }
    }

    async fn auto_guided(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        let guided = ChatCompletionRequest {
            messages: enhance_messages(&request.messages, &self.config.tool_use_instruction),
            tool_choice: Some(ToolChoice::auto()),
            temperature: self.config.guided_temperature,
            ..request.clone()
        };
        let response = self.backend.chat(&guided).await?;
        if response.has_tool_calls() {
            Ok(response)
        } else {
            Err(StrategyError::NoToolCalls)
        }
    }

    async fn structured_bridge(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        match self.routing_decision(request).await? {
            RoutingDecision::Direct => self.plain_completion(request).await,
            RoutingDecision::UseTool {
                tool_name,
                parameters,
            } => self.bridge(request, &tool_name, parameters).await,
        }
    }

    async fn two_pass_router(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        // Pass 1: tool or direct answer.
        let (tool_name, model_params) = match self.routing_decision(request).await? {
            RoutingDecision::Direct => return self.plain_completion(request).await,
            RoutingDecision::UseTool {
                tool_name,
                parameters,
            } => (tool_name, parameters),
        };

        // Pass 2: parameters from the user's own words when they parse.
        let text = last_user_message(&request.messages).unwrap_or("");
        let parameters = match fallback_detection(text, &request.tool_names()) {
            RoutingDecision::UseTool {
                tool_name: detected,
                parameters,
            } if detected == tool_name => parameters,
            _ => model_params,
        };
        self.bridge(request, &tool_name, parameters).await
    }

    /// Ask the model which tool to use. Unparseable answers fall back to
    /// pattern detection on the last user message.
    async fn routing_decision(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<RoutingDecision, StrategyError> {
        let prompt = routing_prompt(&request.messages, request.tool_list());
        let routing_request = ChatCompletionRequest {
            temperature: 0.0,
            max_tokens: self.config.routing_max_tokens,
            ..ChatCompletionRequest::new(&request.model, vec![ChatMessage::user(prompt)])
        };
        let response = self.backend.chat(&routing_request).await?;

        match parse_routing_decision(response.first_content()) {
            Ok(decision) => Ok(decision),
            Err(e) => {
                debug!(error = %e, "Routing answer unusable, using pattern detection");
                let text = last_user_message(&request.messages).unwrap_or("");
                Ok(fallback_detection(text, &request.tool_names()))
            }
        }
    }

    /// Verify a chosen tool call and answer with it in OpenAI shape. Tools
    /// the local registry knows are executed first and must succeed.
    async fn bridge(
        &self,
        request: &ChatCompletionRequest,
        tool_name: &str,
        parameters: Map<String, Value>,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        if !request.tool_names().contains(&tool_name) {
            return Err(StrategyError::UnknownTool(tool_name.to_string()));
        }

        if self.registry.contains(tool_name) {
            let result = self.registry.execute(tool_name, &parameters).await;
            info!(tool = tool_name, status = %result.status, "Bridged tool executed");
            if !result.is_success() {
                return Err(StrategyError::ToolFailed {
                    tool: tool_name.to_string(),
                    message: result.error.unwrap_or_default(),
                });
            }
        }

        Ok(ChatCompletionResponse::tool_call(
            &request.model,
            tool_name,
            &Value::Object(parameters),
        ))
    }

    async fn plain_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StrategyError> {
        Ok(self.backend.chat(&request.without_tools()).await?)
    }
}
