//! Agent mode: the proxy executes tool calls itself and feeds the results
//! back to the model until it answers in plain text.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::protocol::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ToolChoice};
use crate::proxy::ToolCallProxy;
use crate::tools::ToolResult;

/// One tool execution performed during an agent run.
#[derive(Debug, Clone, Serialize)]
pub struct ToolTrace {
    pub round: usize,
    pub tool: String,
    pub arguments: Value,
    pub result: ToolResult,
}

/// Final completion plus every tool call made to reach it.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub response: ChatCompletionResponse,
    pub tool_trace: Vec<ToolTrace>,
}

impl ToolCallProxy {
    /// Run the model with the local tool registry, executing its tool calls
    /// in-process, for at most `max_tool_rounds` rounds of calls.
    pub async fn run_agent(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<AgentOutcome, ProxyError> {
        if request.model.is_empty() {
            request.model = self.default_model.clone();
        }
        if request.tool_list().is_empty() {
            request.tools = Some(self.registry.definitions(None));
        }
        request.tool_choice = Some(ToolChoice::auto());
        request.stream = false;

        let max_rounds = self.config.max_tool_rounds;
        let mut trace = Vec::new();

        for round in 0..=max_rounds {
            let response = self.backend.chat(&request).await?;
            if !response.has_tool_calls() {
                info!(rounds = round, tool_calls = trace.len(), "Agent finished");
                return Ok(AgentOutcome {
                    response,
                    tool_trace: trace,
                });
            }
            if round == max_rounds {
                break;
            }

            let calls = response.tool_calls().to_vec();
            if let Some(message) = response.first_message() {
                request.messages.push(message.clone());
            }

            for call in calls {
                let name = call.function.name.as_str();
                let (arguments, result) = match call.function.parsed_arguments() {
                    Ok(args) => {
                        let result = self.registry.execute(name, &args).await;
                        (Value::Object(args), result)
                    }
                    Err(e) => (
                        Value::String(call.function.arguments.clone()),
                        ToolResult::error(format!("Invalid arguments: {e}")),
                    ),
                };
                debug!(round, tool = name, status = %result.status, "Agent tool call");

                request
                    .messages
                    .push(ChatMessage::tool(&call.id, name, result.to_llm_string()));
                trace.push(ToolTrace {
                    round,
                    tool: name.to_string(),
                    arguments,
                    result,
                });
            }
        }

        Err(ProxyError::TooManyToolRounds(max_rounds))
    }
}
