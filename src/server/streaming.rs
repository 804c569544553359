//! SSE (Server-Sent Events) rendering of a finished completion.
//!
//! The proxy fetches whole responses from vLLM, so a streamed answer is
//! re-chunked here into the OpenAI streaming format: a role chunk carrying
//! the content and any tool calls, a finish chunk, then `[DONE]`.

use axum::response::sse::Event;
use futures::stream::Stream;
use serde::Serialize;

use crate::protocol::{ChatCompletionResponse, FunctionCall};

/// Streaming chat completion chunk (OpenAI-compatible).
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Tool call fragment; streamed tool calls carry their position.
#[derive(Debug, Serialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// Split a completion into streaming chunks.
pub fn response_to_chunks(response: ChatCompletionResponse) -> Vec<ChatCompletionChunk> {
    let chunk = |choices: Vec<ChunkChoice>| ChatCompletionChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk",
        created: response.created,
        model: response.model.clone(),
        choices,
    };

    let mut opening = Vec::new();
    let mut closing = Vec::new();
    for choice in &response.choices {
        let tool_calls = choice.message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: call.id.clone(),
                    kind: call.kind.clone(),
                    function: call.function.clone(),
                })
                .collect()
        });
        opening.push(ChunkChoice {
            index: choice.index,
            delta: ChunkDelta {
                role: Some(choice.message.role.clone()),
                content: choice.message.content.clone().filter(|c| !c.is_empty()),
                tool_calls,
            },
            finish_reason: None,
        });
        closing.push(ChunkChoice {
            index: choice.index,
            delta: ChunkDelta::default(),
            finish_reason: Some(
                choice
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            ),
        });
    }

    vec![chunk(opening), chunk(closing)]
}

/// Convert a completion into an SSE stream terminated by `[DONE]`.
pub fn response_to_sse_stream(
    response: ChatCompletionResponse,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let events: Vec<Result<Event, std::convert::Infallible>> = response_to_chunks(response)
        .iter()
        .map(|chunk| {
            let data = serde_json::to_string(chunk).unwrap_or_default();
            Ok(Event::default().data(data))
        })
        // Append the [DONE] sentinel after all events.
        .chain(std::iter::once(Ok(Event::default().data("[DONE]"))))
        .collect();
    tokio_stream::iter(events)
}
