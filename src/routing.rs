//! Keyword and pattern tool router.
//!
//! Used by the proxy strategies to guess which tool a request needs when the
//! model cannot be trusted to choose, and to parse the model's own routing
//! answers.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::{last_user_message, ChatMessage, ToolDefinition};
use crate::tools::time::find_timezone_alias;

const CALCULATOR_WORDS: &[&str] = &["계산", "곱하기", "더하기", "빼기", "나누기", "calculate"];
const TIME_WORDS: &[&str] = &["시간", "몇 시", "몇시", "시각", "time"];
const WEATHER_WORDS: &[&str] = &["날씨", "기온", "weather", "temperature"];
const SYSTEM_WORDS: &[&str] = &["시스템", "cpu", "메모리", "memory"];

static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*(×|\*|곱하기|\+|더하기|-|빼기|/|÷|나누기)\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("arithmetic pattern is valid")
});

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("code fence pattern is valid")
});

/// What the router decided for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// Answer directly, no tool.
    Direct,
    UseTool {
        tool_name: String,
        parameters: Map<String, Value>,
    },
}

impl RoutingDecision {
    pub fn tool(name: &str, parameters: Value) -> Self {
        RoutingDecision::UseTool {
            tool_name: name.to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no JSON object in routing answer")]
    NoJson,

    #[error("malformed routing answer: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("routing answer selects a tool without naming it")]
    MissingToolName,
}

/// Word match: non-ASCII keywords are substrings, ASCII keywords need
/// word boundaries so "time" does not fire on "sometimes".
fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| {
        if !word.is_ascii() {
            return text.contains(word);
        }
        text.match_indices(word).any(|(start, _)| {
            let before = text[..start].chars().next_back();
            let after = text[start + word.len()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_alphanumeric())
                && !after.is_some_and(|c| c.is_ascii_alphanumeric())
        })
    })
}

/// Guess the tool a request most likely needs, among `available`. Falls back
/// to the first available tool; `None` only when nothing is available.
pub fn detect_primary_tool(messages: &[ChatMessage], available: &[&str]) -> Option<String> {
    let text = last_user_message(messages)?.to_lowercase();
    let has = |name: &str| available.contains(&name);

    let candidates = [
        (
            "calculator",
            mentions(&text, CALCULATOR_WORDS) || ARITHMETIC.is_match(&text),
        ),
        ("time_now", mentions(&text, TIME_WORDS)),
        ("get_weather", mentions(&text, WEATHER_WORDS)),
        ("system_info", mentions(&text, SYSTEM_WORDS)),
    ];
    candidates
        .iter()
        .find(|(name, hit)| *hit && has(name))
        .map(|(name, _)| name.to_string())
        .or_else(|| available.first().map(|s| s.to_string()))
}

fn operator_symbol(op: &str) -> &'static str {
    match op {
        "×" | "*" | "곱하기" => "*",
        "+" | "더하기" => "+",
        "-" | "빼기" => "-",
        _ => "/",
    }
}

/// Pattern-based routing used when the model's routing answer is unusable.
pub fn fallback_detection(text: &str, available: &[&str]) -> RoutingDecision {
    let text = text.to_lowercase();
    let has = |name: &str| available.contains(&name);

    if has("calculator") {
        if let Some(caps) = ARITHMETIC.captures(&text) {
            let expression = format!("{} {} {}", &caps[1], operator_symbol(&caps[2]), &caps[3]);
            return RoutingDecision::tool("calculator", json!({ "expression": expression }));
        }
    }

    if has("time_now") && mentions(&text, TIME_WORDS) {
        let params = match find_timezone_alias(&text) {
            Some(zone) => json!({ "timezone": zone }),
            None => json!({}),
        };
        return RoutingDecision::tool("time_now", params);
    }

    if has("system_info") && mentions(&text, SYSTEM_WORDS) {
        return RoutingDecision::tool("system_info", json!({ "info_type": "all" }));
    }

    RoutingDecision::Direct
}

/// Append the tool-use instruction to the first system message, or insert a
/// system message carrying it.
pub fn enhance_messages(messages: &[ChatMessage], instruction: &str) -> Vec<ChatMessage> {
    let mut enhanced = messages.to_vec();
    match enhanced.iter_mut().find(|m| m.role == "system") {
        Some(system) => {
            let content = format!("{} {instruction}", system.text());
            system.content = Some(content);
        }
        None => enhanced.insert(0, ChatMessage::system(instruction)),
    }
    enhanced
}

/// Prompt asking the model for a JSON routing decision.
pub fn routing_prompt(messages: &[ChatMessage], tools: &[ToolDefinition]) -> String {
    let user = last_user_message(messages).unwrap_or("");
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}", t.function.name, t.function.description))
        .collect();

    format!(
        "다음 요청에 대해 도구를 사용해야 하는지 판단하고, 필요한 경우 도구 이름과 매개변수를 JSON으로 출력하세요.\n\
         \n\
         사용 가능한 도구:\n\
         {tools}\n\
         \n\
         사용자 요청: {user}\n\
         \n\
         도구가 필요한 경우 다음 형식으로만 출력:\n\
         {{\"use_tool\": true, \"tool_name\": \"도구명\", \"parameters\": {{\"매개변수\": \"값\"}}}}\n\
         \n\
         도구가 불필요한 경우:\n\
         {{\"use_tool\": false}}\n\
         \n\
         JSON만 출력하세요.",
        tools = tool_lines.join("\n"),
    )
}

fn extract_json_object(content: &str) -> Option<&str> {
    let body = CODE_FENCE
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content, |m| m.as_str());
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// Parse the model's routing answer.
///
/// Accepts `{"use_tool": false}`, `{"use_tool": true, "tool_name": …,
/// "parameters": {…}}`, and `{"tool_name": null}`. A missing `use_tool`
/// is inferred from whether `tool_name` is set.
pub fn parse_routing_decision(content: &str) -> Result<RoutingDecision, RoutingError> {
    let raw = extract_json_object(content).ok_or(RoutingError::NoJson)?;
    let value: Value = serde_json::from_str(raw)?;

    let tool_name = value
        .get("tool_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let use_tool = value
        .get("use_tool")
        .and_then(Value::as_bool)
        .unwrap_or(tool_name.is_some());

    if !use_tool {
        return Ok(RoutingDecision::Direct);
    }
    let tool_name = tool_name.ok_or(RoutingError::MissingToolName)?;
    let parameters = value
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Ok(RoutingDecision::UseTool {
        tool_name: tool_name.to_string(),
        parameters,
    })
}
