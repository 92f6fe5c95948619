//! Span-to-trajectory conversion
//!
//! Spans carry prompt/completion messages as flat indexed attributes whose
//! content may be a string, serialized JSON, or a list of typed blocks.
//! Everything converts to flat chat messages; tool results expand to
//! individual `tool` messages keyed by `tool_call_id`.

use crate::phoenix::Span;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

static SYSTEM_REMINDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").expect("valid reminder regex")
});

/// A trajectory extracted from one span, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanTrajectory {
    pub trace_id: String,
    pub span_id: String,
    pub model: String,
    pub timestamp: Option<String>,
    pub messages: Vec<Value>,
    pub usage: Value,
}

/// Parse content that may be a JSON-serialized list/object in a string.
fn parse_content(content: &Value) -> Value {
    match content {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|parsed| parsed.is_array() || parsed.is_object())
            .unwrap_or_else(|| content.clone()),
        other => other.clone(),
    }
}

/// Collect `(role, content)` pairs from `gen_ai.{section}.{i}.{role|content}`
/// attributes, ordered by numeric index.
fn indexed_messages(attributes: &Map<String, Value>, section: &str) -> Vec<(String, Value)> {
    let prefix = format!("gen_ai.{section}.");
    let mut indices: Vec<usize> = attributes
        .keys()
        .filter_map(|key| {
            key.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".role"))
                .and_then(|idx| idx.parse().ok())
        })
        .collect();
    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .filter_map(|i| {
            let role = attributes
                .get(&format!("{prefix}{i}.role"))
                .and_then(Value::as_str)?;
            let content = attributes.get(&format!("{prefix}{i}.content"))?;
            Some((role.to_string(), parse_content(content)))
        })
        .collect()
}

/// Convert a block-structured message into the flat chat format.
///
/// Assistant messages keep text/thinking/tool_calls separate; user messages
/// holding tool results become a synthetic `tool` message carrying the
/// result list for later expansion.
fn convert_to_flat_message(content: &Value, role: &str) -> Value {
    let blocks = match content {
        Value::String(text) => return json!({"role": role, "content": text}),
        Value::Array(blocks) => blocks,
        other => return json!({"role": role, "content": other.to_string()}),
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut thinking_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut tool_results: Vec<Value> = Vec::new();

    for block in blocks {
        let Some(block_type) = block.get("type").and_then(Value::as_str) else {
            text_parts.push(match block {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
            continue;
        };

        match block_type {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() && text != "(no content)" {
                        text_parts.push(text.to_string());
                    }
                }
            }
            "thinking" => {
                if let Some(thinking) = block.get("thinking").and_then(Value::as_str) {
                    if !thinking.is_empty() {
                        thinking_parts.push(thinking.to_string());
                    }
                }
            }
            "tool_use" => {
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": block.get("id").and_then(Value::as_str).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": block.get("name").and_then(Value::as_str).unwrap_or(""),
                        "arguments": input.to_string(),
                    },
                }));
            }
            "tool_result" => {
                tool_results.push(json!({
                    "tool_call_id": block.get("tool_use_id").and_then(Value::as_str).unwrap_or(""),
                    "content": block.get("content").cloned().unwrap_or(json!("")),
                    "is_error": block.get("is_error").cloned().unwrap_or(json!(false)),
                }));
            }
            _ => {}
        }
    }

    if role == "assistant" {
        let mut message = Map::new();
        message.insert("role".to_string(), json!("assistant"));
        if !thinking_parts.is_empty() {
            message.insert("thinking".to_string(), json!(thinking_parts.join("\n\n")));
        }
        if !text_parts.is_empty() {
            message.insert("content".to_string(), json!(text_parts.join("\n\n")));
        } else if tool_calls.is_empty() {
            message.insert("content".to_string(), Value::Null);
        }
        if !tool_calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
        Value::Object(message)
    } else if role == "user" && !tool_results.is_empty() {
        json!({"role": "tool", "tool_results": tool_results})
    } else {
        json!({"role": role, "content": text_parts.join("\n\n")})
    }
}

/// Extract a complete trajectory from a span.
pub fn extract_trajectory(span: &Span) -> SpanTrajectory {
    let attributes = &span.attributes;

    let mut raw_messages = indexed_messages(attributes, "prompt");
    raw_messages.extend(indexed_messages(attributes, "completion"));

    let mut messages: Vec<Value> = Vec::new();
    for (role, content) in &raw_messages {
        let converted = convert_to_flat_message(content, role);
        if converted.get("role") == Some(&json!("tool")) {
            if let Some(results) = converted.get("tool_results").and_then(Value::as_array) {
                for result in results {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": result.get("tool_call_id").cloned().unwrap_or(json!("")),
                        "content": result.get("content").cloned().unwrap_or(json!("")),
                    }));
                }
                continue;
            }
        }
        messages.push(converted);
    }

    SpanTrajectory {
        trace_id: span.context.trace_id.clone(),
        span_id: span.context.span_id.clone(),
        model: attributes
            .get("gen_ai.request.model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        timestamp: span.start_time.clone(),
        messages,
        usage: json!({
            "prompt_tokens": attributes.get("gen_ai.usage.prompt_tokens").cloned(),
            "completion_tokens": attributes.get("gen_ai.usage.completion_tokens").cloned(),
            "total_tokens": attributes.get("llm.usage.total_tokens").cloned(),
        }),
    }
}

/// Strip `<system-reminder>` regions and drop messages left with neither
/// content nor tool calls.
pub fn clean_messages(messages: &[Value]) -> Vec<Value> {
    let mut cleaned: Vec<Value> = Vec::new();

    for message in messages {
        let has_tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .is_some_and(|calls| !calls.is_empty());
        let content = message.get("content");
        let has_content = matches!(content, Some(value) if !value.is_null())
            && content.and_then(Value::as_str) != Some("");

        if !has_content && !has_tool_calls {
            continue;
        }

        if let Some(text) = content.and_then(Value::as_str) {
            let stripped = SYSTEM_REMINDER.replace_all(text, "").trim().to_string();
            if stripped.is_empty() {
                if !has_tool_calls {
                    continue;
                }
                let mut message = message.clone();
                message["content"] = Value::Null;
                cleaned.push(message);
                continue;
            }
            let mut message = message.clone();
            message["content"] = json!(stripped);
            cleaned.push(message);
            continue;
        }

        cleaned.push(message.clone());
    }

    cleaned
}
