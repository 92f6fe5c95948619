//! Trajectory parsing
//!
//! Canonicalizes loosely specified agent conversations into a step sequence.
//! Two provider dialects are accepted: typed content blocks (`text`,
//! `thinking`, `tool_use`, `tool_result`, `function_call`) and flat string
//! content with message-level `tool_calls`. Assistant messages with unknown
//! content shapes are skipped silently; empty content is common from
//! tool-calling patterns.

use kaizen_core::{KaizenError, KaizenResult, DEFAULT_TASK_DESCRIPTION};
use serde_json::Value;

const MAX_SUMMARY_STEPS: usize = 50;
const MAX_STEP_CHARS: usize = 2000;

/// Kind of canonical trajectory step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Reasoning,
    Action,
    Observation,
}

impl StepKind {
    fn label(&self) -> &'static str {
        match self {
            StepKind::Reasoning => "Reasoning",
            StepKind::Action => "Action",
            StepKind::Observation => "Observation",
        }
    }
}

/// One canonical step of an agent trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryStep {
    pub kind: StepKind,
    pub content: String,
}

/// A canonicalized trajectory ready for tip generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrajectory {
    /// The first user message's text, or the fallback sentinel.
    pub task_instruction: String,
    pub steps: Vec<TrajectoryStep>,
    /// Count of reasoning and action steps (observations excluded).
    pub num_steps: usize,
    /// Markdown rendering of up to 50 steps.
    pub trajectory_summary: String,
}

/// Serialize a function call as `name(k=v, ...)`. Falls back to the raw
/// argument string when it is not a JSON object.
fn describe_function_call(name: &str, arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(args)) => {
            let rendered = args
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name}({rendered})")
        }
        _ => format!("{name}({arguments})"),
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_assistant_blocks(blocks: &[Value], steps: &mut Vec<TrajectoryStep>) {
    for block in blocks {
        let Some(block_type) = block.get("type").and_then(Value::as_str) else {
            continue;
        };
        match block_type {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        steps.push(TrajectoryStep {
                            kind: StepKind::Reasoning,
                            content: text.to_string(),
                        });
                    }
                }
            }
            "tool_use" => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                steps.push(TrajectoryStep {
                    kind: StepKind::Action,
                    content: describe_function_call(name, &input.to_string()),
                });
            }
            "function_call" => {
                let name = block
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let arguments = block
                    .pointer("/function/arguments")
                    .map(value_as_text)
                    .unwrap_or_default();
                steps.push(TrajectoryStep {
                    kind: StepKind::Action,
                    content: describe_function_call(name, &arguments),
                });
            }
            "tool_result" => {
                if let Some(content) = block.get("content") {
                    steps.push(TrajectoryStep {
                        kind: StepKind::Observation,
                        content: value_as_text(content),
                    });
                }
            }
            // thinking and anything unrecognized stays out of the summary
            _ => {}
        }
    }
}

fn parse_tool_calls(message: &Value, steps: &mut Vec<TrajectoryStep>) {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return;
    };
    for call in calls {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .unwrap_or("");
        let arguments = call
            .pointer("/function/arguments")
            .map(value_as_text)
            .unwrap_or_default();
        steps.push(TrajectoryStep {
            kind: StepKind::Action,
            content: describe_function_call(name, &arguments),
        });
    }
}

fn truncate_step(content: &str) -> String {
    if content.chars().count() > MAX_STEP_CHARS {
        let truncated: String = content.chars().take(MAX_STEP_CHARS).collect();
        format!("{truncated}...")
    } else {
        content.to_string()
    }
}

fn render_summary(steps: &[TrajectoryStep]) -> String {
    steps
        .iter()
        .take(MAX_SUMMARY_STEPS)
        .enumerate()
        .map(|(i, step)| {
            format!(
                "**Step {} - {}:**\n{}",
                i + 1,
                step.kind.label(),
                truncate_step(&step.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Canonicalize a message list into a step sequence.
///
/// Fails only when the first user message carries non-string content; a
/// trajectory with no user message at all falls back to the
/// "Task description unknown" sentinel.
pub fn parse_trajectory(messages: &[Value]) -> KaizenResult<ParsedTrajectory> {
    let mut task_instruction: Option<String> = None;
    let mut steps: Vec<TrajectoryStep> = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");

        if role == "user" && task_instruction.is_none() {
            match message.get("content") {
                Some(Value::String(text)) => task_instruction = Some(text.clone()),
                Some(_) => {
                    return Err(KaizenError::store(
                        "First user message was not a task instruction.",
                    ))
                }
                None => {}
            }
        }

        match role {
            "assistant" => {
                match message.get("content") {
                    Some(Value::String(text)) if !text.trim().is_empty() => {
                        steps.push(TrajectoryStep {
                            kind: StepKind::Reasoning,
                            content: text.clone(),
                        });
                    }
                    Some(Value::Array(blocks)) => parse_assistant_blocks(blocks, &mut steps),
                    // Null or missing content: usual for pure tool-call turns
                    _ => {}
                }
                parse_tool_calls(message, &mut steps);
            }
            "tool" => {
                if let Some(content) = message.get("content") {
                    steps.push(TrajectoryStep {
                        kind: StepKind::Observation,
                        content: value_as_text(content),
                    });
                }
            }
            _ => {}
        }
    }

    let num_steps = steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::Reasoning | StepKind::Action))
        .count();
    let trajectory_summary = render_summary(&steps);

    Ok(ParsedTrajectory {
        task_instruction: task_instruction
            .unwrap_or_else(|| DEFAULT_TASK_DESCRIPTION.to_string()),
        steps,
        num_steps,
        trajectory_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_task_and_reasoning_from_flat_dialect() {
        let messages = vec![
            json!({"role": "user", "content": "Fix the failing test"}),
            json!({"role": "assistant", "content": "I will start by reading the test output."}),
        ];
        let parsed = parse_trajectory(&messages).unwrap();
        assert_eq!(parsed.task_instruction, "Fix the failing test");
        assert_eq!(parsed.num_steps, 1);
        assert_eq!(parsed.steps[0].kind, StepKind::Reasoning);
    }

    #[test]
    fn non_string_first_user_message_is_an_error() {
        let messages = vec![json!({"role": "user", "content": [{"type": "text", "text": "hi"}]})];
        let error = parse_trajectory(&messages).unwrap_err();
        assert!(error.to_string().contains("task instruction"));
    }

    #[test]
    fn missing_user_message_falls_back_to_sentinel() {
        let messages = vec![json!({"role": "assistant", "content": "thinking out loud"})];
        let parsed = parse_trajectory(&messages).unwrap();
        assert_eq!(parsed.task_instruction, DEFAULT_TASK_DESCRIPTION);
    }

    #[test]
    fn tool_calls_become_actions_with_rendered_arguments() {
        let messages = vec![
            json!({"role": "user", "content": "t"}),
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "read_file", "arguments": "{\"path\": \"src/lib.rs\"}"},
                }],
            }),
            json!({"role": "tool", "tool_call_id": "call_1", "content": "file contents"}),
        ];
        let parsed = parse_trajectory(&messages).unwrap();
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[0].kind, StepKind::Action);
        assert_eq!(parsed.steps[0].content, "read_file(path=\"src/lib.rs\")");
        assert_eq!(parsed.steps[1].kind, StepKind::Observation);
        // observations do not count toward num_steps
        assert_eq!(parsed.num_steps, 1);
    }

    #[test]
    fn block_dialect_produces_reasoning_and_actions() {
        let messages = vec![
            json!({"role": "user", "content": "t"}),
            json!({
                "role": "assistant",
                "content": [
                    {"type": "thinking", "thinking": "private"},
                    {"type": "text", "text": "Running the build now."},
                    {"type": "tool_use", "id": "tu_1", "name": "bash", "input": {"cmd": "cargo build"}},
                ],
            }),
        ];
        let parsed = parse_trajectory(&messages).unwrap();
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[0].content, "Running the build now.");
        assert_eq!(parsed.steps[1].content, "bash(cmd=\"cargo build\")");
        assert!(!parsed.trajectory_summary.contains("private"));
    }

    #[test]
    fn unparseable_arguments_fall_back_to_raw_string() {
        assert_eq!(
            describe_function_call("run", "not json"),
            "run(not json)"
        );
    }

    #[test]
    fn unknown_assistant_shapes_are_skipped() {
        let messages = vec![
            json!({"role": "user", "content": "t"}),
            json!({"role": "assistant", "content": 42}),
            json!({"role": "assistant"}),
            json!({"role": "assistant", "content": ""}),
        ];
        let parsed = parse_trajectory(&messages).unwrap();
        assert!(parsed.steps.is_empty());
        assert_eq!(parsed.num_steps, 0);
    }

    #[test]
    fn summary_truncates_long_steps_and_caps_count() {
        let long = "x".repeat(3000);
        let mut messages = vec![json!({"role": "user", "content": "t"})];
        for _ in 0..60 {
            messages.push(json!({"role": "assistant", "content": long.clone()}));
        }
        let parsed = parse_trajectory(&messages).unwrap();
        assert_eq!(parsed.num_steps, 60);
        assert!(parsed.trajectory_summary.contains("**Step 50 - Reasoning:**"));
        assert!(!parsed.trajectory_summary.contains("**Step 51"));
        let first_block = parsed.trajectory_summary.split("\n\n").next().unwrap();
        assert!(first_block.len() < 2100);
        assert!(first_block.ends_with("..."));
    }
}
