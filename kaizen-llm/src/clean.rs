//! Free-text LLM response cleanup

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9]*\s*(.*?)\s*```$").expect("valid fence regex"));

static THOUGHT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:think(?:ing)?|reflection)>.*?</(?:think(?:ing)?|reflection)>")
        .expect("valid thought regex")
});

/// Removes common junk from an LLM response so that it can be parsed as JSON.
///
/// Actions:
/// - Returns the inner content of a single outer Markdown code block of any
///   tag.
/// - Removes `<thinking>`/`<think>`/`<reflection>` regions entirely.
pub fn clean_llm_response(content: &str) -> String {
    let trimmed = content.trim();
    let unfenced = match CODE_FENCE.captures(trimmed) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or("").trim(),
        None => trimmed,
    };
    THOUGHT_BLOCKS.replace_all(unfenced, "").trim().to_string()
}
