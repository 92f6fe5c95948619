//! Prompt templates for the LLM-mediated pipeline stages.

use kaizen_core::SimpleEntity;

const JSON_ONLY_FOOTER: &str = "Respond with a single JSON object and nothing else. \
Do not wrap the JSON in markdown fences and do not add commentary.";

const DEFAULT_CONFLICT_RESOLUTION_RULES: &str = r#"You are a smart memory manager for an agent knowledge base.
Compare each new entity against the existing entities and decide what should happen:
- ADD: the new entity carries information that no existing entity covers. Keep the new entity's id.
- UPDATE: an existing entity covers the same subject but the new entity improves or extends it. Use the existing entity's id and produce the merged content.
- DELETE: an existing entity is contradicted or made obsolete by a new entity. Use the existing entity's id.
- NONE: the new entity adds nothing over the existing entities, or an existing entity needs no change.

Rules:
- Never invent ids. ADD events reference a new entity id; UPDATE and DELETE events reference an existing entity id.
- Never emit metadata. Only id, type, content, event, and optionally old_entity for UPDATE events.
- Prefer fewer, higher-quality entities over near-duplicates."#;

/// Render the conflict resolution prompt around old/new entity JSON.
pub(crate) fn conflict_resolution_prompt(
    old_entities: &[SimpleEntity],
    new_entities: &[SimpleEntity],
    custom_rules: Option<&str>,
) -> String {
    let rules = custom_rules.unwrap_or(DEFAULT_CONFLICT_RESOLUTION_RULES);
    let old_json = if old_entities.is_empty() {
        "There are no existing entities.".to_string()
    } else {
        serde_json::to_string_pretty(old_entities).unwrap_or_else(|_| "[]".to_string())
    };
    let new_json = serde_json::to_string_pretty(new_entities).unwrap_or_else(|_| "[]".to_string());

    format!(
        "{rules}\n\n\
        # Existing entities\n{old_json}\n\n\
        # New entities\n{new_json}\n\n\
        Return a JSON object of the form {{\"entities\": [{{\"id\": ..., \"type\": ..., \
        \"content\": ..., \"event\": \"ADD\"|\"UPDATE\"|\"DELETE\"|\"NONE\"}}]}}.\n\
        {JSON_ONLY_FOOTER}"
    )
}

/// Render the tip generation prompt from a parsed trajectory.
pub(crate) fn generate_tips_prompt(
    task_instruction: &str,
    num_steps: usize,
    trajectory_summary: &str,
    constrained_decoding_supported: bool,
) -> String {
    let mut prompt = format!(
        "You are reviewing a completed agent task to extract reusable lessons.\n\n\
        # Task\n{task_instruction}\n\n\
        # Trajectory ({num_steps} steps)\n{trajectory_summary}\n\n\
        Extract up to 5 tips that would help an agent perform a similar task better next time. \
        Each tip needs:\n\
        - content: a clear, actionable tip\n\
        - rationale: why this tip helps\n\
        - category: one of \"strategy\", \"recovery\", \"optimization\"\n\
        - trigger: when to apply this tip\n\n\
        Only include tips backed by what actually happened in the trajectory. \
        If the trajectory teaches nothing reusable, return an empty tips list.\n\
        Return a JSON object of the form {{\"tips\": [...]}}."
    );
    if !constrained_decoding_supported {
        prompt.push('\n');
        prompt.push_str(JSON_ONLY_FOOTER);
    }
    prompt
}

/// Render the consolidation prompt for one cluster of related tips.
pub(crate) fn combine_tips_prompt(
    task_descriptions: &[String],
    tips_json: &str,
    constrained_decoding_supported: bool,
) -> String {
    let tasks = task_descriptions
        .iter()
        .map(|task| format!("- {task}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "The following tips were all learned from closely related tasks:\n{tasks}\n\n\
        # Tips\n{tips_json}\n\n\
        Merge these into the smallest set of non-redundant guidelines that preserves every \
        distinct lesson. Combine overlapping tips, drop exact duplicates, and keep wording \
        concrete. Each merged tip needs content, rationale, category (\"strategy\", \
        \"recovery\", or \"optimization\"), and trigger.\n\
        Return a JSON object of the form {{\"tips\": [...]}}."
    );
    if !constrained_decoding_supported {
        prompt.push('\n');
        prompt.push_str(JSON_ONLY_FOOTER);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaizen_core::EntityContent;

    fn simple(id: &str, content: &str) -> SimpleEntity {
        SimpleEntity {
            id: id.to_string(),
            entity_type: "guideline".to_string(),
            content: EntityContent::Text(content.to_string()),
        }
    }

    #[test]
    fn empty_old_set_is_signalled_explicitly() {
        let prompt = conflict_resolution_prompt(&[], &[simple("Unprocessed_Entity_0", "x")], None);
        assert!(prompt.contains("There are no existing entities."));
        assert!(prompt.contains("Unprocessed_Entity_0"));
    }

    #[test]
    fn custom_rules_replace_the_default_block() {
        let prompt =
            conflict_resolution_prompt(&[simple("1", "a")], &[simple("u", "b")], Some("MY RULES"));
        assert!(prompt.starts_with("MY RULES"));
        assert!(!prompt.contains("smart memory manager"));
    }

    #[test]
    fn free_text_mode_appends_json_only_footer() {
        let constrained = generate_tips_prompt("task", 3, "summary", true);
        let free = generate_tips_prompt("task", 3, "summary", false);
        assert!(!constrained.contains("nothing else"));
        assert!(free.contains("nothing else"));
    }
}
