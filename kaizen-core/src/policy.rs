//! Policy classification entities
//!
//! Policies are stored and validated, nothing more: matching and enforcement
//! live outside the store.

use serde::{Deserialize, Deserializer, Serialize};

/// Kind of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Playbook,
    IntentGuard,
    ToolGuide,
    ToolApproval,
    OutputFormatter,
}

/// Kind of policy trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Keyword,
    NaturalLanguage,
    Always,
}

fn default_target() -> String {
    "intent".to_string()
}

fn default_operator() -> String {
    "or".to_string()
}

fn default_threshold() -> f64 {
    0.7
}

/// Coerce a bare string from the LLM into a single-element list.
fn deserialize_trigger_value<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        None => None,
        Some(StringOrList::One(value)) => Some(vec![value]),
        Some(StringOrList::Many(values)) => Some(values),
    })
}

/// A single condition under which a policy applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTrigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, deserialize_with = "deserialize_trigger_value")]
    pub value: Option<Vec<String>>,
    #[serde(default = "default_target")]
    pub target: String,
    /// "and" / "or" for keyword triggers.
    #[serde(default = "default_operator")]
    pub operator: String,
    /// Similarity threshold for natural_language triggers.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_priority() -> i32 {
    50
}

fn default_enabled() -> bool {
    true
}

/// A classification entity persisted with `type = "policy"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    pub description: String,
    pub triggers: Vec<PolicyTrigger>,
    /// The policy payload (playbook markdown, response text, etc.).
    pub content: String,
    /// Type-specific config.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
