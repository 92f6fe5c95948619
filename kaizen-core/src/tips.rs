//! Tip and consolidation record types

use serde::{Deserialize, Serialize};

/// Fallback task description when a trajectory has no user message.
pub const DEFAULT_TASK_DESCRIPTION: &str = "Task description unknown";

/// Category of a generated tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipCategory {
    Strategy,
    Recovery,
    Optimization,
}

impl TipCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipCategory::Strategy => "strategy",
            TipCategory::Recovery => "recovery",
            TipCategory::Optimization => "optimization",
        }
    }
}

/// A structured recommendation distilled from a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    /// Clear, actionable tip.
    pub content: String,
    /// Why this tip helps.
    pub rationale: String,
    pub category: TipCategory,
    /// When to apply this tip.
    pub trigger: String,
}

/// Wire shape of the LLM response for tip generation and consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipGenerationResponse {
    pub tips: Vec<Tip>,
}

/// Outcome of generating tips from one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TipGenerationResult {
    pub tips: Vec<Tip>,
    /// Original task text, kept so persisted tips can be clustered later.
    pub task_description: String,
}

/// Aggregate outcome of a consolidation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub clusters_found: usize,
    pub tips_before: usize,
    pub tips_after: usize,
}
