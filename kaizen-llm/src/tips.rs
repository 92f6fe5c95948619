//! Tip generation from parsed trajectories

use crate::clean::clean_llm_response;
use crate::gateway::{CompletionModel, CompletionRequest};
use crate::prompts::generate_tips_prompt;
use crate::trajectory::parse_trajectory;
use kaizen_core::{KaizenResult, TipGenerationResponse, TipGenerationResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// JSON schema for [`TipGenerationResponse`], passed to providers that
/// support constrained decoding.
pub fn tip_generation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tips": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "rationale": {"type": "string"},
                        "category": {
                            "type": "string",
                            "enum": ["strategy", "recovery", "optimization"],
                        },
                        "trigger": {"type": "string"},
                    },
                    "required": ["content", "rationale", "category", "trigger"],
                    "additionalProperties": false,
                },
            },
        },
        "required": ["tips"],
        "additionalProperties": false,
    })
}

/// Generates categorized tips from an agent trajectory.
pub struct TipGenerator {
    model: Arc<dyn CompletionModel>,
    model_id: String,
}

impl TipGenerator {
    pub fn new(model: Arc<dyn CompletionModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    /// Generate tips for one trajectory.
    ///
    /// Empty or malformed model output never fails ingestion: it is logged
    /// and produces an empty tip list alongside the parsed task description.
    /// Trajectory parse errors and transport errors propagate.
    pub async fn generate(&self, messages: &[Value]) -> KaizenResult<TipGenerationResult> {
        let trajectory = parse_trajectory(messages)?;
        let task_description = trajectory.task_instruction.clone();

        let constrained = self.model.supports_response_schema(&self.model_id);
        let prompt = generate_tips_prompt(
            &trajectory.task_instruction,
            trajectory.num_steps,
            &trajectory.trajectory_summary,
            constrained,
        );

        let response = self
            .model
            .complete(CompletionRequest {
                model: self.model_id.clone(),
                prompt,
                response_schema: constrained.then(tip_generation_schema),
            })
            .await?;

        let cleaned = if constrained {
            response
        } else {
            clean_llm_response(&response)
        };

        if cleaned.is_empty() {
            warn!(model = %self.model_id, "LLM returned empty response for tip generation");
            return Ok(TipGenerationResult {
                tips: Vec::new(),
                task_description,
            });
        }

        match serde_json::from_str::<TipGenerationResponse>(&cleaned) {
            Ok(parsed) => Ok(TipGenerationResult {
                tips: parsed.tips,
                task_description,
            }),
            Err(error) => {
                let preview: String = cleaned.chars().take(500).collect();
                warn!(%error, response = %preview, "Failed to parse LLM tip generation response");
                Ok(TipGenerationResult {
                    tips: Vec::new(),
                    task_description,
                })
            }
        }
    }
}

impl std::fmt::Debug for TipGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TipGenerator")
            .field("model_id", &self.model_id)
            .finish()
    }
}
