//! LLM-mediated conflict resolution
//!
//! Turns a batch of proposed entities into ADD/UPDATE/DELETE/NONE events
//! relative to existing similar entities. The model sees simplified entities
//! only; metadata never leaves the caller and is re-attached to ADD events
//! after parsing.

use crate::clean::clean_llm_response;
use crate::gateway::{CompletionModel, CompletionRequest};
use crate::prompts::conflict_resolution_prompt;
use kaizen_core::{
    EntityUpdate, KaizenError, KaizenResult, RecordedEntity, SimpleEntity, UpdateEvent,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

const MAX_ATTEMPTS: usize = 3;

/// Resolves conflicts between new and existing entities through an LLM.
pub struct ConflictResolver {
    model: Arc<dyn CompletionModel>,
    model_id: String,
    custom_prompt: Option<String>,
}

impl ConflictResolver {
    pub fn new(model: Arc<dyn CompletionModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            custom_prompt: None,
        }
    }

    /// Replace the default instruction block of the prompt.
    pub fn with_custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    /// Produce update events for `new_entities` relative to `old_entities`.
    ///
    /// `new_entities` carry placeholder ids (`Unprocessed_Entity_{i}`);
    /// `old_entities` carry their real persistent ids. Retries up to 3 times
    /// on any parse or validation failure, then re-raises the last error.
    /// An empty new set is a no-op returning `[]` without a model call.
    pub async fn resolve(
        &self,
        old_entities: &[RecordedEntity],
        new_entities: &[RecordedEntity],
    ) -> KaizenResult<Vec<EntityUpdate>> {
        if new_entities.is_empty() {
            return Ok(Vec::new());
        }

        let simplified_old = SimpleEntity::from_recorded_entities(old_entities);
        let simplified_new = SimpleEntity::from_recorded_entities(new_entities);
        let new_by_id: HashMap<&str, &RecordedEntity> = new_entities
            .iter()
            .map(|entity| (entity.id.as_str(), entity))
            .collect();
        let known_ids: HashSet<&str> = old_entities
            .iter()
            .map(|entity| entity.id.as_str())
            .chain(new_by_id.keys().copied())
            .collect();

        let prompt =
            conflict_resolution_prompt(&simplified_old, &simplified_new, self.custom_prompt.as_deref());

        let mut last_error = KaizenError::store("Conflict resolution produced no attempts");
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&prompt, &new_by_id, &known_ids).await {
                Ok(updates) => return Ok(updates),
                Err(error) => {
                    warn!(attempt, %error, "conflict resolution attempt failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        prompt: &str,
        new_by_id: &HashMap<&str, &RecordedEntity>,
        known_ids: &HashSet<&str>,
    ) -> KaizenResult<Vec<EntityUpdate>> {
        let response = self
            .model
            .complete(CompletionRequest {
                model: self.model_id.clone(),
                prompt: prompt.to_string(),
                response_schema: None,
            })
            .await?;

        let cleaned = clean_llm_response(&response);
        let parsed: serde_json::Value = serde_json::from_str(&cleaned)
            .map_err(|e| KaizenError::store(format!("Conflict resolution response was not JSON: {e}")))?;
        let events = parsed
            .get("entities")
            .cloned()
            .ok_or_else(|| KaizenError::store("Conflict resolution response missing `entities`"))?;
        let mut updates: Vec<EntityUpdate> = serde_json::from_value(events)
            .map_err(|e| KaizenError::store(format!("Invalid entity update event: {e}")))?;

        for update in &mut updates {
            match update.event {
                UpdateEvent::Add => {
                    // The LLM never sees metadata and must not invent it;
                    // re-attach the matching new entity's metadata here.
                    let source = new_by_id.get(update.id.as_str()).ok_or_else(|| {
                        KaizenError::store(format!(
                            "ADD event references unknown new entity `{}`",
                            update.id
                        ))
                    })?;
                    update.metadata = Some(source.metadata.clone());
                }
                UpdateEvent::Update | UpdateEvent::Delete => {
                    if !known_ids.contains(update.id.as_str()) {
                        warn!(
                            id = %update.id,
                            event = ?update.event,
                            "event references unknown entity id; treating as NONE"
                        );
                        update.event = UpdateEvent::None;
                    }
                }
                UpdateEvent::None => {}
            }
        }

        Ok(updates)
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("model_id", &self.model_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockCompletionModel;
    use chrono::Utc;
    use kaizen_core::{EntityContent, Metadata};
    use serde_json::json;

    fn recorded(id: &str, content: &str, metadata: Metadata) -> RecordedEntity {
        RecordedEntity {
            id: id.to_string(),
            entity_type: "guideline".to_string(),
            content: EntityContent::Text(content.to_string()),
            created_at: Utc::now(),
            metadata,
        }
    }

    fn metadata(key: &str, value: &str) -> Metadata {
        let mut map = Metadata::new();
        map.insert(key.to_string(), json!(value));
        map
    }

    fn resolver(responses: Vec<KaizenResult<String>>) -> (ConflictResolver, Arc<MockCompletionModel>) {
        let model = Arc::new(MockCompletionModel::new(responses));
        (
            ConflictResolver::new(model.clone(), "openai/gpt-4o"),
            model,
        )
    }

    #[tokio::test]
    async fn empty_new_set_skips_the_model() {
        let (resolver, model) = resolver(vec![]);
        let updates = resolver.resolve(&[], &[]).await.unwrap();
        assert!(updates.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn add_event_reattaches_metadata() {
        let response = json!({
            "entities": [{
                "id": "Unprocessed_Entity_0",
                "type": "guideline",
                "content": "use type hints",
                "event": "ADD",
            }]
        })
        .to_string();
        let (resolver, _) = resolver(vec![Ok(response)]);

        let new = vec![recorded(
            "Unprocessed_Entity_0",
            "use type hints",
            metadata("source", "review"),
        )];
        let updates = resolver.resolve(&[], &new).await.unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].event, UpdateEvent::Add);
        let attached = updates[0].metadata.as_ref().unwrap();
        assert_eq!(attached.get("source"), Some(&json!("review")));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let good = json!({"entities": []}).to_string();
        let (resolver, model) = resolver(vec![
            Ok("not json at all".to_string()),
            Ok("{\"wrong\": true}".to_string()),
            Ok(good),
        ]);

        let new = vec![recorded("Unprocessed_Entity_0", "x", Metadata::new())];
        let updates = resolver.resolve(&[], &new).await.unwrap();
        assert!(updates.is_empty());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_reraise_the_last_error() {
        let (resolver, model) = resolver(vec![
            Ok("garbage".to_string()),
            Ok("garbage".to_string()),
            Ok("garbage".to_string()),
        ]);

        let new = vec![recorded("Unprocessed_Entity_0", "x", Metadata::new())];
        let error = resolver.resolve(&[], &new).await.unwrap_err();
        assert!(matches!(error, KaizenError::Store(_)));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn unknown_update_target_becomes_none() {
        let response = json!({
            "entities": [{
                "id": "999",
                "type": "guideline",
                "content": "merged",
                "event": "UPDATE",
            }]
        })
        .to_string();
        let (resolver, _) = resolver(vec![Ok(response)]);

        let old = vec![recorded("1", "existing", Metadata::new())];
        let new = vec![recorded("Unprocessed_Entity_0", "x", Metadata::new())];
        let updates = resolver.resolve(&old, &new).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].event, UpdateEvent::None);
    }

    #[tokio::test]
    async fn fenced_response_is_cleaned_before_parsing() {
        let fenced = format!("```json\n{}\n```", json!({"entities": []}));
        let (resolver, _) = resolver(vec![Ok(fenced)]);
        let new = vec![recorded("Unprocessed_Entity_0", "x", Metadata::new())];
        assert!(resolver.resolve(&[], &new).await.unwrap().is_empty());
    }
}
