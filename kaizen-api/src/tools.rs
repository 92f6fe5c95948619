//! Tool-protocol handlers
//!
//! The handler set an external RPC host exposes to agents. Every handler
//! returns a JSON envelope - `{"success": true, ...}` or
//! `{"success": false, "error": {"kind", "message"}}` - and never unwinds
//! across the protocol boundary.

use kaizen_client::KaizenClient;
use kaizen_core::{Entity, KaizenError, Metadata};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn ok(result: Value) -> Value {
    json!({"success": true, "result": result})
}

fn err(kind: &str, message: impl std::fmt::Display) -> Value {
    json!({
        "success": false,
        "error": {"kind": kind, "message": message.to_string()},
    })
}

fn error_envelope(error: KaizenError) -> Value {
    let kind = match &error {
        KaizenError::NamespaceNotFound(_) => "namespace_not_found",
        KaizenError::NamespaceAlreadyExists(_) => "namespace_already_exists",
        KaizenError::Store(_) => "store_error",
    };
    err(kind, error)
}

/// Tool handlers bound to one client and its default namespace.
pub struct ToolHandlers {
    client: Arc<KaizenClient>,
}

impl ToolHandlers {
    pub fn new(client: Arc<KaizenClient>) -> Self {
        Self { client }
    }

    fn namespace_id(&self) -> String {
        self.client.settings().namespace_id.clone()
    }

    async fn ensure_namespace(&self) -> Result<(), KaizenError> {
        let namespace_id = self.namespace_id();
        match self.client.get_namespace_details(&namespace_id).await {
            Ok(_) => Ok(()),
            Err(KaizenError::NamespaceNotFound(_)) => {
                self.client.create_namespace(Some(&namespace_id)).await?;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Get relevant guidelines for a given task as a markdown list.
    pub async fn get_guidelines(&self, task: &str) -> Value {
        info!(task, "Getting guidelines");
        if let Err(error) = self.ensure_namespace().await {
            return error_envelope(error);
        }

        let mut filters = Metadata::new();
        filters.insert("type".to_string(), json!("guideline"));
        let results = match self
            .client
            .search_entities(&self.namespace_id(), Some(task), Some(&filters), 10)
            .await
        {
            Ok(results) => results,
            Err(error) => return error_envelope(error),
        };

        let mut lines = vec![format!("# Guidelines for: {task}\n")];
        for (i, guideline) in results.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, guideline.content.as_search_text()));
        }
        ok(json!(lines.join("\n")))
    }

    /// Save a full agent trajectory and generate tips from it. Returns the
    /// stored trajectory entities.
    pub async fn save_trajectory(&self, trajectory_data: &str, task_id: Option<&str>) -> Value {
        if let Err(error) = self.ensure_namespace().await {
            return error_envelope(error);
        }
        let namespace_id = self.namespace_id();
        let task_id = task_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let messages: Vec<Value> = match serde_json::from_str(trajectory_data) {
            Ok(Value::Array(messages)) => messages,
            Ok(_) => return err("invalid_input", "trajectory_data must be a JSON array"),
            Err(e) => return err("invalid_input", format!("trajectory_data is not JSON: {e}")),
        };

        let entities: Vec<Entity> = messages
            .iter()
            .map(|message| {
                let content = match message.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let mut metadata = Metadata::new();
                metadata.insert("task_id".to_string(), json!(task_id));
                // keep the original message for reference
                metadata.insert("message".to_string(), message.clone());
                Entity::new("trajectory", content).with_metadata(metadata)
            })
            .collect();

        if let Err(error) = self
            .client
            .update_entities(&namespace_id, &entities, false)
            .await
        {
            return error_envelope(error);
        }

        let generated = match self.client.tip_generator().generate(&messages).await {
            Ok(generated) => generated,
            Err(error) => return error_envelope(error),
        };

        if !generated.tips.is_empty() {
            let tip_entities: Vec<Entity> = generated
                .tips
                .iter()
                .map(|tip| {
                    let mut metadata = Metadata::new();
                    metadata.insert("category".to_string(), json!(tip.category.as_str()));
                    metadata.insert("rationale".to_string(), json!(tip.rationale));
                    metadata.insert("trigger".to_string(), json!(tip.trigger));
                    metadata.insert(
                        "task_description".to_string(),
                        json!(generated.task_description),
                    );
                    Entity::new("guideline", tip.content.clone()).with_metadata(metadata)
                })
                .collect();
            if let Err(error) = self
                .client
                .update_entities(&namespace_id, &tip_entities, true)
                .await
            {
                return error_envelope(error);
            }
        }

        let mut filters = Metadata::new();
        filters.insert("type".to_string(), json!("trajectory"));
        filters.insert("task_id".to_string(), json!(task_id));
        match self
            .client
            .search_entities(&namespace_id, None, Some(&filters), 1000)
            .await
        {
            Ok(stored) => ok(serde_json::to_value(stored).unwrap_or(Value::Null)),
            Err(error) => error_envelope(error),
        }
    }

    /// Create a single entity, optionally with conflict resolution. Returns
    /// the resulting update event.
    pub async fn create_entity(
        &self,
        content: &str,
        entity_type: &str,
        metadata: Option<&str>,
        enable_conflict_resolution: bool,
    ) -> Value {
        if let Err(error) = self.ensure_namespace().await {
            return error_envelope(error);
        }

        let metadata = match metadata {
            None => None,
            Some(raw) => match serde_json::from_str::<Metadata>(raw) {
                Ok(map) => Some(map),
                Err(e) => return err("invalid_input", format!("metadata is not a JSON object: {e}")),
            },
        };

        let mut entity = Entity::new(entity_type, content);
        entity.metadata = metadata;

        match self
            .client
            .update_entities(&self.namespace_id(), &[entity], enable_conflict_resolution)
            .await
        {
            Ok(updates) => match updates.first() {
                Some(update) => ok(serde_json::to_value(update).unwrap_or(Value::Null)),
                None => err("store_error", "No update events returned"),
            },
            Err(error) => error_envelope(error),
        }
    }

    /// Delete an entity from the default namespace by id.
    pub async fn delete_entity(&self, entity_id: &str) -> Value {
        if let Err(error) = self.ensure_namespace().await {
            return error_envelope(error);
        }
        match self
            .client
            .delete_entity_by_id(&self.namespace_id(), entity_id)
            .await
        {
            Ok(()) => json!({
                "success": true,
                "message": format!("Entity `{entity_id}` deleted"),
            }),
            Err(error) => error_envelope(error),
        }
    }
}

impl std::fmt::Debug for ToolHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandlers").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaizen_backend::FilesystemBackend;
    use kaizen_core::{FilesystemSettings, KaizenResult, KaizenSettings, LlmSettings};
    use kaizen_llm::{ConflictResolver, MockCompletionModel, MockEmbeddingProvider};
    use tempfile::TempDir;

    fn handlers_with(responses: Vec<KaizenResult<String>>) -> (ToolHandlers, TempDir) {
        let dir = TempDir::new().unwrap();
        let completion = Arc::new(MockCompletionModel::new(responses));
        let resolver = Arc::new(ConflictResolver::new(completion.clone(), "openai/gpt-4o"));
        let backend = Arc::new(
            FilesystemBackend::new(
                &FilesystemSettings {
                    data_dir: dir.path().to_path_buf(),
                },
                resolver,
            )
            .unwrap(),
        );
        let client = Arc::new(KaizenClient::with_parts(
            KaizenSettings::default(),
            LlmSettings::default(),
            backend,
            Arc::new(MockEmbeddingProvider::new("mock-embed", 16)),
            completion,
        ));
        (ToolHandlers::new(client), dir)
    }

    #[tokio::test]
    async fn create_entity_returns_the_update_event() {
        let (handlers, _dir) = handlers_with(vec![]);
        let response = handlers
            .create_entity("hello world", "note", None, false)
            .await;
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["result"]["event"], json!("ADD"));
        assert_eq!(response["result"]["type"], json!("note"));
        assert_eq!(response["result"]["id"], json!("1"));
    }

    #[tokio::test]
    async fn create_entity_rejects_malformed_metadata() {
        let (handlers, _dir) = handlers_with(vec![]);
        let response = handlers
            .create_entity("x", "note", Some("not json"), false)
            .await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"]["kind"], json!("invalid_input"));
    }

    #[tokio::test]
    async fn get_guidelines_formats_matches_as_markdown() {
        let (handlers, _dir) = handlers_with(vec![]);
        handlers
            .create_entity(
                "Use retries for flaky calls",
                "guideline",
                Some(r#"{"task_description": "handle flaky apis"}"#),
                false,
            )
            .await;

        let response = handlers.get_guidelines("flaky").await;
        assert_eq!(response["success"], json!(true));
        let markdown = response["result"].as_str().unwrap();
        assert!(markdown.starts_with("# Guidelines for: flaky\n"));
        assert!(markdown.contains("1. Use retries for flaky calls"));
    }

    #[tokio::test]
    async fn save_trajectory_persists_messages_and_returns_them() {
        let tips = json!({"tips": []}).to_string();
        let (handlers, _dir) = handlers_with(vec![Ok(tips)]);

        let trajectory = json!([
            {"role": "user", "content": "Fix the bug"},
            {"role": "assistant", "content": "Looking at the stack trace."},
        ])
        .to_string();

        let response = handlers.save_trajectory(&trajectory, Some("task-1")).await;
        assert_eq!(response["success"], json!(true));
        let stored = response["result"].as_array().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["metadata"]["task_id"], json!("task-1"));
        assert_eq!(stored[0]["type"], json!("trajectory"));
    }

    #[tokio::test]
    async fn save_trajectory_rejects_non_array_payload() {
        let (handlers, _dir) = handlers_with(vec![]);
        let response = handlers.save_trajectory("{\"role\": \"user\"}", None).await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"]["kind"], json!("invalid_input"));
    }

    #[tokio::test]
    async fn delete_entity_round_trip_and_missing_entity_envelope() {
        let (handlers, _dir) = handlers_with(vec![]);
        let created = handlers.create_entity("to delete", "note", None, false).await;
        let id = created["result"]["id"].as_str().unwrap().to_string();

        let response = handlers.delete_entity(&id).await;
        assert_eq!(response["success"], json!(true));
        assert!(response["message"].as_str().unwrap().contains(&id));

        let response = handlers.delete_entity(&id).await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"]["kind"], json!("store_error"));
    }

    #[tokio::test]
    async fn handlers_auto_create_the_default_namespace() {
        let (handlers, _dir) = handlers_with(vec![]);
        let response = handlers.get_guidelines("anything").await;
        assert_eq!(response["success"], json!(true));
    }
}
