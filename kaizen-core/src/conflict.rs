//! Conflict resolution record types

use crate::{EntityContent, Metadata, RecordedEntity};
use serde::{Deserialize, Serialize};

/// Derived from an `Entity` or `RecordedEntity`. Optimized for LLM-based
/// conflict resolution: the model sees only id, type, and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleEntity {
    /// The unique ID of an entity.
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub content: EntityContent,
}

impl SimpleEntity {
    pub fn from_recorded_entities(entities: &[RecordedEntity]) -> Vec<SimpleEntity> {
        entities
            .iter()
            .map(|entity| SimpleEntity {
                id: entity.id.clone(),
                entity_type: entity.entity_type.clone(),
                content: entity.content.clone(),
            })
            .collect()
    }
}

/// The type of update operation an `EntityUpdate` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateEvent {
    #[serde(rename = "ADD")]
    Add,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "NONE")]
    None,
}

/// Produced by the LLM (or synthesized for plain inserts), then processed by
/// an entity backend and returned to the caller as the authoritative record
/// of what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// The unique ID of an entity. For `ADD` events the backend replaces the
    /// placeholder with the freshly assigned id.
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub content: EntityContent,
    /// The type of update operation to perform.
    pub event: UpdateEvent,
    /// The entity before it was updated.
    #[serde(default)]
    pub old_entity: Option<String>,
    /// Arbitrary metadata related to the entity. Never produced by the LLM;
    /// re-attached by the caller for `ADD` events.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_event_uses_uppercase_wire_form() {
        assert_eq!(serde_json::to_value(UpdateEvent::Add).unwrap(), json!("ADD"));
        assert_eq!(serde_json::to_value(UpdateEvent::None).unwrap(), json!("NONE"));
        let event: UpdateEvent = serde_json::from_value(json!("DELETE")).unwrap();
        assert_eq!(event, UpdateEvent::Delete);
    }

    #[test]
    fn entity_update_parses_llm_shape() {
        let raw = json!({
            "id": "Unprocessed_Entity_0",
            "type": "guideline",
            "content": "use type hints",
            "event": "ADD",
        });
        let update: EntityUpdate = serde_json::from_value(raw).unwrap();
        assert_eq!(update.event, UpdateEvent::Add);
        assert!(update.metadata.is_none());
        assert!(update.old_entity.is_none());
    }
}
