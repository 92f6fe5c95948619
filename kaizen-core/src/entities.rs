//! Core entity structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arbitrary key/value metadata attached to an entity. Opaque to the store,
/// queryable by equality on top-level keys.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Details of a namespace containing memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// The unique ID of a namespace.
    pub id: String,
    /// The time the namespace was created.
    pub created_at: DateTime<Utc>,
    /// The number of entities in the namespace. May not be accurate.
    #[serde(default)]
    pub num_entities: Option<i64>,
}

/// Entity content: a plain string, or any structured JSON value.
///
/// Non-string content is JSON-serialized when a backend needs a flat string
/// (search, vector storage) and parsed back on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityContent {
    Text(String),
    Structured(serde_json::Value),
}

impl EntityContent {
    /// Flat string form used for substring search and vector-store columns.
    pub fn as_search_text(&self) -> String {
        match self {
            EntityContent::Text(text) => text.clone(),
            EntityContent::Structured(value) => value.to_string(),
        }
    }

    /// Recover content from its stored string form. Strings that parse as
    /// JSON come back structured; everything else stays text.
    pub fn from_serialized(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::String(text)) => EntityContent::Text(text),
            Ok(value) => EntityContent::Structured(value),
            Err(_) => EntityContent::Text(raw.to_string()),
        }
    }
}

impl From<&str> for EntityContent {
    fn from(text: &str) -> Self {
        EntityContent::Text(text.to_string())
    }
}

impl From<String> for EntityContent {
    fn from(text: String) -> Self {
        EntityContent::Text(text)
    }
}

impl From<serde_json::Value> for EntityContent {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => EntityContent::Text(text),
            other => EntityContent::Structured(other),
        }
    }
}

/// Basic data stored in the DB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The type of the entity (free-form tag, e.g. `guideline`, `trajectory`).
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Some relatively short searchable content.
    pub content: EntityContent,
    /// Arbitrary metadata related to the entity. `None` and `{}` are
    /// equivalent.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, content: impl Into<EntityContent>) -> Self {
        Self {
            entity_type: entity_type.into(),
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An entity that has been written to a namespace: it carries the id the
/// store assigned and the time of its most recent mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEntity {
    /// The unique ID of the entity within its namespace.
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub content: EntityContent,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RecordedEntity {
    /// Read a string value from metadata by key.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
