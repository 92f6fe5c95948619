//! Kaizen Backend - Entity Store Implementations
//!
//! Defines the backend contract consumed by the facade client, plus the two
//! shipped implementations: a JSON-file-per-namespace filesystem store and a
//! Milvus-backed semantic vector store.

mod filesystem;
mod milvus_store;
mod namespace_db;

pub use filesystem::FilesystemBackend;
pub use milvus_store::MilvusBackend;
pub use namespace_db::NamespaceDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaizen_core::{
    Entity, EntityUpdate, KaizenError, KaizenResult, Metadata, Namespace, RecordedEntity,
};
use uuid::Uuid;

/// Common contract for entity store backends.
///
/// For `update_entities` with conflict resolution disabled, the returned list
/// has one `ADD` per input entity, in input order, each carrying its newly
/// assigned id.
#[async_trait]
pub trait EntityBackend: Send + Sync {
    /// Health probe. Never fails.
    async fn ready(&self) -> bool;

    /// Create a new namespace for entities to exist in. The id is
    /// auto-generated when absent.
    async fn create_namespace(&self, namespace_id: Option<&str>) -> KaizenResult<Namespace>;

    /// Get details about a specific namespace, with `num_entities` populated.
    async fn get_namespace_details(&self, namespace_id: &str) -> KaizenResult<Namespace>;

    /// List up to `limit` namespaces.
    async fn search_namespaces(&self, limit: usize) -> KaizenResult<Vec<Namespace>>;

    /// Delete a namespace and all its entities.
    async fn delete_namespace(&self, namespace_id: &str) -> KaizenResult<()>;

    /// Add/update a non-empty batch of same-type entities in a namespace.
    async fn update_entities(
        &self,
        namespace_id: &str,
        entities: &[Entity],
        enable_conflict_resolution: bool,
    ) -> KaizenResult<Vec<EntityUpdate>>;

    /// Search for entities in a namespace.
    async fn search_entities(
        &self,
        namespace_id: &str,
        query: Option<&str>,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> KaizenResult<Vec<RecordedEntity>>;

    /// Delete a specific entity by its ID.
    async fn delete_entity_by_id(&self, namespace_id: &str, entity_id: &str) -> KaizenResult<()>;
}

/// Generate a fresh namespace id: `ns_` plus a uuid with dashes flattened to
/// underscores, keeping the id safe for file names and collection names.
pub(crate) fn generate_namespace_id() -> String {
    format!("ns_{}", Uuid::new_v4().to_string().replace('-', "_"))
}

/// Validate that every entity in a batch shares one type and return it.
pub(crate) fn batch_entity_type(entities: &[Entity]) -> KaizenResult<String> {
    let entity_type = entities[0].entity_type.clone();
    if entities.iter().any(|e| e.entity_type != entity_type) {
        return Err(KaizenError::store("All entities must have the same type."));
    }
    Ok(entity_type)
}

/// Wrap a batch in `RecordedEntity` records carrying placeholder ids
/// (`Unprocessed_Entity_{i}`) for conflict resolution. Missing metadata
/// becomes an empty map.
pub(crate) fn entities_with_temporary_ids(
    entities: &[Entity],
    now: DateTime<Utc>,
) -> Vec<RecordedEntity> {
    entities
        .iter()
        .enumerate()
        .map(|(i, entity)| RecordedEntity {
            id: format!("Unprocessed_Entity_{i}"),
            entity_type: entity.entity_type.clone(),
            content: entity.content.clone(),
            created_at: now,
            metadata: entity.metadata.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_namespace_ids_are_unique_and_flat() {
        let a = generate_namespace_id();
        let b = generate_namespace_id();
        assert_ne!(a, b);
        assert!(a.starts_with("ns_"));
        assert!(!a.contains('-'));
    }

    #[test]
    fn mixed_type_batch_is_rejected() {
        let batch = vec![Entity::new("a", "x"), Entity::new("b", "y")];
        let error = batch_entity_type(&batch).unwrap_err();
        assert!(error.to_string().to_lowercase().contains("same type"));
    }

    #[test]
    fn temporary_ids_are_positional() {
        let batch = vec![Entity::new("note", "x"), Entity::new("note", "y")];
        let temps = entities_with_temporary_ids(&batch, Utc::now());
        assert_eq!(temps[0].id, "Unprocessed_Entity_0");
        assert_eq!(temps[1].id, "Unprocessed_Entity_1");
        assert!(temps[0].metadata.is_empty());
    }
}
