//! Filesystem backend
//!
//! One JSON document per namespace under the configured data directory.
//! Search is plain substring matching (no embeddings); a single per-process
//! lock serializes all document access. Deliberately simple rather than
//! scalable.

use crate::{batch_entity_type, entities_with_temporary_ids, generate_namespace_id, EntityBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaizen_core::{
    Entity, EntityUpdate, FilesystemSettings, KaizenError, KaizenResult, Metadata, Namespace,
    RecordedEntity, UpdateEvent,
};
use kaizen_llm::ConflictResolver;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// On-disk shape of a namespace document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamespaceDocument {
    id: String,
    created_at: DateTime<Utc>,
    next_id: u64,
    num_entities: i64,
    entities: Vec<RecordedEntity>,
}

/// A filesystem-based backend that stores data in JSON files.
pub struct FilesystemBackend {
    data_dir: PathBuf,
    resolver: Arc<ConflictResolver>,
    lock: Mutex<()>,
}

impl FilesystemBackend {
    pub fn new(settings: &FilesystemSettings, resolver: Arc<ConflictResolver>) -> KaizenResult<Self> {
        fs::create_dir_all(&settings.data_dir).map_err(|e| {
            KaizenError::store(format!(
                "Failed to create data directory {}: {e}",
                settings.data_dir.display()
            ))
        })?;
        Ok(Self {
            data_dir: settings.data_dir.clone(),
            resolver,
            lock: Mutex::new(()),
        })
    }

    fn namespace_file(&self, namespace_id: &str) -> PathBuf {
        self.data_dir.join(format!("{namespace_id}.json"))
    }

    fn load_document(&self, namespace_id: &str) -> KaizenResult<NamespaceDocument> {
        let path = self.namespace_file(namespace_id);
        let raw = fs::read_to_string(&path)
            .map_err(|_| KaizenError::NamespaceNotFound(namespace_id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| {
            KaizenError::store(format!("Corrupt namespace document {}: {e}", path.display()))
        })
    }

    fn save_document(&self, document: &NamespaceDocument) -> KaizenResult<()> {
        let path = self.namespace_file(&document.id);
        let raw = serde_json::to_string_pretty(document)
            .map_err(|e| KaizenError::store(format!("Failed to serialize namespace: {e}")))?;
        fs::write(&path, raw)
            .map_err(|e| KaizenError::store(format!("Failed to write {}: {e}", path.display())))
    }

    /// Equality filters check the record's own fields before metadata, so a
    /// metadata key named `id`, `type`, `content`, or `created_at` is
    /// shadowed by the record field of the same name.
    fn entity_field(entity: &RecordedEntity, key: &str) -> Option<serde_json::Value> {
        match key {
            "id" => Some(serde_json::Value::String(entity.id.clone())),
            "type" => Some(serde_json::Value::String(entity.entity_type.clone())),
            "content" => serde_json::to_value(&entity.content).ok(),
            "created_at" => Some(serde_json::Value::String(entity.created_at.to_rfc3339())),
            _ => entity.metadata.get(key).cloned(),
        }
    }

    fn search_in_document(
        document: &NamespaceDocument,
        query: Option<&str>,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> Vec<RecordedEntity> {
        let matches_filters = |entity: &RecordedEntity| -> bool {
            let Some(filters) = filters else { return true };
            filters.iter().all(|(key, expected)| {
                Self::entity_field(entity, key).as_ref() == Some(expected)
            })
        };

        match query {
            None => document
                .entities
                .iter()
                .filter(|e| matches_filters(e))
                .take(limit)
                .cloned()
                .collect(),
            Some(query) => {
                let needle = query.to_lowercase();
                document
                    .entities
                    .iter()
                    .filter(|e| matches_filters(e))
                    .filter(|e| e.content.as_search_text().to_lowercase().contains(&needle))
                    .take(limit)
                    .cloned()
                    .collect()
            }
        }
    }

    fn apply_updates(
        document: &mut NamespaceDocument,
        updates: &mut [EntityUpdate],
        entity_type: &str,
        now: DateTime<Utc>,
    ) {
        for update in updates.iter_mut() {
            match update.event {
                UpdateEvent::Add => {
                    let entity_id = document.next_id.to_string();
                    document.next_id += 1;
                    document.entities.push(RecordedEntity {
                        id: entity_id.clone(),
                        entity_type: entity_type.to_string(),
                        content: update.content.clone(),
                        created_at: now,
                        metadata: update.metadata.clone().unwrap_or_default(),
                    });
                    update.id = entity_id;
                }
                UpdateEvent::Update => {
                    // Content only; stored metadata is never overwritten by
                    // resolution output.
                    match document.entities.iter_mut().find(|e| e.id == update.id) {
                        Some(existing) => {
                            existing.content = update.content.clone();
                            existing.created_at = now;
                        }
                        None => warn!(id = %update.id, "UPDATE event targets a missing entity"),
                    }
                }
                UpdateEvent::Delete => {
                    let before = document.entities.len();
                    document.entities.retain(|e| e.id != update.id);
                    if document.entities.len() == before {
                        warn!(id = %update.id, "DELETE event targets a missing entity");
                    }
                }
                UpdateEvent::None => {}
            }
        }
    }
}

#[async_trait]
impl EntityBackend for FilesystemBackend {
    async fn ready(&self) -> bool {
        true
    }

    async fn create_namespace(&self, namespace_id: Option<&str>) -> KaizenResult<Namespace> {
        let namespace_id = match namespace_id {
            Some(id) => {
                if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
                    return Err(KaizenError::store(format!("Invalid namespace id: {id}")));
                }
                id.to_string()
            }
            None => generate_namespace_id(),
        };

        let _guard = self.lock.lock().await;
        if self.namespace_file(&namespace_id).exists() {
            return Err(KaizenError::NamespaceAlreadyExists(namespace_id));
        }

        let now = Utc::now();
        let document = NamespaceDocument {
            id: namespace_id.clone(),
            created_at: now,
            next_id: 1,
            num_entities: 0,
            entities: Vec::new(),
        };
        self.save_document(&document)?;

        Ok(Namespace {
            id: namespace_id,
            created_at: now,
            num_entities: Some(0),
        })
    }

    async fn get_namespace_details(&self, namespace_id: &str) -> KaizenResult<Namespace> {
        let _guard = self.lock.lock().await;
        let document = self.load_document(namespace_id)?;
        Ok(Namespace {
            id: document.id,
            created_at: document.created_at,
            num_entities: Some(document.entities.len() as i64),
        })
    }

    async fn search_namespaces(&self, limit: usize) -> KaizenResult<Vec<Namespace>> {
        let _guard = self.lock.lock().await;
        let entries = fs::read_dir(&self.data_dir).map_err(|e| {
            KaizenError::store(format!("Failed to read {}: {e}", self.data_dir.display()))
        })?;

        let mut namespaces = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Unreadable or foreign JSON files are skipped, not fatal.
            let Ok(raw) = fs::read_to_string(&path) else { continue };
            let Ok(document) = serde_json::from_str::<NamespaceDocument>(&raw) else { continue };
            namespaces.push(Namespace {
                id: document.id,
                created_at: document.created_at,
                num_entities: Some(document.entities.len() as i64),
            });
            if namespaces.len() >= limit {
                break;
            }
        }
        Ok(namespaces)
    }

    /// Deleting a namespace that does not exist is a silent success: the
    /// dominant call pattern is cleanup.
    async fn delete_namespace(&self, namespace_id: &str) -> KaizenResult<()> {
        let _guard = self.lock.lock().await;
        let path = self.namespace_file(namespace_id);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path)
            .map_err(|e| KaizenError::store(format!("Failed to delete {}: {e}", path.display())))
    }

    async fn update_entities(
        &self,
        namespace_id: &str,
        entities: &[Entity],
        enable_conflict_resolution: bool,
    ) -> KaizenResult<Vec<EntityUpdate>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let entity_type = batch_entity_type(entities)?;
        let now = Utc::now();
        let temporary = entities_with_temporary_ids(entities, now);

        let _guard = self.lock.lock().await;
        let mut document = self.load_document(namespace_id)?;

        let updates = if enable_conflict_resolution {
            let mut old_entities: Vec<RecordedEntity> = Vec::new();
            for entity in entities {
                let query = entity.content.as_search_text();
                old_entities.extend(Self::search_in_document(
                    &document,
                    Some(&query),
                    None,
                    10,
                ));
            }

            let mut updates = self.resolver.resolve(&old_entities, &temporary).await?;
            Self::apply_updates(&mut document, &mut updates, &entity_type, now);
            updates
        } else {
            let mut updates = Vec::with_capacity(entities.len());
            for entity in entities {
                let entity_id = document.next_id.to_string();
                document.next_id += 1;
                document.entities.push(RecordedEntity {
                    id: entity_id.clone(),
                    entity_type: entity_type.clone(),
                    content: entity.content.clone(),
                    created_at: now,
                    metadata: entity.metadata.clone().unwrap_or_default(),
                });
                updates.push(EntityUpdate {
                    id: entity_id,
                    entity_type: entity_type.clone(),
                    content: entity.content.clone(),
                    event: UpdateEvent::Add,
                    old_entity: None,
                    metadata: entity.metadata.clone(),
                });
            }
            updates
        };

        document.num_entities = document.entities.len() as i64;
        self.save_document(&document)?;
        Ok(updates)
    }

    async fn search_entities(
        &self,
        namespace_id: &str,
        query: Option<&str>,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> KaizenResult<Vec<RecordedEntity>> {
        let _guard = self.lock.lock().await;
        let document = self.load_document(namespace_id)?;
        Ok(Self::search_in_document(&document, query, filters, limit))
    }

    async fn delete_entity_by_id(&self, namespace_id: &str, entity_id: &str) -> KaizenResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load_document(namespace_id)?;
        let before = document.entities.len();
        document.entities.retain(|e| e.id != entity_id);
        if document.entities.len() == before {
            return Err(KaizenError::store(format!("Entity `{entity_id}` not found")));
        }
        document.num_entities = document.entities.len() as i64;
        self.save_document(&document)
    }
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}
