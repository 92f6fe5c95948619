//! Milvus vector backend
//!
//! One collection per namespace; entity content is embedded at write time and
//! searched by inner product. Namespace records live in a SQLite side-table
//! because the index has no place for them. Ids are backend-assigned 64-bit
//! integers, returned to callers as strings.

use crate::{
    batch_entity_type, entities_with_temporary_ids, generate_namespace_id, EntityBackend,
    NamespaceDb,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaizen_core::{
    Entity, EntityContent, EntityUpdate, KaizenError, KaizenResult, Metadata, Namespace,
    RecordedEntity, UpdateEvent, VectorSettings,
};
use kaizen_llm::{ConflictResolver, EmbeddingProvider};
use milvus::client::Client;
use milvus::collection::{Collection, SearchOption};
use milvus::data::FieldColumn;
use milvus::index::{IndexParams, IndexType, MetricType};
use milvus::schema::{CollectionSchema, CollectionSchemaBuilder, FieldSchema};
use milvus::value::Value as MilvusValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::warn;

const ID_FIELD: &str = "id";
const TYPE_FIELD: &str = "type";
const CONTENT_FIELD: &str = "content";
const CREATED_AT_FIELD: &str = "created_at";
const EMBEDDING_FIELD: &str = "embedding";
const METADATA_FIELD: &str = "metadata";

/// Fields the store reads back; the embedding stays in the index.
fn output_fields() -> Vec<&'static str> {
    vec![
        ID_FIELD,
        TYPE_FIELD,
        CONTENT_FIELD,
        CREATED_AT_FIELD,
        METADATA_FIELD,
    ]
}

/// Compose a 64-bit entity id from a microsecond timestamp and a rolling
/// counter. 10 counter bits keep concurrent same-microsecond inserts apart.
fn compose_entity_id(micros: i64, counter: i64) -> i64 {
    (micros << 10) | (counter & 0x3FF)
}

fn escape_expr_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Split equality filters into a server-side expression over record fields
/// and client-side checks for metadata keys (metadata is a JSON string column
/// the index cannot filter on).
fn build_filters(filters: Option<&Metadata>) -> (String, Vec<(String, serde_json::Value)>) {
    let Some(filters) = filters else {
        return (String::new(), Vec::new());
    };

    let mut conjuncts: Vec<String> = Vec::new();
    let mut metadata_filters: Vec<(String, serde_json::Value)> = Vec::new();

    for (key, value) in filters {
        match key.as_str() {
            ID_FIELD | TYPE_FIELD | CONTENT_FIELD | CREATED_AT_FIELD => {
                let clause = match value {
                    serde_json::Value::String(s) => {
                        if key == ID_FIELD {
                            match s.parse::<i64>() {
                                Ok(id) => format!("{key} == {id}"),
                                Err(_) => format!("{key} == '{}'", escape_expr_string(s)),
                            }
                        } else {
                            format!("{key} == '{}'", escape_expr_string(s))
                        }
                    }
                    serde_json::Value::Number(n) => format!("{key} == {n}"),
                    serde_json::Value::Bool(b) => format!("{key} == {b}"),
                    other => format!("{key} == '{}'", escape_expr_string(&other.to_string())),
                };
                conjuncts.push(clause);
            }
            _ => metadata_filters.push((key.clone(), value.clone())),
        }
    }

    (conjuncts.join(" && "), metadata_filters)
}

fn matches_metadata(entity: &RecordedEntity, filters: &[(String, serde_json::Value)]) -> bool {
    filters
        .iter()
        .all(|(key, expected)| entity.metadata.get(key) == Some(expected))
}

fn find_column<'a>(columns: &'a [FieldColumn], name: &str) -> KaizenResult<&'a FieldColumn> {
    columns
        .iter()
        .find(|column| column.name == name)
        .ok_or_else(|| KaizenError::store(format!("Field `{name}` missing from index results")))
}

fn rows_from_columns(columns: &[FieldColumn]) -> KaizenResult<Vec<RecordedEntity>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = find_column(columns, ID_FIELD)?
        .value
        .clone()
        .try_into()
        .map_err(|e| KaizenError::store(format!("Failed to parse id column: {e:?}")))?;
    let types: Vec<String> = find_column(columns, TYPE_FIELD)?
        .value
        .clone()
        .try_into()
        .map_err(|e| KaizenError::store(format!("Failed to parse type column: {e:?}")))?;
    let contents: Vec<String> = find_column(columns, CONTENT_FIELD)?
        .value
        .clone()
        .try_into()
        .map_err(|e| KaizenError::store(format!("Failed to parse content column: {e:?}")))?;
    let created: Vec<i64> = find_column(columns, CREATED_AT_FIELD)?
        .value
        .clone()
        .try_into()
        .map_err(|e| KaizenError::store(format!("Failed to parse created_at column: {e:?}")))?;
    let metadata: Vec<String> = find_column(columns, METADATA_FIELD)?
        .value
        .clone()
        .try_into()
        .map_err(|e| KaizenError::store(format!("Failed to parse metadata column: {e:?}")))?;

    let mut entities = Vec::with_capacity(ids.len());
    for i in 0..ids.len() {
        entities.push(RecordedEntity {
            id: ids[i].to_string(),
            entity_type: types.get(i).cloned().unwrap_or_default(),
            content: EntityContent::from_serialized(contents.get(i).map(String::as_str).unwrap_or("")),
            created_at: created
                .get(i)
                .and_then(|epoch| DateTime::<Utc>::from_timestamp(*epoch, 0))
                .unwrap_or_else(Utc::now),
            metadata: metadata
                .get(i)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
        });
    }
    Ok(entities)
}

/// Milvus-backed entity store.
pub struct MilvusBackend {
    client: Client,
    namespaces: NamespaceDb,
    embedder: Arc<dyn EmbeddingProvider>,
    resolver: Arc<ConflictResolver>,
    id_counter: AtomicI64,
}

impl MilvusBackend {
    pub async fn connect(
        settings: &VectorSettings,
        embedder: Arc<dyn EmbeddingProvider>,
        resolver: Arc<ConflictResolver>,
    ) -> KaizenResult<Self> {
        let client = Client::new(settings.uri.clone())
            .await
            .map_err(|e| KaizenError::store(format!("Failed to connect to Milvus: {e}")))?;
        let namespaces = NamespaceDb::open(&settings.sqlite_path)?;
        Ok(Self {
            client,
            namespaces,
            embedder,
            resolver,
            id_counter: AtomicI64::new(0),
        })
    }

    fn next_entity_id(&self) -> i64 {
        compose_entity_id(
            Utc::now().timestamp_micros(),
            self.id_counter.fetch_add(1, Ordering::Relaxed),
        )
    }

    fn entity_schema(&self, namespace_id: &str) -> KaizenResult<CollectionSchema> {
        CollectionSchemaBuilder::new(namespace_id, "Kaizen entity collection")
            .add_field(FieldSchema::new_primary_int64(ID_FIELD, "Entity id", false))
            .add_field(FieldSchema::new_varchar(TYPE_FIELD, "Entity type", 128))
            .add_field(FieldSchema::new_varchar(
                CONTENT_FIELD,
                "Serialized entity content",
                65535,
            ))
            .add_field(FieldSchema::new_int64(
                CREATED_AT_FIELD,
                "Epoch seconds of the last mutation",
            ))
            .add_field(FieldSchema::new_float_vector(
                EMBEDDING_FIELD,
                "Content embedding",
                self.embedder.dimensions() as i64,
            ))
            .add_field(FieldSchema::new_string(METADATA_FIELD, "Entity metadata JSON"))
            .build()
            .map_err(|e| KaizenError::store(format!("Failed to build collection schema: {e}")))
    }

    async fn validate_namespace(&self, namespace_id: &str) -> KaizenResult<()> {
        let exists = self
            .client
            .has_collection(namespace_id)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to check collection: {e}")))?;
        if exists {
            Ok(())
        } else {
            Err(KaizenError::NamespaceNotFound(namespace_id.to_string()))
        }
    }

    async fn collection(&self, namespace_id: &str) -> KaizenResult<Collection> {
        self.client
            .get_collection(namespace_id)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to get collection: {e}")))
    }

    async fn insert_row(
        &self,
        collection: &Collection,
        schema: &CollectionSchema,
        id: i64,
        entity_type: &str,
        content: &str,
        created_at: DateTime<Utc>,
        metadata: &Metadata,
    ) -> KaizenResult<()> {
        let embedding = self.embedder.embed(content).await?;
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| KaizenError::store(format!("Failed to serialize metadata: {e}")))?;

        let field = |name: &str| -> KaizenResult<&FieldSchema> {
            schema
                .get_field(name)
                .ok_or_else(|| KaizenError::store(format!("Field `{name}` missing from schema")))
        };

        let columns = vec![
            FieldColumn::new(field(ID_FIELD)?, vec![id]),
            FieldColumn::new(field(TYPE_FIELD)?, vec![entity_type.to_string()]),
            FieldColumn::new(field(CONTENT_FIELD)?, vec![content.to_string()]),
            FieldColumn::new(field(CREATED_AT_FIELD)?, vec![created_at.timestamp()]),
            FieldColumn::new(field(EMBEDDING_FIELD)?, embedding),
            FieldColumn::new(field(METADATA_FIELD)?, vec![metadata_json]),
        ];

        collection
            .insert(columns, None)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to insert entity: {e}")))?;
        Ok(())
    }

    async fn query_rows(&self, collection: &Collection, expr: &str) -> KaizenResult<Vec<RecordedEntity>> {
        let columns = collection
            .query(expr, Vec::<String>::new())
            .await
            .map_err(|e| KaizenError::store(format!("Query failed: {e}")))?;
        rows_from_columns(&columns)
    }

    async fn count_entities(&self, namespace_id: &str) -> KaizenResult<i64> {
        let collection = self.collection(namespace_id).await?;
        let rows = self.query_rows(&collection, "id >= 0").await?;
        Ok(rows.len() as i64)
    }
}

#[async_trait]
impl EntityBackend for MilvusBackend {
    async fn ready(&self) -> bool {
        self.client.list_collections().await.is_ok()
    }

    async fn create_namespace(&self, namespace_id: Option<&str>) -> KaizenResult<Namespace> {
        let namespace_id = namespace_id
            .map(str::to_string)
            .unwrap_or_else(generate_namespace_id);

        let exists = self
            .client
            .has_collection(&namespace_id)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to check collection: {e}")))?;

        if !exists {
            let schema = self.entity_schema(&namespace_id)?;
            self.client
                .create_collection(schema, None)
                .await
                .map_err(|e| KaizenError::store(format!("Failed to create collection: {e}")))?;

            let collection = self.collection(&namespace_id).await?;
            let mut params = HashMap::new();
            params.insert("nlist".to_string(), "128".to_string());
            collection
                .create_index(
                    EMBEDDING_FIELD,
                    IndexParams::new(
                        "embedding_index".to_string(),
                        IndexType::IvfFlat,
                        MetricType::IP,
                        params,
                    ),
                )
                .await
                .map_err(|e| KaizenError::store(format!("Failed to create index: {e}")))?;
            collection
                .load(1)
                .await
                .map_err(|e| KaizenError::store(format!("Failed to load collection: {e}")))?;
        }

        let mut namespace = self.namespaces.create_namespace(&namespace_id)?;
        namespace.num_entities = Some(0);
        Ok(namespace)
    }

    async fn get_namespace_details(&self, namespace_id: &str) -> KaizenResult<Namespace> {
        self.validate_namespace(namespace_id).await?;
        let mut namespace = self
            .namespaces
            .get_namespace(namespace_id)?
            .ok_or_else(|| KaizenError::NamespaceNotFound(namespace_id.to_string()))?;
        namespace.num_entities = Some(self.count_entities(namespace_id).await?);
        Ok(namespace)
    }

    async fn search_namespaces(&self, limit: usize) -> KaizenResult<Vec<Namespace>> {
        let mut namespaces = self.namespaces.search_namespaces(limit)?;
        for namespace in &mut namespaces {
            let has_collection = self
                .client
                .has_collection(&namespace.id)
                .await
                .unwrap_or(false);
            if has_collection {
                namespace.num_entities = Some(self.count_entities(&namespace.id).await?);
            }
        }
        Ok(namespaces)
    }

    /// Unlike the filesystem backend, deleting a missing namespace raises
    /// `NamespaceNotFound`; adapters treat both outcomes as success.
    async fn delete_namespace(&self, namespace_id: &str) -> KaizenResult<()> {
        self.validate_namespace(namespace_id).await?;
        self.client
            .drop_collection(namespace_id)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to drop collection: {e}")))?;
        // A failure between the drop and this delete leaves an orphaned
        // namespace row; the next create with the same id heals it.
        self.namespaces.delete_namespace(namespace_id)
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
        self.validate_namespace(namespace_id).await?;
        let entity_type = batch_entity_type(entities)?;
        let now = Utc::now();
        let temporary = entities_with_temporary_ids(entities, now);
        let schema = self.entity_schema(namespace_id)?;
        let collection = self.collection(namespace_id).await?;

        let updates = if enable_conflict_resolution {
            let mut old_entities: Vec<RecordedEntity> = Vec::new();
            for entity in entities {
                let query = entity.content.as_search_text();
                old_entities.extend(
                    self.search_entities(namespace_id, Some(&query), None, 10)
                        .await?,
                );
            }

            let mut updates = self.resolver.resolve(&old_entities, &temporary).await?;
            for update in &mut updates {
                match update.event {
                    UpdateEvent::Add => {
                        let entity_id = self.next_entity_id();
                        let content = update.content.as_search_text();
                        let metadata = update.metadata.clone().unwrap_or_default();
                        self.insert_row(
                            &collection,
                            &schema,
                            entity_id,
                            &entity_type,
                            &content,
                            now,
                            &metadata,
                        )
                        .await?;
                        update.id = entity_id.to_string();
                    }
                    UpdateEvent::Update => {
                        let Ok(entity_id) = update.id.parse::<i64>() else {
                            warn!(id = %update.id, "UPDATE event carries a non-numeric id");
                            update.event = UpdateEvent::None;
                            continue;
                        };
                        let existing = self
                            .query_rows(&collection, &format!("id == {entity_id}"))
                            .await?;
                        let Some(existing) = existing.into_iter().next() else {
                            warn!(id = entity_id, "UPDATE event targets a missing entity");
                            update.event = UpdateEvent::None;
                            continue;
                        };
                        // Content changes; stored metadata is preserved. The
                        // SDK has no partial upsert, so this is a
                        // delete-and-reinsert under the same id.
                        collection
                            .delete(&format!("id in [{entity_id}]"), None)
                            .await
                            .map_err(|e| {
                                KaizenError::store(format!("Failed to replace entity: {e}"))
                            })?;
                        let content = update.content.as_search_text();
                        self.insert_row(
                            &collection,
                            &schema,
                            entity_id,
                            &entity_type,
                            &content,
                            now,
                            &existing.metadata,
                        )
                        .await?;
                    }
                    UpdateEvent::Delete => {
                        self.delete_entity_by_id(namespace_id, &update.id).await?;
                    }
                    UpdateEvent::None => {}
                }
            }
            updates
        } else {
            let mut updates = Vec::with_capacity(entities.len());
            for entity in entities {
                let entity_id = self.next_entity_id();
                let content = entity.content.as_search_text();
                let metadata = entity.metadata.clone().unwrap_or_default();
                self.insert_row(
                    &collection,
                    &schema,
                    entity_id,
                    &entity_type,
                    &content,
                    now,
                    &metadata,
                )
                .await?;
                updates.push(EntityUpdate {
                    id: entity_id.to_string(),
                    entity_type: entity_type.clone(),
                    content: entity.content.clone(),
                    event: UpdateEvent::Add,
                    old_entity: None,
                    metadata: Some(metadata),
                });
            }
            updates
        };

        collection
            .flush()
            .await
            .map_err(|e| KaizenError::store(format!("Failed to flush collection: {e}")))?;
        Ok(updates)
    }

    async fn search_entities(
        &self,
        namespace_id: &str,
        query: Option<&str>,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> KaizenResult<Vec<RecordedEntity>> {
        self.validate_namespace(namespace_id).await?;
        let (expr, metadata_filters) = build_filters(filters);
        let collection = self.collection(namespace_id).await?;

        let rows = match query {
            Some(query) => {
                let embedding = self.embedder.embed(query).await?;
                let mut option = SearchOption::new();
                if !expr.is_empty() {
                    option.set_expr(expr);
                }
                let results = collection
                    .search(
                        vec![MilvusValue::from(embedding)],
                        EMBEDDING_FIELD,
                        limit as i32,
                        MetricType::IP,
                        output_fields(),
                        &option,
                    )
                    .await
                    .map_err(|e| KaizenError::store(format!("Search failed: {e}")))?;

                let mut rows = Vec::new();
                for result in results {
                    rows.extend(rows_from_columns(&result.field)?);
                }
                rows
            }
            None => {
                // A scalar query needs a non-empty predicate; synthesize an
                // always-true clause when no filter applies.
                let expr = if expr.is_empty() {
                    "id >= 0".to_string()
                } else {
                    expr
                };
                self.query_rows(&collection, &expr).await?
            }
        };

        Ok(rows
            .into_iter()
            .filter(|entity| matches_metadata(entity, &metadata_filters))
            .take(limit)
            .collect())
    }

    async fn delete_entity_by_id(&self, namespace_id: &str, entity_id: &str) -> KaizenResult<()> {
        let entity_id_int: i64 = entity_id.parse().map_err(|_| {
            KaizenError::store(format!(
                "Invalid entity ID: {entity_id}. Entity IDs must be numeric."
            ))
        })?;
        self.validate_namespace(namespace_id).await?;

        let collection = self.collection(namespace_id).await?;
        let existing = self
            .query_rows(&collection, &format!("id == {entity_id_int}"))
            .await?;
        if existing.is_empty() {
            return Err(KaizenError::store(format!(
                "Entity with ID {entity_id} not found in namespace {namespace_id}."
            )));
        }

        collection
            .delete(&format!("id in [{entity_id_int}]"), None)
            .await
            .map_err(|e| KaizenError::store(format!("Failed to delete entity: {e}")))?;
        collection
            .flush()
            .await
            .map_err(|e| KaizenError::store(format!("Failed to flush after delete: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for MilvusBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilvusBackend")
            .field("embedding_model", &self.embedder.model_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(entries: &[(&str, serde_json::Value)]) -> Metadata {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn build_filters_splits_record_fields_from_metadata() {
        let map = filters(&[
            ("type", json!("guideline")),
            ("source", json!("review")),
        ]);
        let (expr, metadata_filters) = build_filters(Some(&map));
        assert_eq!(expr, "type == 'guideline'");
        assert_eq!(metadata_filters, vec![("source".to_string(), json!("review"))]);
    }

    #[test]
    fn build_filters_handles_numeric_ids_and_escaping() {
        let map = filters(&[("id", json!("42"))]);
        let (expr, _) = build_filters(Some(&map));
        assert_eq!(expr, "id == 42");

        let map = filters(&[("type", json!("it's"))]);
        let (expr, _) = build_filters(Some(&map));
        assert_eq!(expr, "type == 'it\\'s'");
    }

    #[test]
    fn build_filters_without_input_is_empty() {
        let (expr, metadata_filters) = build_filters(None);
        assert!(expr.is_empty());
        assert!(metadata_filters.is_empty());
    }

    #[test]
    fn composed_ids_are_distinct_for_distinct_counters() {
        let micros = 1_730_000_000_000_000i64;
        let a = compose_entity_id(micros, 0);
        let b = compose_entity_id(micros, 1);
        assert_ne!(a, b);
        assert!(a > 0 && b > 0);
    }

    #[test]
    fn metadata_match_is_equality_on_top_level_keys() {
        let entity = RecordedEntity {
            id: "1".to_string(),
            entity_type: "guideline".to_string(),
            content: EntityContent::Text("x".to_string()),
            created_at: Utc::now(),
            metadata: filters(&[("source", json!("review"))]),
        };
        assert!(matches_metadata(&entity, &[("source".to_string(), json!("review"))]));
        assert!(!matches_metadata(&entity, &[("source".to_string(), json!("other"))]));
        assert!(!matches_metadata(&entity, &[("missing".to_string(), json!("x"))]));
    }
}
