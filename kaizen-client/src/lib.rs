//! Kaizen Client - Facade over Entity Backends
//!
//! A stateless wrapper that selects a backend from configuration and
//! forwards entity store calls 1:1, plus the two tip-pipeline entry points
//! (`cluster_tips`, `consolidate_tips`). All retries, locking, and LLM calls
//! live inside the components this facade composes.

use kaizen_backend::{EntityBackend, FilesystemBackend, MilvusBackend};
use kaizen_core::{
    BackendKind, ConsolidationResult, Entity, EntityUpdate, FilesystemSettings, KaizenResult,
    KaizenSettings, LlmSettings, Metadata, Namespace, RecordedEntity, VectorSettings,
};
use kaizen_llm::{
    cluster_entities, combine_cluster, CompletionModel, ConflictResolver, EmbeddingProvider,
    HttpCompletionModel, HttpEmbeddingProvider, TipGenerator,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

/// Default cap on guideline entities fetched for one clustering pass.
pub const DEFAULT_CLUSTER_FETCH_LIMIT: usize = 10_000;

/// Wrapper client around Kaizen entity backends.
pub struct KaizenClient {
    settings: KaizenSettings,
    llm: LlmSettings,
    backend: Arc<dyn EntityBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionModel>,
}

impl KaizenClient {
    /// Build a client from environment configuration with production
    /// providers.
    pub async fn from_env() -> KaizenResult<Self> {
        let settings = KaizenSettings::from_env();
        let llm = LlmSettings::from_env();

        let completion: Arc<dyn CompletionModel> = Arc::new(HttpCompletionModel::new(&llm)?);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(&llm)?);
        let resolver = Arc::new(ConflictResolver::new(
            completion.clone(),
            llm.conflict_resolution_model.clone(),
        ));

        let backend: Arc<dyn EntityBackend> = match settings.backend {
            BackendKind::Filesystem => Arc::new(FilesystemBackend::new(
                &FilesystemSettings::from_env(),
                resolver,
            )?),
            BackendKind::Vector => Arc::new(
                MilvusBackend::connect(&VectorSettings::from_env(), embedder.clone(), resolver)
                    .await?,
            ),
        };

        Ok(Self {
            settings,
            llm,
            backend,
            embedder,
            completion,
        })
    }

    /// Build a client from explicit parts. Adapters and tests use this to
    /// swap in their own backend or model implementations.
    pub fn with_parts(
        settings: KaizenSettings,
        llm: LlmSettings,
        backend: Arc<dyn EntityBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            settings,
            llm,
            backend,
            embedder,
            completion,
        }
    }

    pub fn settings(&self) -> &KaizenSettings {
        &self.settings
    }

    /// Tip generator wired to the configured tips model.
    pub fn tip_generator(&self) -> TipGenerator {
        TipGenerator::new(self.completion.clone(), self.llm.tips_model.clone())
    }

    /// Check if the backend is healthy.
    pub async fn ready(&self) -> bool {
        self.backend.ready().await
    }

    /// Create a new namespace for entities to exist in.
    pub async fn create_namespace(&self, namespace_id: Option<&str>) -> KaizenResult<Namespace> {
        self.backend.create_namespace(namespace_id).await
    }

    /// Get details about a specific namespace.
    pub async fn get_namespace_details(&self, namespace_id: &str) -> KaizenResult<Namespace> {
        self.backend.get_namespace_details(namespace_id).await
    }

    /// List up to `limit` namespaces.
    pub async fn all_namespaces(&self, limit: usize) -> KaizenResult<Vec<Namespace>> {
        self.backend.search_namespaces(limit).await
    }

    /// Delete a namespace that entities exist in.
    pub async fn delete_namespace(&self, namespace_id: &str) -> KaizenResult<()> {
        self.backend.delete_namespace(namespace_id).await
    }

    /// Add multiple entities to a namespace.
    pub async fn update_entities(
        &self,
        namespace_id: &str,
        entities: &[Entity],
        enable_conflict_resolution: bool,
    ) -> KaizenResult<Vec<EntityUpdate>> {
        self.backend
            .update_entities(namespace_id, entities, enable_conflict_resolution)
            .await
    }

    /// Search for entities in a namespace.
    pub async fn search_entities(
        &self,
        namespace_id: &str,
        query: Option<&str>,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> KaizenResult<Vec<RecordedEntity>> {
        self.backend
            .search_entities(namespace_id, query, filters, limit)
            .await
    }

    /// Get all entities from a namespace, optionally filtered.
    pub async fn get_all_entities(
        &self,
        namespace_id: &str,
        filters: Option<&Metadata>,
        limit: usize,
    ) -> KaizenResult<Vec<RecordedEntity>> {
        self.search_entities(namespace_id, None, filters, limit).await
    }

    /// Delete a specific entity by its ID.
    pub async fn delete_entity_by_id(
        &self,
        namespace_id: &str,
        entity_id: &str,
    ) -> KaizenResult<()> {
        self.backend.delete_entity_by_id(namespace_id, entity_id).await
    }

    /// Check if a namespace exists.
    pub async fn namespace_exists(&self, namespace_id: &str) -> bool {
        self.backend.get_namespace_details(namespace_id).await.is_ok()
    }

    /// Cluster guideline entities by task description similarity.
    ///
    /// Fetches up to `limit` guideline entities; hitting the limit logs a
    /// warning because the clustering result may then be incomplete.
    pub async fn cluster_tips(
        &self,
        namespace_id: &str,
        threshold: Option<f32>,
        limit: usize,
    ) -> KaizenResult<Vec<Vec<RecordedEntity>>> {
        let threshold = threshold.unwrap_or(self.settings.clustering_threshold);

        let mut filters = Metadata::new();
        filters.insert("type".to_string(), serde_json::json!("guideline"));
        let entities = self
            .get_all_entities(namespace_id, Some(&filters), limit)
            .await?;
        if entities.len() >= limit {
            warn!(
                fetched = entities.len(),
                limit, "Hit the entity fetch limit; clustering results may be incomplete"
            );
        }

        cluster_entities(self.embedder.as_ref(), &entities, threshold).await
    }

    /// Cluster similar tips and combine each cluster into consolidated
    /// guidelines.
    ///
    /// Per cluster this is a two-phase commit with no rollback: merged tips
    /// are inserted first, then the originals are deleted. A failed insert
    /// skips the cluster entirely; a failed delete leaves duplicates for the
    /// next run to reconsolidate.
    pub async fn consolidate_tips(
        &self,
        namespace_id: &str,
        threshold: Option<f32>,
    ) -> KaizenResult<ConsolidationResult> {
        let clusters = self
            .cluster_tips(namespace_id, threshold, DEFAULT_CLUSTER_FETCH_LIMIT)
            .await?;

        let mut result = ConsolidationResult::default();

        for cluster in clusters {
            let cluster_ids: Vec<&str> = cluster.iter().map(|e| e.id.as_str()).collect();

            // Phase 1: combine + insert (skip cluster on any failure).
            let consolidated = match combine_cluster(
                self.completion.as_ref(),
                &self.llm.tips_model,
                &cluster,
            )
            .await
            {
                Ok(tips) => tips,
                Err(error) => {
                    warn!(ids = ?cluster_ids, %error, "Failed to consolidate cluster; skipping");
                    continue;
                }
            };

            if consolidated.is_empty() {
                warn!(
                    ids = ?cluster_ids,
                    "LLM returned no consolidated tips for cluster; skipping deletion"
                );
                continue;
            }

            let task_description = cluster[0]
                .metadata_str("task_description")
                .unwrap_or_default()
                .to_string();
            let new_entities: Vec<Entity> = consolidated
                .iter()
                .map(|tip| {
                    let mut metadata = Metadata::new();
                    metadata.insert(
                        "task_description".to_string(),
                        serde_json::json!(task_description),
                    );
                    metadata.insert("rationale".to_string(), serde_json::json!(tip.rationale));
                    metadata.insert(
                        "category".to_string(),
                        serde_json::json!(tip.category.as_str()),
                    );
                    metadata.insert("trigger".to_string(), serde_json::json!(tip.trigger));
                    Entity::new("guideline", tip.content.clone()).with_metadata(metadata)
                })
                .collect();

            if let Err(error) = self
                .update_entities(namespace_id, &new_entities, false)
                .await
            {
                warn!(ids = ?cluster_ids, %error, "Failed to insert consolidated tips; skipping");
                continue;
            }

            result.clusters_found += 1;
            result.tips_before += cluster.len();
            result.tips_after += consolidated.len();

            // Phase 2: delete originals (log errors but don't roll back the
            // insert).
            for entity in &cluster {
                if let Err(error) = self.delete_entity_by_id(namespace_id, &entity.id).await {
                    warn!(
                        id = %entity.id,
                        %error,
                        "Failed to delete original entity after successful insert; skipping"
                    );
                }
            }
        }

        Ok(result)
    }
}

impl std::fmt::Debug for KaizenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaizenClient")
            .field("backend_kind", &self.settings.backend)
            .field("namespace_id", &self.settings.namespace_id)
            .finish()
    }
}

static SHARED_CLIENT: OnceCell<Arc<KaizenClient>> = OnceCell::const_new();

/// Process-wide lazy client. Initialization is one-shot behind a lock: the
/// first caller in a race builds the client, everyone else gets the same
/// instance.
pub async fn shared_client() -> KaizenResult<Arc<KaizenClient>> {
    SHARED_CLIENT
        .get_or_try_init(|| async { KaizenClient::from_env().await.map(Arc::new) })
        .await
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kaizen_core::KaizenError;
    use kaizen_llm::MockCompletionModel;
    use serde_json::json;
    use tempfile::TempDir;

    /// Embeddings keyed on topic words: identical axes cluster, distinct
    /// axes stay apart.
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        async fn embed(&self, text: &str) -> KaizenResult<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(if lower.contains("error handling") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }
        async fn embed_batch(&self, texts: &[String]) -> KaizenResult<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
        fn dimensions(&self) -> i32 {
            2
        }
        fn model_id(&self) -> &str {
            "topic-test"
        }
    }

    fn client_with(responses: Vec<KaizenResult<String>>) -> (KaizenClient, TempDir) {
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
        let client = KaizenClient::with_parts(
            KaizenSettings::default(),
            LlmSettings::default(),
            backend,
            Arc::new(TopicEmbedder),
            completion,
        );
        (client, dir)
    }

    async fn seed_guideline(client: &KaizenClient, content: &str, task: &str) -> String {
        let mut metadata = Metadata::new();
        metadata.insert("task_description".to_string(), json!(task));
        metadata.insert("rationale".to_string(), json!("because"));
        metadata.insert("category".to_string(), json!("strategy"));
        metadata.insert("trigger".to_string(), json!("always"));
        let updates = client
            .update_entities(
                "kaizen",
                &[Entity::new("guideline", content).with_metadata(metadata)],
                false,
            )
            .await
            .unwrap();
        updates[0].id.clone()
    }

    #[tokio::test]
    async fn facade_forwards_backend_calls() {
        let (client, _dir) = client_with(vec![]);
        assert!(client.ready().await);
        client.create_namespace(Some("kaizen")).await.unwrap();
        assert!(client.namespace_exists("kaizen").await);
        assert!(!client.namespace_exists("ghost").await);

        let namespaces = client.all_namespaces(10).await.unwrap();
        assert_eq!(namespaces.len(), 1);

        client.delete_namespace("kaizen").await.unwrap();
        assert!(!client.namespace_exists("kaizen").await);
    }

    #[tokio::test]
    async fn cluster_tips_groups_by_task_description() {
        let (client, _dir) = client_with(vec![]);
        client.create_namespace(Some("kaizen")).await.unwrap();
        seed_guideline(&client, "retry on failure", "improve error handling in api").await;
        seed_guideline(&client, "log all errors", "better error handling for edge cases").await;
        seed_guideline(&client, "cache db reads", "add caching to db queries").await;

        let clusters = client.cluster_tips("kaizen", Some(0.9), 100).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[tokio::test]
    async fn consolidation_replaces_cluster_with_merged_tips() {
        let merged = json!({
            "tips": [{
                "content": "Retry failed calls and log the error context",
                "rationale": "Covers both recovery and debuggability",
                "category": "recovery",
                "trigger": "When an external call fails",
            }]
        })
        .to_string();
        let (client, _dir) = client_with(vec![Ok(merged)]);
        client.create_namespace(Some("kaizen")).await.unwrap();
        let id_a = seed_guideline(&client, "retry on failure", "improve error handling in api").await;
        let id_b =
            seed_guideline(&client, "log all errors", "better error handling for edge cases").await;

        let result = client.consolidate_tips("kaizen", Some(0.9)).await.unwrap();
        assert_eq!(
            result,
            ConsolidationResult {
                clusters_found: 1,
                tips_before: 2,
                tips_after: 1,
            }
        );

        let remaining = client.get_all_entities("kaizen", None, 100).await.unwrap();
        assert_eq!(remaining.len(), 1);
        let survivor = &remaining[0];
        assert!(survivor.id != id_a && survivor.id != id_b);
        assert_eq!(survivor.entity_type, "guideline");
        assert_eq!(
            survivor.metadata_str("task_description"),
            Some("improve error handling in api")
        );
        assert_eq!(survivor.metadata_str("category"), Some("recovery"));
    }

    #[tokio::test]
    async fn consolidation_preserves_originals_on_empty_result() {
        let empty = json!({"tips": []}).to_string();
        let (client, _dir) = client_with(vec![Ok(empty)]);
        client.create_namespace(Some("kaizen")).await.unwrap();
        seed_guideline(&client, "retry on failure", "improve error handling in api").await;
        seed_guideline(&client, "log all errors", "better error handling for edge cases").await;

        let result = client.consolidate_tips("kaizen", Some(0.9)).await.unwrap();
        assert_eq!(result, ConsolidationResult::default());

        let remaining = client.get_all_entities("kaizen", None, 100).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn consolidation_skips_cluster_when_llm_keeps_failing() {
        let (client, _dir) = client_with(vec![
            Ok("bad".to_string()),
            Ok("bad".to_string()),
            Ok("bad".to_string()),
        ]);
        client.create_namespace(Some("kaizen")).await.unwrap();
        seed_guideline(&client, "retry on failure", "improve error handling in api").await;
        seed_guideline(&client, "log all errors", "better error handling for edge cases").await;

        let result = client.consolidate_tips("kaizen", Some(0.9)).await.unwrap();
        assert_eq!(result.clusters_found, 0);
        assert_eq!(client.get_all_entities("kaizen", None, 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn singleton_clusters_are_not_consolidated() {
        let (client, _dir) = client_with(vec![]);
        client.create_namespace(Some("kaizen")).await.unwrap();
        seed_guideline(&client, "cache db reads", "add caching to db queries").await;

        let result = client.consolidate_tips("kaizen", Some(0.9)).await.unwrap();
        assert_eq!(result, ConsolidationResult::default());
        assert_eq!(client.get_all_entities("kaizen", None, 100).await.unwrap().len(), 1);
    }
}
