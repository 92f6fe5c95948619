//! Kaizen Sync - Phoenix Trace Ingestion
//!
//! Pulls LLM request spans from a Phoenix trace store, deduplicates on span
//! identity, reconstructs conversations from heterogeneous provider formats,
//! and drives trajectory persistence plus tip generation.

mod convert;
mod phoenix;

pub use convert::{clean_messages, extract_trajectory, SpanTrajectory};
pub use phoenix::{PhoenixClient, Span, SpanContext, SpanSource};

use kaizen_client::KaizenClient;
use kaizen_core::{Entity, KaizenError, KaizenResult, Metadata, PhoenixSettings};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Logical span name that marks an LLM request.
const LLM_REQUEST_SPAN_NAME: &str = "litellm_request";

/// How many existing trajectory entities to scan for dedupe state.
const DEDUPE_FETCH_LIMIT: usize = 10_000;

/// Result of a sync operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub processed: usize,
    pub skipped: usize,
    pub tips_generated: usize,
    pub errors: Vec<String>,
}

/// Sync trajectories from a Phoenix trace store into a Kaizen namespace.
pub struct PhoenixSync {
    client: Arc<KaizenClient>,
    source: Arc<dyn SpanSource>,
    namespace_id: String,
}

impl PhoenixSync {
    /// Build a sync worker against a live Phoenix endpoint.
    pub fn new(client: Arc<KaizenClient>, settings: &PhoenixSettings) -> KaizenResult<Self> {
        let namespace_id = client.settings().namespace_id.clone();
        Ok(Self {
            client,
            source: Arc::new(PhoenixClient::new(settings)?),
            namespace_id,
        })
    }

    /// Build a sync worker over any span source (tests, replays).
    pub fn with_source(
        client: Arc<KaizenClient>,
        source: Arc<dyn SpanSource>,
        namespace_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            source,
            namespace_id: namespace_id.into(),
        }
    }

    async fn ensure_namespace(&self) -> KaizenResult<()> {
        match self.client.get_namespace_details(&self.namespace_id).await {
            Ok(_) => Ok(()),
            Err(KaizenError::NamespaceNotFound(_)) => {
                self.client.create_namespace(Some(&self.namespace_id)).await?;
                info!(namespace = %self.namespace_id, "Created namespace");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Span ids already persisted as trajectory entities in the target
    /// namespace.
    async fn processed_span_ids(&self) -> KaizenResult<HashSet<String>> {
        let mut filters = Metadata::new();
        filters.insert("type".to_string(), json!("trajectory"));
        let entities = match self
            .client
            .search_entities(&self.namespace_id, None, Some(&filters), DEDUPE_FETCH_LIMIT)
            .await
        {
            Ok(entities) => entities,
            Err(KaizenError::NamespaceNotFound(_)) => return Ok(HashSet::new()),
            Err(other) => return Err(other),
        };

        Ok(entities
            .iter()
            .filter_map(|entity| entity.metadata_str("span_id"))
            .map(str::to_string)
            .collect())
    }

    /// Store one trajectory and generate tips from it. Returns the number of
    /// tips persisted.
    async fn process_trajectory(&self, trajectory: &SpanTrajectory) -> KaizenResult<usize> {
        if !trajectory.messages.is_empty() {
            let mut metadata = Metadata::new();
            metadata.insert("trace_id".to_string(), json!(trajectory.trace_id));
            metadata.insert("span_id".to_string(), json!(trajectory.span_id));
            metadata.insert("model".to_string(), json!(trajectory.model));
            metadata.insert("timestamp".to_string(), json!(trajectory.timestamp));
            metadata.insert("usage".to_string(), trajectory.usage.clone());
            metadata.insert(
                "message_count".to_string(),
                json!(trajectory.messages.len()),
            );

            let entity = Entity::new(
                "trajectory",
                serde_json::Value::Array(trajectory.messages.clone()),
            )
            .with_metadata(metadata);
            self.client
                .update_entities(&self.namespace_id, &[entity], false)
                .await?;
        }

        let generated = self
            .client
            .tip_generator()
            .generate(&trajectory.messages)
            .await?;

        if generated.tips.is_empty() {
            return Ok(0);
        }

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
                metadata.insert("source_trace_id".to_string(), json!(trajectory.trace_id));
                metadata.insert("source_span_id".to_string(), json!(trajectory.span_id));
                Entity::new("guideline", tip.content.clone()).with_metadata(metadata)
            })
            .collect();

        self.client
            .update_entities(&self.namespace_id, &tip_entities, true)
            .await?;

        Ok(generated.tips.len())
    }

    /// Fetch new trajectories from Phoenix and generate tips.
    ///
    /// A single bad span never aborts the sync: per-span failures are
    /// collected into the result's error list.
    pub async fn sync(&self, limit: usize, include_errors: bool) -> KaizenResult<SyncResult> {
        info!(namespace = %self.namespace_id, "Starting Phoenix sync");

        self.ensure_namespace().await?;

        let spans = self.source.fetch_spans(limit).await?;
        info!(count = spans.len(), "Fetched spans");

        let processed_ids = self.processed_span_ids().await?;
        info!(count = processed_ids.len(), "Found already processed spans");

        let mut result = SyncResult::default();

        for span in &spans {
            if span.name != LLM_REQUEST_SPAN_NAME {
                continue;
            }
            if !include_errors && span.status_code.as_deref() == Some("ERROR") {
                continue;
            }

            let span_id = &span.context.span_id;
            if processed_ids.contains(span_id) {
                result.skipped += 1;
                continue;
            }

            if !span.attributes.keys().any(|k| k.starts_with("gen_ai.prompt.")) {
                continue;
            }

            let mut trajectory = extract_trajectory(span);
            trajectory.messages = clean_messages(&trajectory.messages);
            if trajectory.messages.is_empty() {
                continue;
            }

            match self.process_trajectory(&trajectory).await {
                Ok(tips_count) => {
                    result.processed += 1;
                    result.tips_generated += tips_count;
                    info!(span_id = %span_id, tips = tips_count, "Processed span");
                }
                Err(e) => {
                    let message = format!("Error processing span {span_id}: {e}");
                    error!("{message}");
                    result.errors.push(message);
                }
            }
        }

        info!(
            processed = result.processed,
            skipped = result.skipped,
            tips_generated = result.tips_generated,
            errors = result.errors.len(),
            "Sync complete"
        );

        Ok(result)
    }
}

impl std::fmt::Debug for PhoenixSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoenixSync")
            .field("namespace_id", &self.namespace_id)
            .finish()
    }
}
