//! Cluster tip entities by task description similarity and consolidate
//! clusters into fewer, non-redundant tips.

use crate::clean::clean_llm_response;
use crate::embedding::EmbeddingProvider;
use crate::gateway::{CompletionModel, CompletionRequest};
use crate::prompts::combine_tips_prompt;
use crate::tips::tip_generation_schema;
use kaizen_core::{KaizenError, KaizenResult, RecordedEntity, Tip, TipGenerationResponse};
use serde_json::json;
use tracing::warn;

/// Hard cap on the number of entities fed into the dense similarity matrix.
pub const MAX_CLUSTER_ENTITIES: usize = 5000;

const COMBINE_ATTEMPTS: usize = 3;

/// Group indices into connected components using union-find with path
/// compression. Returns groups of indices, each in ascending input order.
pub fn union_find(n: usize, pairs: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for &(i, j) in pairs {
        let ri = find(&mut parent, i);
        let rj = find(&mut parent, j);
        if ri != rj {
            parent[ri] = rj;
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        match roots.iter().position(|&r| r == root) {
            Some(pos) => groups[pos].push(i),
            None => {
                roots.push(root);
                groups.push(vec![i]);
            }
        }
    }
    groups
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cluster entities by cosine similarity of their task descriptions.
///
/// Entities without a non-empty `task_description` in metadata are excluded.
/// The threshold is inclusive; single-entity clusters are discarded. Input
/// order is preserved within each cluster.
pub async fn cluster_entities(
    embedder: &dyn EmbeddingProvider,
    entities: &[RecordedEntity],
    threshold: f32,
) -> KaizenResult<Vec<Vec<RecordedEntity>>> {
    let mut filtered: Vec<usize> = entities
        .iter()
        .enumerate()
        .filter(|(_, entity)| {
            entity
                .metadata_str("task_description")
                .is_some_and(|td| !td.is_empty())
        })
        .map(|(idx, _)| idx)
        .collect();

    if filtered.len() < 2 {
        return Ok(Vec::new());
    }

    if filtered.len() > MAX_CLUSTER_ENTITIES {
        warn!(
            total = filtered.len(),
            cap = MAX_CLUSTER_ENTITIES,
            "Too many entities for clustering; truncating"
        );
        filtered.truncate(MAX_CLUSTER_ENTITIES);
    }

    let descriptions: Vec<String> = filtered
        .iter()
        .map(|&idx| {
            entities[idx]
                .metadata_str("task_description")
                .unwrap_or_default()
                .to_string()
        })
        .collect();

    let embeddings = embedder.embed_batch(&descriptions).await?;

    // Strict upper triangle of the similarity matrix; providers return
    // unit-normalized vectors so the inner product is the cosine.
    let n = filtered.len();
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if dot(&embeddings[i], &embeddings[j]) >= threshold {
                pairs.push((i, j));
            }
        }
    }

    let clusters = union_find(n, &pairs)
        .into_iter()
        .filter(|group| group.len() >= 2)
        .map(|group| {
            group
                .into_iter()
                .map(|i| entities[filtered[i]].clone())
                .collect()
        })
        .collect();

    Ok(clusters)
}

/// Combine tips from a cluster of related entities into consolidated
/// guidelines. Retries up to 3 times; exhaustion is an error so callers can
/// skip the cluster without touching its originals.
pub async fn combine_cluster(
    model: &dyn CompletionModel,
    model_id: &str,
    entities: &[RecordedEntity],
) -> KaizenResult<Vec<Tip>> {
    let mut task_descriptions: Vec<String> = Vec::new();
    for entity in entities {
        if let Some(td) = entity.metadata_str("task_description") {
            if !td.is_empty() && !task_descriptions.iter().any(|seen| seen == td) {
                task_descriptions.push(td.to_string());
            }
        }
    }

    let tips: Vec<serde_json::Value> = entities
        .iter()
        .map(|entity| {
            json!({
                "content": entity.content.as_search_text(),
                "rationale": entity.metadata_str("rationale").unwrap_or(""),
                "category": entity.metadata_str("category").unwrap_or("strategy"),
                "trigger": entity.metadata_str("trigger").unwrap_or(""),
            })
        })
        .collect();
    let tips_json =
        serde_json::to_string_pretty(&tips).unwrap_or_else(|_| "[]".to_string());

    let constrained = model.supports_response_schema(model_id);
    let prompt = combine_tips_prompt(&task_descriptions, &tips_json, constrained);

    let mut last_error = KaizenError::store("combine_cluster produced no attempts");
    for attempt in 1..=COMBINE_ATTEMPTS {
        let response = model
            .complete(CompletionRequest {
                model: model_id.to_string(),
                prompt: prompt.clone(),
                response_schema: constrained.then(tip_generation_schema),
            })
            .await;

        let result = response.and_then(|content| {
            let cleaned = if constrained {
                content
            } else {
                clean_llm_response(&content)
            };
            serde_json::from_str::<TipGenerationResponse>(&cleaned).map_err(|e| {
                KaizenError::store(format!("Invalid combined tips response: {e}"))
            })
        });

        match result {
            Ok(parsed) => return Ok(parsed.tips),
            Err(error) => {
                warn!(attempt, %error, "combine_cluster attempt failed");
                last_error = error;
            }
        }
    }

    Err(KaizenError::store(format!(
        "Failed to combine cluster tips after {COMBINE_ATTEMPTS} attempts: {last_error}"
    )))
}
