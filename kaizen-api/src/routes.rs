//! HTTP routes: namespace and entity CRUD plus a dashboard aggregate.

use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use kaizen_client::KaizenClient;
use kaizen_core::{Entity, KaizenError, Metadata, Policy, RecordedEntity, Tip};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

pub fn router(client: Arc<KaizenClient>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/namespaces", get(list_namespaces).post(add_namespace))
        .route("/namespaces/:namespace_id", delete(delete_namespace))
        .route(
            "/namespaces/:namespace_id/entities",
            get(list_namespace_entities).post(create_namespace_entity),
        )
        .route(
            "/namespaces/:namespace_id/entities/:entity_id",
            delete(delete_namespace_entity),
        )
        .with_state(client)
}

#[derive(Debug, Deserialize)]
struct NamespaceCreateRequest {
    namespace_id: String,
}

#[derive(Debug, Deserialize)]
struct EntityCreateRequest {
    #[serde(rename = "type")]
    entity_type: String,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct EntityListQuery {
    /// Filter entities by type (e.g. guideline, trajectory).
    #[serde(rename = "type")]
    entity_type: Option<String>,
    /// Maximum number of entities to return.
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TypeCount {
    #[serde(rename = "type")]
    entity_type: String,
    count: usize,
}

#[derive(Debug, Serialize)]
struct RecentEntity {
    id: String,
    #[serde(rename = "type")]
    entity_type: String,
    content: String,
    namespace: String,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    health: bool,
    namespace_count: usize,
    total_entities: i64,
    type_breakdown: Vec<TypeCount>,
    recent_entities: Vec<RecentEntity>,
}

fn content_snippet(entity: &RecordedEntity) -> String {
    let text = entity.content.as_search_text();
    if text.chars().count() > 100 {
        let cut: String = text.chars().take(100).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn entity_response(entity: &RecordedEntity) -> Value {
    json!({
        "id": entity.id,
        "type": entity.entity_type,
        "content": entity.content,
        "metadata": entity.metadata,
        "created_at": entity.created_at.to_rfc3339(),
    })
}

/// Typed-metadata validation for entity kinds with a known schema. Returns
/// 422 when the metadata does not match.
fn validate_typed_metadata(
    entity_type: &str,
    content: &str,
    metadata: &Metadata,
) -> ApiResult<()> {
    match entity_type {
        "guideline" => {
            let candidate = json!({
                "content": content,
                "rationale": metadata.get("rationale"),
                "category": metadata.get("category"),
                "trigger": metadata.get("trigger"),
            });
            serde_json::from_value::<Tip>(candidate)
                .map(|_| ())
                .map_err(|e| {
                    ApiError::unprocessable(format!("Invalid guideline metadata schema: {e}"))
                })
        }
        "policy" => {
            let mut candidate = serde_json::Map::new();
            for (key, value) in metadata {
                if key != "content" {
                    candidate.insert(key.clone(), value.clone());
                }
            }
            candidate.insert("content".to_string(), json!(content));
            serde_json::from_value::<Policy>(Value::Object(candidate))
                .map(|_| ())
                .map_err(|e| {
                    ApiError::unprocessable(format!("Invalid policy metadata schema: {e}"))
                })
        }
        _ => Ok(()),
    }
}

async fn get_dashboard(
    State(client): State<Arc<KaizenClient>>,
) -> ApiResult<Json<DashboardResponse>> {
    let health = client.ready().await;

    let namespaces = match client.all_namespaces(1000).await {
        Ok(namespaces) => namespaces,
        Err(e) => {
            error!(%e, "Error fetching namespaces for dashboard");
            Vec::new()
        }
    };

    let mut total_entities: i64 = 0;
    let mut type_breakdown: Vec<TypeCount> = Vec::new();
    let mut recent: Vec<(String, RecordedEntity)> = Vec::new();

    for namespace in &namespaces {
        total_entities += namespace.num_entities.unwrap_or(0);
        // a small sample per namespace is enough for the dashboard
        match client.get_all_entities(&namespace.id, None, 10).await {
            Ok(entities) => {
                for entity in entities {
                    match type_breakdown
                        .iter_mut()
                        .find(|tc| tc.entity_type == entity.entity_type)
                    {
                        Some(tc) => tc.count += 1,
                        None => type_breakdown.push(TypeCount {
                            entity_type: entity.entity_type.clone(),
                            count: 1,
                        }),
                    }
                    recent.push((namespace.id.clone(), entity));
                }
            }
            Err(e) => error!(namespace = %namespace.id, %e, "Error fetching entities"),
        }
    }

    recent.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    let recent_entities = recent
        .into_iter()
        .take(10)
        .map(|(namespace, entity)| RecentEntity {
            id: entity.id.clone(),
            entity_type: entity.entity_type.clone(),
            content: content_snippet(&entity),
            namespace,
            created_at: entity.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(DashboardResponse {
        health,
        namespace_count: namespaces.len(),
        total_entities,
        type_breakdown,
        recent_entities,
    }))
}

async fn list_namespaces(State(client): State<Arc<KaizenClient>>) -> ApiResult<Json<Value>> {
    let namespaces = client.all_namespaces(1000).await?;
    let summaries: Vec<Value> = namespaces
        .iter()
        .map(|ns| {
            json!({
                "id": ns.id,
                "amount_of_entities": ns.num_entities.unwrap_or(0),
            })
        })
        .collect();
    Ok(Json(Value::Array(summaries)))
}

async fn add_namespace(
    State(client): State<Arc<KaizenClient>>,
    Json(request): Json<NamespaceCreateRequest>,
) -> ApiResult<Json<Value>> {
    client.create_namespace(Some(&request.namespace_id)).await?;
    Ok(Json(json!({
        "success": true,
        "namespace_id": request.namespace_id,
    })))
}

/// The two backends disagree on deleting a missing namespace (silent no-op
/// vs. `NamespaceNotFound`); the adapter treats both as success.
async fn delete_namespace(
    State(client): State<Arc<KaizenClient>>,
    Path(namespace_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match client.delete_namespace(&namespace_id).await {
        Ok(()) | Err(KaizenError::NamespaceNotFound(_)) => {
            Ok(Json(json!({"success": true})))
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_namespace_entities(
    State(client): State<Arc<KaizenClient>>,
    Path(namespace_id): Path<String>,
    Query(query): Query<EntityListQuery>,
) -> ApiResult<Json<Value>> {
    let mut filters = Metadata::new();
    if let Some(entity_type) = &query.entity_type {
        filters.insert("type".to_string(), json!(entity_type));
    }
    let filters = (!filters.is_empty()).then_some(filters);

    let mut entities = client
        .get_all_entities(&namespace_id, filters.as_ref(), query.limit.unwrap_or(100))
        .await?;
    entities.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(Value::Array(
        entities.iter().map(entity_response).collect(),
    )))
}

async fn create_namespace_entity(
    State(client): State<Arc<KaizenClient>>,
    Path(namespace_id): Path<String>,
    Json(request): Json<EntityCreateRequest>,
) -> ApiResult<Json<Value>> {
    validate_typed_metadata(&request.entity_type, &request.content, &request.metadata)?;

    let entity = Entity::new(request.entity_type, request.content)
        .with_metadata(request.metadata);
    // direct insert, no conflict resolution
    let updates = client
        .update_entities(&namespace_id, &[entity], false)
        .await?;
    let update = updates
        .first()
        .ok_or_else(|| ApiError::bad_request("Failed to insert entity. No updates returned."))?;

    Ok(Json(json!({"success": true, "id": update.id})))
}

async fn delete_namespace_entity(
    State(client): State<Arc<KaizenClient>>,
    Path((namespace_id, entity_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    client.delete_entity_by_id(&namespace_id, &entity_id).await?;
    Ok(Json(json!({"success": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use kaizen_backend::FilesystemBackend;
    use kaizen_core::{FilesystemSettings, KaizenSettings, LlmSettings};
    use kaizen_llm::{ConflictResolver, MockCompletionModel, MockEmbeddingProvider};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router() -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let completion = Arc::new(MockCompletionModel::new(vec![]));
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
        (router(client), dir)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn namespace_create_and_list_round_trip() {
        let (app, _dir) = test_router();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/namespaces").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body, json!([{"id": "demo", "amount_of_entities": 0}]));
    }

    #[tokio::test]
    async fn duplicate_namespace_create_is_400() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();
        let response = app
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_missing_namespace_is_success() {
        let (app, _dir) = test_router();
        let response = app
            .oneshot(
                Request::delete("/namespaces/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
    }

    #[tokio::test]
    async fn listing_entities_of_missing_namespace_is_404() {
        let (app, _dir) = test_router();
        let response = app
            .oneshot(
                Request::get("/namespaces/ghost/entities")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn guideline_without_tip_metadata_is_422() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/namespaces/demo/entities",
                json!({"type": "guideline", "content": "tip text", "metadata": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn valid_guideline_is_created_and_listed() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/namespaces/demo/entities",
                json!({
                    "type": "guideline",
                    "content": "tip text",
                    "metadata": {
                        "rationale": "why",
                        "category": "strategy",
                        "trigger": "when",
                    },
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));

        let response = app
            .oneshot(
                Request::get("/namespaces/demo/entities?type=guideline")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["content"], json!("tip text"));
    }

    #[tokio::test]
    async fn invalid_policy_metadata_is_422() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/namespaces/demo/entities",
                json!({
                    "type": "policy",
                    "content": "payload",
                    "metadata": {"name": "p", "type": "not-a-policy-type"},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn valid_policy_is_created() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/namespaces/demo/entities",
                json!({
                    "type": "policy",
                    "content": "1. Tag. 2. Ship.",
                    "metadata": {
                        "name": "Release playbook",
                        "type": "playbook",
                        "description": "How to release",
                        "triggers": [{"type": "always"}],
                    },
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dashboard_aggregates_counts() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/namespaces/demo/entities",
                json!({"type": "note", "content": "hello"}),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["health"], json!(true));
        assert_eq!(body["namespace_count"], json!(1));
        assert_eq!(body["total_entities"], json!(1));
        assert_eq!(body["type_breakdown"], json!([{"type": "note", "count": 1}]));
        assert_eq!(body["recent_entities"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_entity_is_400() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(json_request("POST", "/namespaces", json!({"namespace_id": "demo"})))
            .await
            .unwrap();
        let response = app
            .oneshot(
                Request::delete("/namespaces/demo/entities/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
