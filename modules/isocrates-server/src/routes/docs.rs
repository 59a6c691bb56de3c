//! Document CRUD, batch operations, and dependency inspection (spec §6).
//! Every handler here is a thin translation layer: all invariants (ID
//! generation, optimistic locking, dependency derivation, orphan safety)
//! live in `isocrates_store::ContentStore` and are never reimplemented.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use isocrates_common::{AuthorType, Error};
use isocrates_store::{generate_document_id, DocumentUpdate, DocumentWrite};
use serde::Deserialize;
use tracing::warn;

use crate::AppState;

#[derive(Deserialize)]
pub struct DocumentCreateRequest {
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub doc_type: Option<String>,
    #[serde(default)]
    pub path: String,
    pub title: String,
    pub content: String,
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Deserialize)]
pub struct DocumentUpdateRequest {
    pub content: String,
    pub description: Option<String>,
    pub version: Option<i32>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    pub limit: Option<i64>,
    pub path_prefix: Option<String>,
    pub repo_url: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateIdRequest {
    pub repo_url: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub title: String,
    pub doc_type: Option<String>,
}

#[derive(Deserialize)]
pub struct BatchOperationRequest {
    pub operation: String,
    pub doc_ids: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Requests that reach this crate over HTTP are attributed to a human
/// operator — generation-time writes go through `ContentStore` directly
/// from the pipeline, tagged `AuthorType::Ai`, and never pass through here.
const API_AUTHOR: AuthorType = AuthorType::Human;

fn err_to_response(e: anyhow::Error) -> axum::response::Response {
    match e.downcast_ref::<Error>() {
        Some(Error::NotFound(id)) => (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": format!("document not found: {id}")}))).into_response(),
        Some(Error::Conflict { doc_id }) => {
            (StatusCode::CONFLICT, Json(serde_json::json!({"error": format!("version conflict on {doc_id}")}))).into_response()
        }
        _ => {
            warn!(error = %e, "unhandled document-store error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn create_document(State(state): State<Arc<AppState>>, Json(body): Json<DocumentCreateRequest>) -> impl IntoResponse {
    let write = DocumentWrite {
        repo_url: body.repo_url,
        repo_name: body.repo_name,
        doc_type: body.doc_type,
        path: body.path,
        title: body.title,
        content: body.content,
        description: body.description,
        keywords: body.keywords,
        author_type: API_AUTHOR,
        author_metadata: serde_json::json!({}),
    };

    match state.store.create_or_update(write).await {
        Ok((doc, created)) => {
            let status = if created { StatusCode::CREATED } else { StatusCode::OK };
            (status, Json(doc)).into_response()
        }
        Err(e) => err_to_response(e),
    }
}

pub async fn list_documents(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(100).clamp(1, 500);
    match state.store.list(q.path_prefix.as_deref(), q.repo_url.as_deref(), q.skip, limit).await {
        Ok(docs) => Json(docs).into_response(),
        Err(e) => err_to_response(e),
    }
}

pub async fn get_document(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get(&id).await {
        Ok(Some(doc)) => Json(doc).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => err_to_response(e),
    }
}

pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DocumentUpdateRequest>,
) -> impl IntoResponse {
    let update = DocumentUpdate {
        content: body.content,
        description: body.description,
        version: body.version,
        author_type: API_AUTHOR,
        author_metadata: serde_json::json!({}),
    };
    match state.store.update(&id, update).await {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => err_to_response(e),
    }
}

pub async fn delete_document(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.delete(&id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => err_to_response(e),
    }
}

pub async fn list_versions(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.versions(&id).await {
        Ok(versions) => Json(versions).into_response(),
        Err(e) => err_to_response(e),
    }
}

pub async fn get_dependencies(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let outgoing = state.store.dependencies_outgoing(&id).await;
    let incoming = state.store.dependencies_incoming(&id).await;
    match (outgoing, incoming) {
        (Ok(outgoing), Ok(incoming)) => Json(serde_json::json!({"outgoing": outgoing, "incoming": incoming})).into_response(),
        (Err(e), _) | (_, Err(e)) => err_to_response(e),
    }
}

pub async fn generate_id(Json(body): Json<GenerateIdRequest>) -> impl IntoResponse {
    let id = generate_document_id(body.repo_url.as_deref(), &body.path, &body.title, body.doc_type.as_deref());
    Json(serde_json::json!({"id": id}))
}

/// Always returns 200 — partial failures are reported per-document, never
/// surfaced as a request-level error (spec §6).
pub async fn batch_operation(State(state): State<Arc<AppState>>, Json(body): Json<BatchOperationRequest>) -> impl IntoResponse {
    let mut results = Vec::with_capacity(body.doc_ids.len());

    for doc_id in &body.doc_ids {
        let outcome = match body.operation.as_str() {
            "delete" => state.store.delete(doc_id).await.map(|_| ()),
            "move" => {
                let Some(target) = body.params.get("target_path").and_then(|v| v.as_str()) else {
                    results.push(serde_json::json!({"doc_id": doc_id, "success": false, "error": "missing params.target_path"}));
                    continue;
                };
                state.store.move_document(doc_id, target).await.map(|_| ())
            }
            "add_keywords" => apply_keyword_delta(&state, doc_id, &body.params, true).await,
            "remove_keywords" => apply_keyword_delta(&state, doc_id, &body.params, false).await,
            other => {
                results.push(serde_json::json!({"doc_id": doc_id, "success": false, "error": format!("unknown operation '{other}'")}));
                continue;
            }
        };

        match outcome {
            Ok(()) => results.push(serde_json::json!({"doc_id": doc_id, "success": true})),
            Err(e) => results.push(serde_json::json!({"doc_id": doc_id, "success": false, "error": e.to_string()})),
        }
    }

    Json(serde_json::json!({"results": results})).into_response()
}

async fn apply_keyword_delta(state: &AppState, doc_id: &str, params: &serde_json::Value, add: bool) -> anyhow::Result<()> {
    let delta: Vec<String> = params
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let doc = state.store.get(doc_id).await?.ok_or_else(|| Error::NotFound(doc_id.to_string()))?;
    let mut keywords = doc.keywords;
    if add {
        for k in delta {
            if !keywords.contains(&k) {
                keywords.push(k);
            }
        }
    } else {
        keywords.retain(|k| !delta.contains(k));
    }

    state.store.update_keywords(doc_id, &keywords).await?;
    Ok(())
}
