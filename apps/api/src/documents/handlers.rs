//! Axum route handlers for the Document API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::Owner;
use crate::errors::AppError;
use crate::models::{CvDocument, DocumentSummary};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub content: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub expected_version: i64,
    pub content: Value,
}

/// GET /api/v1/cvs
pub async fn handle_list(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    Ok(Json(state.documents.list(owner_id).await?))
}

/// POST /api/v1/cvs
pub async fn handle_create(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CvDocument>), AppError> {
    let doc = state.documents.create(owner_id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// GET /api/v1/cvs/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<CvDocument>, AppError> {
    Ok(Json(state.documents.get(id, owner_id).await?))
}

/// PUT /api/v1/cvs/:id
pub async fn handle_update(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<CvDocument>, AppError> {
    let doc = state
        .documents
        .update(id, owner_id, req.expected_version, &req.content)
        .await?;
    Ok(Json(doc))
}

/// DELETE /api/v1/cvs/:id
///
/// Always 204 for an authenticated caller, whether or not anything matched.
pub async fn handle_delete(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.documents.soft_delete(id, owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
