use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::Owner;
use crate::errors::AppError;
use crate::state::AppState;
use crate::sync::Promotion;

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub draft_id: Uuid,
    pub content: Value,
}

/// POST /api/v1/cvs/promote
///
/// 201 when this call created the document, 200 when it already existed.
pub async fn handle_promote(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Json(req): Json<PromoteRequest>,
) -> Result<(StatusCode, Json<Promotion>), AppError> {
    let promotion = state
        .coordinator
        .promote(req.draft_id, owner_id, &req.content)
        .await?;
    let status = if promotion.already_exists {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(promotion)))
}
