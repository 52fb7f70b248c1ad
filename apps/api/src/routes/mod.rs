pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::documents::handlers;
use crate::state::AppState;
use crate::sync::handlers::handle_promote;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/cvs",
            get(handlers::handle_list).post(handlers::handle_create),
        )
        .route("/api/v1/cvs/promote", post(handle_promote))
        .route(
            "/api/v1/cvs/:id",
            get(handlers::handle_get)
                .put(handlers::handle_update)
                .delete(handlers::handle_delete),
        )
        .with_state(state)
}
