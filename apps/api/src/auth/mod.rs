pub mod sessions;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

pub use sessions::{InMemorySessionRegistry, RedisSessionRegistry, SessionRegistry};

/// Authenticated owner resolved from the `Authorization: Bearer <token>` header.
///
/// Add this as a handler parameter to require authentication. Every Document Store
/// operation takes its `owner_id` from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized)?;

        let owner_id = state
            .sessions
            .resolve(token)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(Owner(owner_id))
    }
}
