//! Document Store: the durable, owner-scoped record of CVs.
//!
//! Every record carries a monotonically increasing `version` (wall-clock milliseconds at the
//! time of the write) that doubles as the optimistic-concurrency token for `update`.
//!
//! `AppState` holds an `Arc<dyn DocumentStore>`, chosen at startup via `STORAGE_BACKEND`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CvDocument, DocumentSummary};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The id does not exist or belongs to another owner. Both cases look the same.
    #[error("document not found")]
    NotFound,

    #[error("version conflict: stored version is {current_version}")]
    VersionConflict { current_version: i64 },

    /// `(draft_id, owner_id)` already has a durable document.
    #[error("a document already exists for this draft")]
    DuplicateDraft,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage backend for CV documents.
///
/// All reads and writes are scoped to `owner_id`; another owner's record is never returned,
/// mutated, or distinguished from a missing one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Unconditional insert with `version = now()` and `active = true`.
    async fn create(&self, owner_id: Uuid, content: &Value) -> Result<CvDocument, StoreError>;

    /// Insert carrying a draft id. Fails with `DuplicateDraft` when `(draft_id, owner_id)` is
    /// already taken; the uniqueness check is enforced by the backend itself.
    async fn create_with_draft_id(
        &self,
        owner_id: Uuid,
        draft_id: Uuid,
        content: &Value,
    ) -> Result<CvDocument, StoreError>;

    /// Owner-scoped read. Soft-deleted records are returned with `active = false`.
    async fn get(&self, id: Uuid, owner_id: Uuid) -> Result<CvDocument, StoreError>;

    /// The durable document promoted from `draft_id`, active or not.
    async fn find_by_draft(
        &self,
        draft_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<CvDocument>, StoreError>;

    /// Active documents only, most recently updated first.
    async fn list(&self, owner_id: Uuid) -> Result<Vec<DocumentSummary>, StoreError>;

    /// Optimistic-concurrency write.
    ///
    /// - `NotFound` when no active record with `id` is owned by `owner_id`. Falling back to
    ///   `create` is the caller's decision.
    /// - `VersionConflict` when the stored version is greater than `expected_version`; the
    ///   stored content is left untouched.
    /// - Otherwise the content is replaced and the version bumped past the stored one.
    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, StoreError>;

    /// Sets `active = false`. Idempotent, and silent when nothing matched.
    async fn soft_delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError>;
}
