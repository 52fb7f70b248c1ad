//! Sync Coordinator: promotes a local draft into the Document Store exactly once.
//!
//! Promotion is keyed by `(draft_id, owner_id)`. Retries and concurrent promotions from
//! several tabs or processes all resolve to the same durable document. The only point of
//! serialization is the store's uniqueness constraint; there is no application-level lock.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::{DocumentStore, StoreError};
use crate::models::CvDocument;

/// Result of a promotion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub document: CvDocument,
    /// `true` when the document existed before this call (retry or lost race).
    pub already_exists: bool,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn DocumentStore>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn promote(
        &self,
        draft_id: Uuid,
        owner_id: Uuid,
        content: &Value,
    ) -> Result<Promotion, StoreError> {
        // 1. Fast path: already promoted.
        if let Some(document) = self.store.find_by_draft(draft_id, owner_id).await? {
            debug!(
                "Draft {draft_id} already promoted to document {}",
                document.id
            );
            return Ok(Promotion {
                document,
                already_exists: true,
            });
        }

        // 2. Insert; the store enforces uniqueness of (draft_id, owner_id).
        match self
            .store
            .create_with_draft_id(owner_id, draft_id, content)
            .await
        {
            Ok(document) => {
                info!(
                    "Promoted draft {draft_id} to document {} for owner {owner_id}",
                    document.id
                );
                Ok(Promotion {
                    document,
                    already_exists: false,
                })
            }
            // 3. A concurrent promotion won the insert. Return its record.
            Err(StoreError::DuplicateDraft) => {
                info!("Promotion race on draft {draft_id}; returning the winning document");
                let document = self
                    .store
                    .find_by_draft(draft_id, owner_id)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                Ok(Promotion {
                    document,
                    already_exists: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}
