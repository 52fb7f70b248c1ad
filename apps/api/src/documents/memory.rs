use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::store::{DocumentStore, StoreError};
use crate::models::{next_version, CvDocument, DocumentSummary};

#[derive(Default)]
struct Tables {
    documents: HashMap<Uuid, CvDocument>,
    /// Unique index on `(draft_id, owner_id)`.
    by_draft: HashMap<(Uuid, Uuid), Uuid>,
}

/// Process-local `DocumentStore`. Every operation runs under one lock, which gives the same
/// per-record write ordering and draft uniqueness the Postgres backend gets from the database.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    tables: Mutex<Tables>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        // Every mutation is a single map insert, so a poisoned lock still guards whole records.
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(
        tables: &mut Tables,
        owner_id: Uuid,
        draft_id: Option<Uuid>,
        content: &Value,
    ) -> CvDocument {
        let now = Utc::now();
        let doc = CvDocument {
            id: Uuid::new_v4(),
            owner_id,
            draft_id,
            version: next_version(None),
            active: true,
            content: content.clone(),
            created_at: now,
            updated_at: now,
        };
        if let Some(draft_id) = draft_id {
            tables.by_draft.insert((draft_id, owner_id), doc.id);
        }
        tables.documents.insert(doc.id, doc.clone());
        doc
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, owner_id: Uuid, content: &Value) -> Result<CvDocument, StoreError> {
        let doc = Self::insert(&mut self.tables(), owner_id, None, content);
        info!("Created document {} for owner {owner_id}", doc.id);
        Ok(doc)
    }

    async fn create_with_draft_id(
        &self,
        owner_id: Uuid,
        draft_id: Uuid,
        content: &Value,
    ) -> Result<CvDocument, StoreError> {
        let mut tables = self.tables();
        if tables.by_draft.contains_key(&(draft_id, owner_id)) {
            return Err(StoreError::DuplicateDraft);
        }
        let doc = Self::insert(&mut tables, owner_id, Some(draft_id), content);
        info!(
            "Created document {} from draft {draft_id} for owner {owner_id}",
            doc.id
        );
        Ok(doc)
    }

    async fn get(&self, id: Uuid, owner_id: Uuid) -> Result<CvDocument, StoreError> {
        self.tables()
            .documents
            .get(&id)
            .filter(|doc| doc.owner_id == owner_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_draft(
        &self,
        draft_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<CvDocument>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .by_draft
            .get(&(draft_id, owner_id))
            .and_then(|id| tables.documents.get(id))
            .cloned())
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<DocumentSummary>, StoreError> {
        let mut summaries: Vec<DocumentSummary> = self
            .tables()
            .documents
            .values()
            .filter(|doc| doc.owner_id == owner_id && doc.active)
            .map(DocumentSummary::from)
            .collect();
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(summaries)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, StoreError> {
        let mut tables = self.tables();
        let doc = tables
            .documents
            .get_mut(&id)
            .filter(|doc| doc.owner_id == owner_id && doc.active)
            .ok_or(StoreError::NotFound)?;

        if doc.version > expected_version {
            info!(
                "Rejected stale update of document {id}: expected {expected_version}, stored {}",
                doc.version
            );
            return Err(StoreError::VersionConflict {
                current_version: doc.version,
            });
        }

        doc.content = content.clone();
        doc.version = next_version(Some(doc.version));
        doc.updated_at = Utc::now();
        debug!("Updated document {id} to version {}", doc.version);
        Ok(doc.clone())
    }

    async fn soft_delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables();
        match tables
            .documents
            .get_mut(&id)
            .filter(|doc| doc.owner_id == owner_id && doc.active)
        {
            Some(doc) => {
                doc.active = false;
                doc.updated_at = Utc::now();
                debug!("Soft deleted document {id} for owner {owner_id}");
            }
            None => debug!("Soft delete of document {id} for owner {owner_id} matched nothing"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryDocumentStore {
        InMemoryDocumentStore::new()
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_version() {
        let store = store();
        let owner = Uuid::new_v4();
        let doc = store.create(owner, &json!({"name": "Ada"})).await.unwrap();

        assert_eq!(doc.owner_id, owner);
        assert!(doc.active);
        assert!(doc.draft_id.is_none());
        assert!(doc.version > 0);
        assert_eq!(store.get(doc.id, owner).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_get_hides_other_owners_documents() {
        let store = store();
        let doc = store.create(Uuid::new_v4(), &json!({})).await.unwrap();

        let err = store.get(doc.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_create_with_draft_id_rejects_duplicates() {
        let store = store();
        let owner = Uuid::new_v4();
        let draft = Uuid::new_v4();

        store.create_with_draft_id(owner, draft, &json!({})).await.unwrap();
        let err = store
            .create_with_draft_id(owner, draft, &json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDraft));

        // Same draft under a different owner is a different key.
        store
            .create_with_draft_id(Uuid::new_v4(), draft, &json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_successive_updates_strictly_increase_version() {
        let store = store();
        let owner = Uuid::new_v4();
        let mut doc = store.create(owner, &json!({"rev": 0})).await.unwrap();

        for rev in 1..=20 {
            let next = store
                .update(doc.id, owner, doc.version, &json!({ "rev": rev }))
                .await
                .unwrap();
            assert!(next.version > doc.version);
            doc = next;
        }
        assert_eq!(doc.content, json!({"rev": 20}));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts_without_mutating() {
        let store = store();
        let owner = Uuid::new_v4();
        let base = store.create(owner, &json!({"who": "nobody"})).await.unwrap();

        // Two tabs read `base`; tab A writes first.
        let tab_a = store
            .update(base.id, owner, base.version, &json!({"who": "tab A"}))
            .await
            .unwrap();
        let err = store
            .update(base.id, owner, base.version, &json!({"who": "tab B"}))
            .await
            .unwrap_err();

        match err {
            StoreError::VersionConflict { current_version } => {
                assert_eq!(current_version, tab_a.version)
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let stored = store.get(base.id, owner).await.unwrap();
        assert_eq!(stored.content, json!({"who": "tab A"}));
        assert_eq!(stored.version, tab_a.version);
    }

    #[tokio::test]
    async fn test_update_missing_or_foreign_is_not_found() {
        let store = store();
        let owner = Uuid::new_v4();
        let err = store
            .update(Uuid::new_v4(), owner, 0, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));

        let doc = store.create(owner, &json!({})).await.unwrap();
        let err = store
            .update(doc.id, Uuid::new_v4(), doc.version, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_list_but_not_get() {
        let store = store();
        let owner = Uuid::new_v4();
        let keep = store.create(owner, &json!({"k": 1})).await.unwrap();
        let gone = store.create(owner, &json!({"k": 2})).await.unwrap();

        store.soft_delete(gone.id, owner).await.unwrap();
        // Second delete is a no-op.
        store.soft_delete(gone.id, owner).await.unwrap();

        let ids: Vec<Uuid> = store.list(owner).await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![keep.id]);

        let inactive = store.get(gone.id, owner).await.unwrap();
        assert!(!inactive.active);

        // An update cannot bring it back.
        let err = store
            .update(gone.id, owner, inactive.version, &json!({"k": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(!store.get(gone.id, owner).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_soft_delete_of_foreign_document_is_silent() {
        let store = store();
        let owner = Uuid::new_v4();
        let doc = store.create(owner, &json!({})).await.unwrap();

        store.soft_delete(doc.id, Uuid::new_v4()).await.unwrap();
        assert!(store.get(doc.id, owner).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_list_orders_most_recently_updated_first() {
        let store = store();
        let owner = Uuid::new_v4();
        let first = store.create(owner, &json!({"n": 1})).await.unwrap();
        let second = store.create(owner, &json!({"n": 2})).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .update(first.id, owner, first.version, &json!({"n": 11}))
            .await
            .unwrap();

        let ids: Vec<Uuid> = store.list(owner).await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(store.list(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
