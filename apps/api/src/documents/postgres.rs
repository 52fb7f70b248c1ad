use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::store::{DocumentStore, StoreError};
use crate::models::{CvDocument, DocumentSummary};

/// Name of the unique constraint on `(draft_id, owner_id)`; see `migrations/`.
const DRAFT_OWNER_CONSTRAINT: &str = "cv_documents_draft_owner_key";

/// `DocumentStore` backed by the `cv_documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        owner_id: Uuid,
        draft_id: Option<Uuid>,
        content: &Value,
    ) -> Result<CvDocument, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CvDocument>(
            r#"
            INSERT INTO cv_documents (id, owner_id, draft_id, version, active, content)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(draft_id)
        .bind(Utc::now().timestamp_millis())
        .bind(content)
        .fetch_one(&self.pool)
        .await
    }
}

fn is_draft_owner_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                && db_err
                    .constraint()
                    .map_or(true, |name| name == DRAFT_OWNER_CONSTRAINT)
        }
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create(&self, owner_id: Uuid, content: &Value) -> Result<CvDocument, StoreError> {
        let doc = self.insert(owner_id, None, content).await?;
        info!("Created document {} for owner {owner_id}", doc.id);
        Ok(doc)
    }

    async fn create_with_draft_id(
        &self,
        owner_id: Uuid,
        draft_id: Uuid,
        content: &Value,
    ) -> Result<CvDocument, StoreError> {
        match self.insert(owner_id, Some(draft_id), content).await {
            Ok(doc) => {
                info!(
                    "Created document {} from draft {draft_id} for owner {owner_id}",
                    doc.id
                );
                Ok(doc)
            }
            Err(e) if is_draft_owner_violation(&e) => Err(StoreError::DuplicateDraft),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid, owner_id: Uuid) -> Result<CvDocument, StoreError> {
        sqlx::query_as::<_, CvDocument>(
            "SELECT * FROM cv_documents WHERE id = $1 AND owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn find_by_draft(
        &self,
        draft_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<CvDocument>, StoreError> {
        Ok(sqlx::query_as::<_, CvDocument>(
            "SELECT * FROM cv_documents WHERE draft_id = $1 AND owner_id = $2",
        )
        .bind(draft_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<DocumentSummary>, StoreError> {
        Ok(sqlx::query_as::<_, DocumentSummary>(
            r#"
            SELECT id, draft_id, version, created_at, updated_at
            FROM cv_documents
            WHERE owner_id = $1 AND active
            ORDER BY updated_at DESC, version DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, StoreError> {
        // The row lock taken by UPDATE serializes writers; the version check and the bump
        // happen in the same statement.
        let updated = sqlx::query_as::<_, CvDocument>(
            r#"
            UPDATE cv_documents
            SET content = $1,
                version = GREATEST($2, version + 1),
                updated_at = now()
            WHERE id = $3 AND owner_id = $4 AND active AND version <= $5
            RETURNING *
            "#,
        )
        .bind(content)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(owner_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(doc) = updated {
            debug!("Updated document {id} to version {}", doc.version);
            return Ok(doc);
        }

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM cv_documents WHERE id = $1 AND owner_id = $2 AND active",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match current {
            Some(current_version) => {
                info!(
                    "Rejected stale update of document {id}: expected {expected_version}, stored {current_version}"
                );
                Err(StoreError::VersionConflict { current_version })
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn soft_delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE cv_documents SET active = FALSE, updated_at = now() WHERE id = $1 AND owner_id = $2 AND active",
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        debug!(
            "Soft delete of document {id} for owner {owner_id} affected {} row(s)",
            result.rows_affected()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncCoordinator;
    use serde_json::json;
    use std::sync::Arc;

    // These need a disposable database: `DATABASE_URL=... cargo test -- --ignored`.

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_stale_update_conflicts_and_versions_increase(pool: PgPool) {
        let store = PgDocumentStore::new(pool);
        let owner = Uuid::new_v4();
        let base = store.create(owner, &json!({"who": "nobody"})).await.unwrap();

        let tab_a = store
            .update(base.id, owner, base.version, &json!({"who": "tab A"}))
            .await
            .unwrap();
        assert!(tab_a.version > base.version);

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
        assert_eq!(
            store.get(base.id, owner).await.unwrap().content,
            json!({"who": "tab A"})
        );

        // Back-to-back writes within one millisecond still move forward.
        let mut doc = tab_a;
        for rev in 0..5 {
            let next = store
                .update(doc.id, owner, doc.version, &json!({ "rev": rev }))
                .await
                .unwrap();
            assert!(next.version > doc.version);
            doc = next;
        }
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_duplicate_draft_maps_to_store_error(pool: PgPool) {
        let store = PgDocumentStore::new(pool);
        let owner = Uuid::new_v4();
        let draft = Uuid::new_v4();

        store.create_with_draft_id(owner, draft, &json!({})).await.unwrap();
        let err = store
            .create_with_draft_id(owner, draft, &json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDraft));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_promotions_yield_one_row(pool: PgPool) {
        let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
        let coordinator = SyncCoordinator::new(store.clone());
        let owner = Uuid::new_v4();
        let draft = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .promote(draft, owner, &json!({ "tab": n }))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().document.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list(owner).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_soft_deleted_document_cannot_be_updated(pool: PgPool) {
        let store = PgDocumentStore::new(pool);
        let owner = Uuid::new_v4();
        let doc = store.create(owner, &json!({})).await.unwrap();

        store.soft_delete(doc.id, Uuid::new_v4()).await.unwrap();
        assert!(store.get(doc.id, owner).await.unwrap().active);

        store.soft_delete(doc.id, owner).await.unwrap();
        let err = store
            .update(doc.id, owner, doc.version, &json!({"back": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.list(owner).await.unwrap().is_empty());
        assert!(!store.get(doc.id, owner).await.unwrap().active);
    }
}
