//! Access to the Document Store and Sync Coordinator from an editing client.
//!
//! `HttpRemote` talks to the `/api/v1/cvs` endpoints; `InProcessRemote` calls a store and
//! coordinator directly. Both report failures in the same [`SyncError`] taxonomy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::client::storage::StorageError;
use crate::documents::{DocumentStore, StoreError};
use crate::models::CvDocument;
use crate::sync::{Promotion, SyncCoordinator};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("document not found")]
    NotFound,

    #[error("version conflict: stored version is {current_version}")]
    VersionConflict { current_version: i64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("local storage failure: {0}")]
    LocalStorage(#[from] StorageError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SyncError::NotFound,
            StoreError::VersionConflict { current_version } => {
                SyncError::VersionConflict { current_version }
            }
            other => SyncError::Transient(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}

/// The durable operations an editor needs, on behalf of one authenticated owner.
#[async_trait]
pub trait RemoteDocuments: Send + Sync {
    async fn promote(&self, draft_id: Uuid, content: &Value) -> Result<Promotion, SyncError>;
    async fn create(&self, content: &Value) -> Result<CvDocument, SyncError>;
    async fn fetch(&self, id: Uuid) -> Result<CvDocument, SyncError>;
    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, SyncError>;
}

/// Calls straight into a store and coordinator, as `owner_id` (or nobody).
pub struct InProcessRemote {
    store: Arc<dyn DocumentStore>,
    coordinator: SyncCoordinator,
    owner_id: Option<Uuid>,
}

impl InProcessRemote {
    pub fn new(store: Arc<dyn DocumentStore>, owner_id: Option<Uuid>) -> Self {
        Self {
            coordinator: SyncCoordinator::new(store.clone()),
            store,
            owner_id,
        }
    }

    fn owner(&self) -> Result<Uuid, SyncError> {
        self.owner_id.ok_or(SyncError::NotAuthenticated)
    }
}

#[async_trait]
impl RemoteDocuments for InProcessRemote {
    async fn promote(&self, draft_id: Uuid, content: &Value) -> Result<Promotion, SyncError> {
        Ok(self
            .coordinator
            .promote(draft_id, self.owner()?, content)
            .await?)
    }

    async fn create(&self, content: &Value) -> Result<CvDocument, SyncError> {
        Ok(self.store.create(self.owner()?, content).await?)
    }

    async fn fetch(&self, id: Uuid) -> Result<CvDocument, SyncError> {
        Ok(self.store.get(id, self.owner()?).await?)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, SyncError> {
        Ok(self
            .store
            .update(id, self.owner()?, expected_version, content)
            .await?)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    current_version: Option<i64>,
}

/// Client for the `/api/v1/cvs` endpoints.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/cvs{path}", self.base_url)
    }

    fn authorized(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        let token = self.token.as_deref().ok_or(SyncError::NotAuthenticated)?;
        Ok(req.bearer_auth(token))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.json::<ErrorEnvelope>().await.ok();
        debug!(
            "Request failed with {status}: {:?}",
            body.as_ref().map(|b| &b.error.code)
        );
        Err(match status {
            StatusCode::UNAUTHORIZED => SyncError::NotAuthenticated,
            StatusCode::NOT_FOUND => SyncError::NotFound,
            StatusCode::CONFLICT => match body.and_then(|b| b.error.current_version) {
                Some(current_version) => SyncError::VersionConflict { current_version },
                None => SyncError::Transient("conflict response without a version".to_string()),
            },
            _ => SyncError::Transient(match body {
                Some(b) => format!("{status}: {}", b.error.message),
                None => status.to_string(),
            }),
        })
    }
}

#[async_trait]
impl RemoteDocuments for HttpRemote {
    async fn promote(&self, draft_id: Uuid, content: &Value) -> Result<Promotion, SyncError> {
        let req = self
            .authorized(self.client.post(self.url("/promote")))?
            .json(&json!({ "draft_id": draft_id, "content": content }));
        Self::decode(req.send().await?).await
    }

    async fn create(&self, content: &Value) -> Result<CvDocument, SyncError> {
        let req = self
            .authorized(self.client.post(self.url("")))?
            .json(&json!({ "content": content }));
        Self::decode(req.send().await?).await
    }

    async fn fetch(&self, id: Uuid) -> Result<CvDocument, SyncError> {
        let req = self.authorized(self.client.get(self.url(&format!("/{id}"))))?;
        Self::decode(req.send().await?).await
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        content: &Value,
    ) -> Result<CvDocument, SyncError> {
        let req = self
            .authorized(self.client.put(self.url(&format!("/{id}"))))?
            .json(&json!({ "expected_version": expected_version, "content": content }));
        Self::decode(req.send().await?).await
    }
}
