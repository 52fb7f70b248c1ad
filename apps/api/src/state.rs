use std::sync::Arc;

use crate::auth::SessionRegistry;
use crate::documents::DocumentStore;
use crate::sync::SyncCoordinator;

/// Shared application state injected into all route handlers via Axum extractors.
///
/// Every process-wide store is created once at startup and owned here, so a backend can be
/// swapped without touching handlers.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<dyn DocumentStore>,
    pub coordinator: SyncCoordinator,
    pub sessions: Arc<dyn SessionRegistry>,
}

impl AppState {
    pub fn new(documents: Arc<dyn DocumentStore>, sessions: Arc<dyn SessionRegistry>) -> Self {
        Self {
            coordinator: SyncCoordinator::new(documents.clone()),
            documents,
            sessions,
        }
    }
}
