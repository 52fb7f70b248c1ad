//! Editor session: one browsing context editing one CV.
//!
//! While the CV is a local draft, every edit is written to the Local Draft Store and the
//! debounced autosave only reaches the server once an account is attached. The first
//! durable save promotes the draft by its id; after that the session writes through
//! optimistic-concurrency updates and the local draft is cleared.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::client::autosave::{AutosaveConfig, AutosaveScheduler, SaveHandler};
use crate::client::bus::BusMessage;
use crate::client::local_store::{LocalDraft, LocalDraftStore};
use crate::client::remote::{RemoteDocuments, SyncError};
use crate::models::CvDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not yet durable; lives in the Local Draft Store.
    LocalOnly,
    Synced { document_id: Uuid, version: i64 },
    /// Another context wrote first. Saves are refused until `reload_latest`.
    Conflict {
        document_id: Uuid,
        base_version: i64,
        current_version: i64,
    },
}

/// What a sibling tab's message meant for this session.
#[derive(Debug, Clone, PartialEq)]
pub enum SiblingEvent {
    Ignored,
    /// The shared local draft changed; carries the re-read draft.
    DraftChanged(LocalDraft),
    DraftCleared,
    /// A sibling promoted this session's draft; the session now edits that document.
    Promoted(CvDocument),
    /// A sibling saved a newer version of the document being edited.
    RemoteNewer(CvDocument),
}

#[derive(Debug, Clone, Copy)]
struct Durable {
    document_id: Uuid,
    version: i64,
}

struct Shared {
    durable: Option<Durable>,
    conflict: Option<i64>,
    draft_id: Option<Uuid>,
    /// Draft id dropped by a sibling's clear, kept to recognise its promotion.
    cleared_draft_id: Option<Uuid>,
}

/// The autosave target, shared with the scheduler.
struct SyncTarget {
    local: LocalDraftStore,
    remote: RwLock<Option<Arc<dyn RemoteDocuments>>>,
    shared: Mutex<Shared>,
}

impl SyncTarget {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remote(&self) -> Option<Arc<dyn RemoteDocuments>> {
        self.remote
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn draft_id(&self) -> Result<Uuid, SyncError> {
        if let Some(id) = self.shared().draft_id {
            return Ok(id);
        }
        let id = self.local.get_or_create_draft_id()?;
        self.shared().draft_id = Some(id);
        Ok(id)
    }

    fn adopt(&self, doc: &CvDocument) {
        let mut shared = self.shared();
        shared.durable = Some(Durable {
            document_id: doc.id,
            version: doc.version,
        });
        shared.conflict = None;
    }

    fn record_conflict(&self, current_version: i64) -> SyncError {
        self.shared().conflict = Some(current_version);
        SyncError::VersionConflict { current_version }
    }

    fn status(&self) -> SyncStatus {
        let shared = self.shared();
        match (shared.durable, shared.conflict) {
            (None, _) => SyncStatus::LocalOnly,
            (Some(d), None) => SyncStatus::Synced {
                document_id: d.document_id,
                version: d.version,
            },
            (Some(d), Some(current_version)) => SyncStatus::Conflict {
                document_id: d.document_id,
                base_version: d.version,
                current_version,
            },
        }
    }

    async fn promote(
        &self,
        remote: &dyn RemoteDocuments,
        content: &Value,
    ) -> Result<(), SyncError> {
        let draft_id = self.draft_id()?;
        let promotion = remote.promote(draft_id, content).await?;
        let mut doc = promotion.document;

        // Someone else promoted this draft first. Their content may be older than ours, and
        // the document may have been deleted since.
        if promotion.already_exists && (!doc.active || doc.content != *content) {
            let written = if doc.active {
                remote.update(doc.id, doc.version, content).await
            } else {
                Err(SyncError::NotFound)
            };
            match written {
                Ok(updated) => doc = updated,
                Err(SyncError::NotFound) => {
                    warn!(
                        "Draft {draft_id} was promoted to document {}, which is gone; saving as a new document",
                        doc.id
                    );
                    doc = remote.create(content).await?;
                }
                Err(SyncError::VersionConflict { current_version }) => {
                    self.adopt(&doc);
                    return Err(self.record_conflict(current_version));
                }
                Err(e) => return Err(e),
            }
        }

        self.adopt(&doc);
        self.local.clear()?;
        self.local.bus().publish(BusMessage::SyncSuccess(doc.id));
        info!("Draft {draft_id} is now document {}", doc.id);
        Ok(())
    }

    async fn update(
        &self,
        remote: &dyn RemoteDocuments,
        durable: Durable,
        content: &Value,
    ) -> Result<(), SyncError> {
        let doc = match remote
            .update(durable.document_id, durable.version, content)
            .await
        {
            Ok(doc) => doc,
            Err(SyncError::NotFound) => {
                // Deleted or never written under this account: first-write case.
                warn!(
                    "Document {} is gone; saving as a new document",
                    durable.document_id
                );
                remote.create(content).await?
            }
            Err(SyncError::VersionConflict { current_version }) => {
                info!(
                    "Document {} changed elsewhere (ours {}, stored {current_version})",
                    durable.document_id, durable.version
                );
                return Err(self.record_conflict(current_version));
            }
            Err(e) => return Err(e),
        };

        self.adopt(&doc);
        self.local.bus().publish(BusMessage::SyncSuccess(doc.id));
        debug!("Document {} saved at version {}", doc.id, doc.version);
        Ok(())
    }
}

#[async_trait]
impl SaveHandler for SyncTarget {
    async fn save(&self, content: &Value) -> Result<(), SyncError> {
        let Some(remote) = self.remote() else {
            trace!("No account attached; draft stays local");
            return Ok(());
        };

        let (durable, conflict) = {
            let shared = self.shared();
            (shared.durable, shared.conflict)
        };
        if let Some(current_version) = conflict {
            return Err(SyncError::VersionConflict { current_version });
        }

        match durable {
            None => self.promote(remote.as_ref(), content).await,
            Some(durable) => self.update(remote.as_ref(), durable, content).await,
        }
    }
}

pub struct EditorSession {
    target: Arc<SyncTarget>,
    scheduler: AutosaveScheduler,
}

impl EditorSession {
    /// An anonymous session; edits stay local until [`attach_account`](Self::attach_account).
    pub fn new(local: LocalDraftStore, config: AutosaveConfig) -> Self {
        let target = Arc::new(SyncTarget {
            local,
            remote: RwLock::new(None),
            shared: Mutex::new(Shared {
                durable: None,
                conflict: None,
                draft_id: None,
                cleared_draft_id: None,
            }),
        });
        let scheduler = AutosaveScheduler::new(target.clone(), config);
        Self { target, scheduler }
    }

    pub fn with_remote(
        local: LocalDraftStore,
        remote: Arc<dyn RemoteDocuments>,
        config: AutosaveConfig,
    ) -> Self {
        let session = Self::new(local, config);
        session.set_remote(remote);
        session
    }

    fn set_remote(&self, remote: Arc<dyn RemoteDocuments>) {
        *self
            .target
            .remote
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(remote);
    }

    /// Restores the local draft after a reload and schedules it for syncing.
    pub fn resume(&self) -> Result<Option<LocalDraft>, SyncError> {
        let draft = self.target.local.load()?;
        if let Some(draft) = &draft {
            self.target.shared().draft_id = Some(draft.draft_id);
            self.scheduler.notify_change(&draft.content);
        }
        Ok(draft)
    }

    /// Starts editing an existing durable document.
    pub fn open_document(&self, doc: &CvDocument) {
        self.target.adopt(doc);
        self.scheduler.mark_saved(&doc.content);
    }

    /// Records an edit. Synchronous; the durable save happens later.
    pub fn edit(&self, content: &Value) -> Result<(), SyncError> {
        if self.target.shared().durable.is_none() {
            let draft_id = self.target.draft_id()?;
            self.target.local.save(content, draft_id)?;
        }
        self.scheduler.notify_change(content);
        Ok(())
    }

    /// Associates the session with an account and promotes the local draft right away.
    pub async fn attach_account(
        &self,
        remote: Arc<dyn RemoteDocuments>,
    ) -> Result<SyncStatus, SyncError> {
        self.set_remote(remote);
        // Earlier local-only autosaves count as unsaved from the server's point of view.
        self.scheduler.reset_baseline();
        if let Some(draft) = self.resume()? {
            debug!("Promoting local draft {} after sign-in", draft.draft_id);
        }
        self.scheduler.flush().await?;
        Ok(self.status())
    }

    /// Manual save. Errors are returned, unlike autosave.
    pub async fn save_now(&self) -> Result<(), SyncError> {
        self.scheduler.flush().await
    }

    /// Replaces this session's view with the stored document, dropping the conflict.
    /// The caller decides what to do with its unsaved edits.
    pub async fn reload_latest(&self) -> Result<CvDocument, SyncError> {
        let remote = self.target.remote().ok_or(SyncError::NotAuthenticated)?;
        let durable = self.target.shared().durable.ok_or(SyncError::NotFound)?;
        let doc = remote.fetch(durable.document_id).await?;
        self.target.adopt(&doc);
        self.scheduler.mark_saved(&doc.content);
        info!("Reloaded document {} at version {}", doc.id, doc.version);
        Ok(doc)
    }

    /// Reacts to a sibling tab. The payload is only a hint: state is re-read from the Local
    /// Draft Store or the Document Store.
    pub async fn handle_sibling_message(
        &self,
        message: BusMessage,
    ) -> Result<SiblingEvent, SyncError> {
        let (durable, draft_id) = {
            let shared = self.target.shared();
            (shared.durable, shared.draft_id.or(shared.cleared_draft_id))
        };

        match (message, durable) {
            (BusMessage::StorageUpdate(_), None) => Ok(match self.target.local.load()? {
                Some(draft) => SiblingEvent::DraftChanged(draft),
                None => SiblingEvent::Ignored,
            }),
            (BusMessage::StorageClear, None) => {
                if self.target.local.load()?.is_some() {
                    return Ok(SiblingEvent::Ignored);
                }
                // The profile's draft id is gone too; the next edit starts a new draft.
                let mut shared = self.target.shared();
                if let Some(id) = shared.draft_id.take() {
                    shared.cleared_draft_id = Some(id);
                }
                Ok(SiblingEvent::DraftCleared)
            }
            (BusMessage::SyncSuccess(id), durable) => {
                let Some(remote) = self.target.remote() else {
                    return Ok(SiblingEvent::Ignored);
                };
                match durable {
                    None => {
                        let doc = match remote.fetch(id).await {
                            Ok(doc) => doc,
                            Err(SyncError::NotFound) => return Ok(SiblingEvent::Ignored),
                            Err(e) => return Err(e),
                        };
                        if draft_id.is_some() && doc.draft_id == draft_id {
                            self.target.adopt(&doc);
                            self.scheduler.mark_saved(&doc.content);
                            info!("Sibling promoted our draft to document {}", doc.id);
                            Ok(SiblingEvent::Promoted(doc))
                        } else {
                            Ok(SiblingEvent::Ignored)
                        }
                    }
                    Some(d) if d.document_id == id => {
                        let doc = remote.fetch(id).await?;
                        if doc.version > d.version {
                            Ok(SiblingEvent::RemoteNewer(doc))
                        } else {
                            Ok(SiblingEvent::Ignored)
                        }
                    }
                    Some(_) => Ok(SiblingEvent::Ignored),
                }
            }
            _ => Ok(SiblingEvent::Ignored),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.target.status()
    }

    pub fn document_id(&self) -> Option<Uuid> {
        self.target.shared().durable.map(|d| d.document_id)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.scheduler.has_unsaved_changes()
    }
}
