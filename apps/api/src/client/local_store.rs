//! Local Draft Store: the single in-progress, not yet synced CV of a browser profile.
//!
//! The draft and its identifier live under private keys of a [`DraftStorage`]. Every
//! `save` and `clear` is announced on the broadcast bus. No network I/O happens here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::bus::{BroadcastBus, BusMessage};
use crate::client::storage::{DraftStorage, StorageError};
use crate::models::next_version;

const DRAFT_KEY: &str = "cv_sync.draft";
const DRAFT_ID_KEY: &str = "cv_sync.draft_id";

/// A CV that only exists locally. It has no durable id and no owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDraft {
    pub draft_id: Uuid,
    pub version: i64,
    pub content: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocalDraftStore {
    storage: Arc<dyn DraftStorage>,
    bus: BroadcastBus,
}

impl LocalDraftStore {
    pub fn new(storage: Arc<dyn DraftStorage>, bus: BroadcastBus) -> Self {
        Self { storage, bus }
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    /// Returns the profile's draft id, creating and persisting one on first use.
    pub fn get_or_create_draft_id(&self) -> Result<Uuid, StorageError> {
        if let Some(raw) = self.storage.get(DRAFT_ID_KEY)? {
            match Uuid::parse_str(raw.trim()) {
                Ok(id) => return Ok(id),
                Err(e) => warn!("Replacing unreadable draft id: {e}"),
            }
        }
        let id = Uuid::new_v4();
        self.storage.set(DRAFT_ID_KEY, &id.to_string())?;
        debug!("Created draft id {id}");
        Ok(id)
    }

    /// Stamps `content` with a fresh version and persists it as the profile's draft.
    pub fn save(&self, content: &Value, draft_id: Uuid) -> Result<LocalDraft, StorageError> {
        let previous = self.load()?.map(|d| d.version);
        let draft = LocalDraft {
            draft_id,
            version: next_version(previous),
            content: content.clone(),
            updated_at: Utc::now(),
        };
        self.storage.set(DRAFT_KEY, &serde_json::to_string(&draft)?)?;
        self.bus.publish(BusMessage::StorageUpdate(draft.clone()));
        Ok(draft)
    }

    /// The last saved draft. An undecodable record counts as absent.
    pub fn load(&self) -> Result<Option<LocalDraft>, StorageError> {
        let Some(raw) = self.storage.get(DRAFT_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                warn!("Ignoring unreadable local draft: {e}");
                Ok(None)
            }
        }
    }

    /// Drops the draft and its id. Only call once the draft is durably synced.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(DRAFT_KEY)?;
        self.storage.remove(DRAFT_ID_KEY)?;
        self.bus.publish(BusMessage::StorageClear);
        debug!("Cleared local draft");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::storage::{FileStorage, MemoryStorage};
    use serde_json::json;

    fn local_store() -> LocalDraftStore {
        LocalDraftStore::new(Arc::new(MemoryStorage::new()), BroadcastBus::new(16))
    }

    #[test]
    fn test_draft_id_is_stable() {
        let store = local_store();
        let id = store.get_or_create_draft_id().unwrap();
        assert_eq!(store.get_or_create_draft_id().unwrap(), id);
    }

    #[test]
    fn test_draft_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (id, saved) = {
            let store = LocalDraftStore::new(
                Arc::new(FileStorage::open(dir.path()).unwrap()),
                BroadcastBus::unsupported(),
            );
            let id = store.get_or_create_draft_id().unwrap();
            let saved = store.save(&json!({"name": "Ada"}), id).unwrap();
            (id, saved)
        };

        let reloaded = LocalDraftStore::new(
            Arc::new(FileStorage::open(dir.path()).unwrap()),
            BroadcastBus::unsupported(),
        );
        assert_eq!(reloaded.get_or_create_draft_id().unwrap(), id);
        assert_eq!(reloaded.load().unwrap(), Some(saved));
    }

    #[test]
    fn test_save_bumps_version_and_broadcasts() {
        let store = local_store();
        let mut sibling = store.bus().sibling().subscribe();
        let id = store.get_or_create_draft_id().unwrap();

        let first = store.save(&json!({"n": 1}), id).unwrap();
        let second = store.save(&json!({"n": 2}), id).unwrap();
        assert!(second.version > first.version);

        assert_eq!(sibling.try_recv(), Some(BusMessage::StorageUpdate(first)));
        assert_eq!(
            sibling.try_recv(),
            Some(BusMessage::StorageUpdate(second.clone()))
        );
        assert_eq!(store.load().unwrap(), Some(second));
    }

    #[test]
    fn test_clear_removes_draft_and_id() {
        let store = local_store();
        let mut sibling = store.bus().sibling().subscribe();
        let id = store.get_or_create_draft_id().unwrap();
        store.save(&json!({}), id).unwrap();

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_ne!(store.get_or_create_draft_id().unwrap(), id);

        let mut saw_clear = false;
        while let Some(msg) = sibling.try_recv() {
            saw_clear |= msg == BusMessage::StorageClear;
        }
        assert!(saw_clear);
    }

    #[test]
    fn test_corrupt_draft_reads_as_absent() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(DRAFT_KEY, "{not json").unwrap();
        let store = LocalDraftStore::new(storage, BroadcastBus::unsupported());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_works_without_broadcast_transport() {
        let store =
            LocalDraftStore::new(Arc::new(MemoryStorage::new()), BroadcastBus::unsupported());
        let id = store.get_or_create_draft_id().unwrap();
        store.save(&json!({"ok": true}), id).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
