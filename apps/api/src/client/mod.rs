//! Editing-client side of draft persistence: local storage, cross-tab notifications,
//! debounced autosave, and access to the Document Store.
//!
//! Nothing here blocks on the network; durable writes happen inside the autosave path or
//! behind explicit `async` calls.

pub mod autosave;
pub mod bus;
pub mod local_store;
pub mod remote;
pub mod session;
pub mod storage;

pub use autosave::{AutosaveConfig, AutosaveScheduler, Phase, SaveHandler};
pub use bus::{BroadcastBus, BusMessage, BusSubscriber};
pub use local_store::{LocalDraft, LocalDraftStore};
pub use remote::{HttpRemote, InProcessRemote, RemoteDocuments, SyncError};
pub use session::{EditorSession, SiblingEvent, SyncStatus};
pub use storage::{DraftStorage, FileStorage, MemoryStorage, StorageError};
