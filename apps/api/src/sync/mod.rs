// Promotion of anonymous local drafts into account-owned documents.

pub mod coordinator;
pub mod handlers;

pub use coordinator::{Promotion, SyncCoordinator};
