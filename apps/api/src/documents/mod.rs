// Durable CV storage: trait, backends, and the HTTP surface over them.

pub mod handlers;
pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryDocumentStore;
pub use postgres::PgDocumentStore;
pub use store::{DocumentStore, StoreError};
