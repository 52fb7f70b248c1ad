pub mod document;

pub use document::{next_version, CvDocument, DocumentSummary};
