use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A durable CV record as stored in `cv_documents`.
///
/// `content` is the résumé payload and is never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CvDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub draft_id: Option<Uuid>,
    pub version: i64,
    pub active: bool,
    pub content: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row: everything but the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub draft_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CvDocument> for DocumentSummary {
    fn from(doc: &CvDocument) -> Self {
        Self {
            id: doc.id,
            draft_id: doc.draft_id,
            version: doc.version,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// Returns a wall-clock millisecond version stamp strictly greater than `previous`.
///
/// Two writes landing in the same millisecond still get distinct, increasing stamps.
pub fn next_version(previous: Option<i64>) -> i64 {
    let now = Utc::now().timestamp_millis();
    match previous {
        Some(prev) => now.max(prev + 1),
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_version_is_wall_clock() {
        let before = Utc::now().timestamp_millis();
        let v = next_version(None);
        assert!(v >= before);
    }

    #[test]
    fn test_version_always_exceeds_previous() {
        let far_future = Utc::now().timestamp_millis() + 60_000;
        assert_eq!(next_version(Some(far_future)), far_future + 1);
    }

    #[test]
    fn test_repeated_stamps_strictly_increase() {
        let mut prev = next_version(None);
        for _ in 0..1000 {
            let v = next_version(Some(prev));
            assert!(v > prev);
            prev = v;
        }
    }
}
