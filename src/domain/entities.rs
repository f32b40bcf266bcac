//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A note as stored durably, including its counter columns.
///
/// Serializable both ways because cache-aside snapshots round-trip through
/// JSON. The `views` and `likes` columns hold the durable base value; deltas
/// still pending in the cache sit on top of these (see `cache::counters`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub body_markdown: String,
    pub views: i64,
    pub likes: i64,
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
