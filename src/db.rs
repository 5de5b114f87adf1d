mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Book row without its blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID (UUID).
    pub id: String,
    /// Unique title.
    pub title: String,
    /// Last page reported by a reader.
    pub last_read_page: i64,
    /// Whether a cover blob is stored.
    pub has_cover: bool,
    /// Upload timestamp.
    pub created_at: i64,
}

/// A book to insert, blobs included.
#[derive(Debug, Clone)]
pub struct NewBook {
    /// Book ID (UUID).
    pub id: String,
    /// Unique title.
    pub title: String,
    /// Raw EPUB bytes.
    pub epub: Vec<u8>,
    /// Cover image bytes.
    pub cover: Option<Vec<u8>>,
    /// Cover MIME type.
    pub cover_type: Option<String>,
    /// Upload timestamp.
    pub created_at: i64,
}

/// Stored cover image.
#[derive(Debug, Clone)]
pub struct StoredCover {
    /// Image bytes.
    pub data: Vec<u8>,
    /// MIME type.
    pub media_type: String,
}

/// Tag row with its derived book count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTag {
    /// Tag ID (UUID).
    pub id: String,
    /// Unique name.
    pub name: String,
    /// Number of associated books.
    pub book_count: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
