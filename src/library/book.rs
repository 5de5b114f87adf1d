//! Book and tag models.

use crate::epub::{TitleStrategy, extract_title};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book in the catalog, as exchanged over the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Server-assigned unique identifier.
    pub id: String,

    /// Book title (unique across the catalog).
    pub title: String,

    /// When the book was uploaded.
    pub created_at: DateTime<Utc>,

    /// Last page the reader reported (1-based, 0 when never opened).
    #[serde(default)]
    pub last_read_page: i64,

    /// Whether a cover image is stored.
    #[serde(default)]
    pub has_cover: bool,

    /// Tags associated with the book.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Book {
    /// Relative URL of the cover image.
    pub fn cover_url(&self) -> Option<String> {
        self.has_cover.then(|| format!("/books/{}/cover", self.id))
    }

    /// Whether the book carries the given tag.
    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }
}

/// A user-defined label. Names are unique and never renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Unique identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Number of books carrying this tag.
    #[serde(default)]
    pub book_count: i64,
}

/// Derive the catalog title of an uploaded EPUB.
///
/// The uploaded file name minus its `.epub` extension wins; without a usable
/// file name the OPF `dc:title` is used.
pub fn derive_title(file_name: Option<&str>, opf_text: &str) -> Option<String> {
    let from_name = file_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|name| match name.len().checked_sub(5) {
            Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".epub") => {
                &name[..cut]
            }
            _ => name,
        })
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match from_name {
        Some(name) => Some(name.to_string()),
        None => extract_title(opf_text, TitleStrategy::Xml).into_option(),
    }
}
