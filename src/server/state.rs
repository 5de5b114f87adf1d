//! Application state shared across handlers.

use crate::config::Config;
use crate::db::{self, Database, NewBook, StoredBook, StoredTag};
use crate::epub::{EpubArchive, extract_metadata, find_cover};
use crate::error::{AppError, Result};
use crate::library::{Book, Tag, derive_title};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
}

/// Cover image supplied alongside an upload.
#[derive(Debug, Clone)]
pub struct UploadedCover {
    /// Image bytes.
    pub data: Vec<u8>,
    /// MIME type.
    pub media_type: String,
}

impl AppState {
    /// Create new application state with database.
    pub fn new(config: Config, db: Database) -> Self {
        Self {
            config: Arc::new(config),
            db,
        }
    }

    /// Convert a stored row to the API model, tags included.
    fn to_book(&self, sb: StoredBook) -> Result<Book> {
        let tags = self
            .db
            .get_book_tags(&sb.id)?
            .into_iter()
            .map(to_tag)
            .collect();

        Ok(Book {
            id: sb.id,
            title: sb.title,
            created_at: db::timestamp_to_datetime(sb.created_at),
            last_read_page: sb.last_read_page,
            has_cover: sb.has_cover,
            tags,
        })
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Book> {
        let stored = self
            .db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;
        self.to_book(stored)
    }

    /// All books, newest first.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        self.db
            .list_books()?
            .into_iter()
            .map(|sb| self.to_book(sb))
            .collect()
    }

    /// Books carrying any of the given tags, newest first.
    pub fn filter_books(&self, tag_ids: &[String]) -> Result<Vec<Book>> {
        self.db
            .filter_books(tag_ids)?
            .into_iter()
            .map(|sb| self.to_book(sb))
            .collect()
    }

    /// Store an uploaded EPUB.
    ///
    /// Without an explicit cover, one is looked up inside the archive.
    pub fn import_book(
        &self,
        file_name: Option<&str>,
        epub: Vec<u8>,
        cover: Option<UploadedCover>,
    ) -> Result<Book> {
        if epub.is_empty() {
            return Err(AppError::BadRequest("EPUB file is empty".into()));
        }

        let mut archive = EpubArchive::from_bytes(epub.clone())?;
        let title = derive_title(file_name, archive.opf_text()).ok_or_else(|| {
            AppError::BadRequest("Cannot derive a title from the upload".into())
        })?;

        if self.db.get_book_by_title(&title)?.is_some() {
            return Err(AppError::Conflict(format!("Book '{}' already exists", title)));
        }

        let meta = extract_metadata(archive.opf_text());
        tracing::debug!(
            title = %title,
            opf_title = ?meta.title,
            creators = ?meta.creators,
            language = ?meta.language,
            "Parsed upload"
        );

        let cover = match cover {
            Some(cover) => Some(cover),
            None => match find_cover(&mut archive) {
                Ok(found) => found.map(|c| UploadedCover {
                    data: c.bytes,
                    media_type: c.media_type,
                }),
                Err(e) => {
                    tracing::warn!(title = %title, error = %e, "Failed to extract cover");
                    None
                }
            },
        };

        let new_book = NewBook {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            epub,
            cover_type: cover.as_ref().map(|c| c.media_type.clone()),
            cover: cover.map(|c| c.data),
            created_at: db::now_timestamp(),
        };
        self.db.insert_book(&new_book)?;

        tracing::info!(
            id = %new_book.id,
            title = %new_book.title,
            size = new_book.epub.len(),
            has_cover = new_book.cover.is_some(),
            "Imported book"
        );
        self.get_book(&new_book.id)
    }

    /// Replace a book's cover.
    pub fn set_cover(&self, id: &str, cover: UploadedCover) -> Result<Book> {
        if cover.data.is_empty() {
            return Err(AppError::BadRequest("Cover image is empty".into()));
        }
        if !self.db.set_cover(id, &cover.data, &cover.media_type)? {
            return Err(AppError::NotFound(format!("Book not found: {}", id)));
        }
        self.get_book(id)
    }

    /// Record the last page read.
    pub fn set_last_read_page(&self, id: &str, page: i64) -> Result<()> {
        if page < 0 {
            return Err(AppError::BadRequest(format!("Invalid page: {}", page)));
        }
        if !self.db.set_last_read_page(id, page)? {
            return Err(AppError::NotFound(format!("Book not found: {}", id)));
        }
        tracing::debug!(book_id = id, page, "Updated last read page");
        Ok(())
    }

    /// All tags with book counts.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.db.list_tags()?.into_iter().map(to_tag).collect())
    }

    /// Create a tag. Names are trimmed; blanks are rejected.
    pub fn create_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Tag name cannot be empty".into()));
        }

        let tag = StoredTag {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            book_count: 0,
            created_at: db::now_timestamp(),
        };
        self.db.create_tag(&tag)?;

        tracing::info!(id = %tag.id, name = %tag.name, "Created tag");
        Ok(to_tag(tag))
    }

    /// Tags of a book.
    pub fn book_tags(&self, book_id: &str) -> Result<Vec<Tag>> {
        if self.db.get_book(book_id)?.is_none() {
            return Err(AppError::NotFound(format!("Book not found: {}", book_id)));
        }
        Ok(self
            .db
            .get_book_tags(book_id)?
            .into_iter()
            .map(to_tag)
            .collect())
    }

    /// Replace the tags of a book and return it.
    pub fn set_book_tags(&self, book_id: &str, tag_ids: &[String]) -> Result<Book> {
        if self.db.get_book(book_id)?.is_none() {
            return Err(AppError::NotFound(format!("Book not found: {}", book_id)));
        }
        self.db.set_book_tags(book_id, tag_ids)?;
        tracing::debug!(book_id, tags = tag_ids.len(), "Updated book tags");
        self.get_book(book_id)
    }
}

fn to_tag(st: StoredTag) -> Tag {
    Tag {
        id: st.id,
        name: st.name,
        book_count: st.book_count,
    }
}
