use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str = "b.id, b.title, b.last_read_page, b.cover IS NOT NULL, b.created_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Books table (EPUB and cover stored inline)
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT UNIQUE NOT NULL,
                epub BLOB NOT NULL,
                cover BLOB,
                cover_type TEXT,
                last_read_page INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            -- Tags table
            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Book/tag association
            CREATE TABLE IF NOT EXISTS book_tags (
                book_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                PRIMARY KEY (book_id, tag_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_created ON books(created_at);
            CREATE INDEX IF NOT EXISTS idx_book_tags_tag ON book_tags(tag_id);
            "#,
        )
        .map_err(|e| AppError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a new book. A duplicate title is a conflict.
    pub fn insert_book(&self, book: &NewBook) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books (id, title, epub, cover, cover_type, last_read_page, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                book.id,
                book.title,
                book.epub,
                book.cover,
                book.cover_type,
                book.created_at,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Book '{}' already exists", book.title))
            } else {
                AppError::Database(format!("Failed to insert book: {}", e))
            }
        })?;
        Ok(())
    }

    fn row_to_stored_book(row: &Row) -> rusqlite::Result<StoredBook> {
        Ok(StoredBook {
            id: row.get(0)?,
            title: row.get(1)?,
            last_read_page: row.get(2)?,
            has_cover: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books b WHERE b.id = ?1", BOOK_COLUMNS),
            params![id],
            Self::row_to_stored_book,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))
    }

    /// Get book by exact title.
    pub fn get_book_by_title(&self, title: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books b WHERE b.title = ?1", BOOK_COLUMNS),
            params![title],
            Self::row_to_stored_book,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))
    }

    /// List all books, newest first.
    pub fn list_books(&self) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM books b ORDER BY b.created_at DESC, b.rowid DESC",
                BOOK_COLUMNS
            ))
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map([], Self::row_to_stored_book)
            .map_err(|e| AppError::Database(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// List books carrying any of the given tags, newest first.
    ///
    /// An empty filter lists every book.
    pub fn filter_books(&self, tag_ids: &[String]) -> Result<Vec<StoredBook>> {
        if tag_ids.is_empty() {
            return self.list_books();
        }

        let placeholders = vec!["?"; tag_ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM books b
             WHERE b.id IN (SELECT bt.book_id FROM book_tags bt WHERE bt.tag_id IN ({}))
             ORDER BY b.created_at DESC, b.rowid DESC",
            BOOK_COLUMNS, placeholders
        );

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params_from_iter(tag_ids.iter()), Self::row_to_stored_book)
            .map_err(|e| AppError::Database(format!("Failed to filter books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Get the raw EPUB bytes of a book.
    pub fn get_epub(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT epub FROM books WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get EPUB: {}", e)))
    }

    /// Get the cover image of a book, if one is stored.
    pub fn get_cover(&self, id: &str) -> Result<Option<StoredCover>> {
        let conn = self.conn.lock();
        let row: Option<(Option<Vec<u8>>, Option<String>)> = conn
            .query_row(
                "SELECT cover, cover_type FROM books WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Database(format!("Failed to get cover: {}", e)))?;

        Ok(row.and_then(|(data, media_type)| {
            data.map(|data| StoredCover {
                data,
                media_type: media_type.unwrap_or_else(|| "image/jpeg".to_string()),
            })
        }))
    }

    /// Replace the cover image of a book.
    pub fn set_cover(&self, id: &str, data: &[u8], media_type: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET cover = ?1, cover_type = ?2 WHERE id = ?3",
                params![data, media_type, id],
            )
            .map_err(|e| AppError::Database(format!("Failed to update cover: {}", e)))?;
        Ok(rows > 0)
    }

    /// Record the last page read.
    pub fn set_last_read_page(&self, id: &str, page: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET last_read_page = ?1 WHERE id = ?2",
                params![page, id],
            )
            .map_err(|e| AppError::Database(format!("Failed to update last page: {}", e)))?;
        Ok(rows > 0)
    }

    /// Get book count.
    pub fn book_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))
            .map_err(|e| AppError::Database(format!("Failed to count books: {}", e)))?;
        Ok(count as usize)
    }

    // ========== TAG OPERATIONS ==========

    /// Create a new tag. A duplicate name is a conflict.
    pub fn create_tag(&self, tag: &StoredTag) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tags (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![tag.id, tag.name, tag.created_at],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Tag '{}' already exists", tag.name))
            } else {
                AppError::Database(format!("Failed to create tag: {}", e))
            }
        })?;
        Ok(())
    }

    fn row_to_stored_tag(row: &Row) -> rusqlite::Result<StoredTag> {
        Ok(StoredTag {
            id: row.get(0)?,
            name: row.get(1)?,
            book_count: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    /// List all tags with book counts, by name.
    pub fn list_tags(&self) -> Result<Vec<StoredTag>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.name, COUNT(bt.book_id), t.created_at
                 FROM tags t
                 LEFT JOIN book_tags bt ON bt.tag_id = t.id
                 GROUP BY t.id
                 ORDER BY t.name",
            )
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let tags = stmt
            .query_map([], Self::row_to_stored_tag)
            .map_err(|e| AppError::Database(format!("Failed to list tags: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect tags: {}", e)))?;

        Ok(tags)
    }

    /// Get tag by name.
    pub fn get_tag_by_name(&self, name: &str) -> Result<Option<StoredTag>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT t.id, t.name,
                    (SELECT COUNT(*) FROM book_tags bt WHERE bt.tag_id = t.id),
                    t.created_at
             FROM tags t WHERE t.name = ?1",
            params![name],
            Self::row_to_stored_tag,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get tag: {}", e)))
    }

    /// Tags associated with a book, by name.
    pub fn get_book_tags(&self, book_id: &str) -> Result<Vec<StoredTag>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.name,
                        (SELECT COUNT(*) FROM book_tags c WHERE c.tag_id = t.id),
                        t.created_at
                 FROM tags t
                 JOIN book_tags bt ON bt.tag_id = t.id
                 WHERE bt.book_id = ?1
                 ORDER BY t.name",
            )
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let tags = stmt
            .query_map(params![book_id], Self::row_to_stored_tag)
            .map_err(|e| AppError::Database(format!("Failed to get book tags: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect tags: {}", e)))?;

        Ok(tags)
    }

    /// Replace the tag set of a book.
    ///
    /// Every tag must exist; the previous associations are kept on failure.
    pub fn set_book_tags(&self, book_id: &str, tag_ids: &[String]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for tag_id in tag_ids {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
                    params![tag_id],
                    |row| row.get(0),
                )
                .map_err(|e| AppError::Database(format!("Failed to check tag: {}", e)))?;
            if !exists {
                return Err(AppError::NotFound(format!("Tag not found: {}", tag_id)));
            }
        }

        tx.execute("DELETE FROM book_tags WHERE book_id = ?1", params![book_id])
            .map_err(|e| AppError::Database(format!("Failed to clear book tags: {}", e)))?;

        for tag_id in tag_ids {
            tx.execute(
                "INSERT OR IGNORE INTO book_tags (book_id, tag_id) VALUES (?1, ?2)",
                params![book_id, tag_id],
            )
            .map_err(|e| AppError::Database(format!("Failed to tag book: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| AppError::Database(format!("Failed to commit book tags: {}", e)))?;
        Ok(())
    }
}
