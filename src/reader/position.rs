//! Local key-value store for reading positions.

use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

/// Storage key for a book's position.
pub fn position_key(book_id: impl Display) -> String {
    format!("BookPos_{}", book_id)
}

/// Clamp a position into `[0, 1]`. NaN becomes 0.
pub fn clamp_position(position: f64) -> f64 {
    if position.is_nan() {
        0.0
    } else {
        position.clamp(0.0, 1.0)
    }
}

/// Fraction of the content scrolled past.
pub fn scroll_fraction(offset: f64, content_height: f64) -> f64 {
    if content_height <= 0.0 || !content_height.is_finite() {
        return 0.0;
    }
    clamp_position(offset / content_height)
}

/// Persistent `BookPos_<id>` → position map backed by SQLite.
#[derive(Clone)]
pub struct PositionStore {
    conn: Arc<Mutex<Connection>>,
}

impl PositionStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Database(format!("Failed to open position store: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Database(format!("Failed to open position store: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL
            );",
        )
        .map_err(|e| AppError::Database(format!("Failed to initialize position store: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist a position, clamped to `[0, 1]`.
    pub fn save(&self, book_id: impl Display, position: f64) -> Result<()> {
        let key = position_key(book_id);
        let value = clamp_position(position);

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| AppError::Database(format!("Failed to save position: {}", e)))?;

        tracing::trace!(key = %key, position = value, "Saved reading position");
        Ok(())
    }

    /// Load a position; `0.0` when none was saved.
    pub fn load(&self, book_id: impl Display) -> Result<f64> {
        Ok(self.get(book_id)?.unwrap_or(0.0))
    }

    /// Load a position, or `None` when the book has never been saved.
    pub fn get(&self, book_id: impl Display) -> Result<Option<f64>> {
        let key = position_key(book_id);
        let conn = self.conn.lock();
        let value: Option<f64> = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Database(format!("Failed to load position: {}", e)))?;

        Ok(value.map(clamp_position))
    }
}
