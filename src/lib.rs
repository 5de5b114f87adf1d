//! bookshelf-rs: an EPUB catalog service with a paginated text reader.
//!
//! The crate has two halves that share one set of domain types:
//!
//! - a catalog REST service storing EPUBs, covers, tags and the last page
//!   read, backed by SQLite;
//! - a reader core that unpacks EPUBs, extracts titles and covers, turns
//!   spine documents into plain-text pages and persists reading positions,
//!   talking to the service through [`client::CatalogClient`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP client for the catalog service.
pub mod client;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// EPUB parsing.
pub mod epub;
/// Error types.
pub mod error;
/// Book and tag models.
pub mod library;
/// Reading sessions and position storage.
pub mod reader;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use client::CatalogClient;
pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use reader::{PositionStore, ReadingSession};
pub use server::AppState;
