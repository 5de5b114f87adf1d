//! Catalog domain models.

mod book;

pub use book::{Book, Tag, derive_title};
