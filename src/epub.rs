//! EPUB ingestion: container parsing, title lookup, cover discovery, and
//! conversion of spine documents into plain-text pages.

mod archive;
mod cover;
mod metadata;
mod paginate;

pub use archive::{EpubArchive, resolve_href};
pub use cover::{COVER_CANDIDATES, Cover, find_cover, image_media_type};
pub use metadata::{OpfMetadata, TitleLookup, TitleStrategy, extract_metadata, extract_title};
pub use paginate::{Page, PageError, Pagination, html_to_text, paginate};

/// Namespace of `META-INF/container.xml`.
pub const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";

/// Namespace of the OPF package document.
pub const OPF_NS: &str = "http://www.idpf.org/2007/opf";

/// Dublin Core elements namespace.
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
