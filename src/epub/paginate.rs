//! Spine documents to plain-text pages.

use crate::epub::EpubArchive;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));
static BLOCK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:p|div|br|h[1-6])\b[^>]*>").expect("valid regex"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("valid regex")
});

/// One display page: the text of a single spine document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Position among the produced pages.
    pub index: usize,
    /// Archive path of the content document.
    pub source: String,
    /// Normalised plain text.
    pub text: String,
}

/// A spine document that could not be turned into a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageError {
    /// Archive path of the content document.
    pub source: String,
    /// What went wrong.
    pub message: String,
}

/// Outcome of paginating a whole archive.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pagination {
    /// Readable pages in spine order.
    pub pages: Vec<Page>,
    /// Documents that failed, in spine order.
    pub errors: Vec<PageError>,
}

impl Pagination {
    /// True when the book has no readable content.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Convert every spine document into a page, in reading order.
///
/// A document that cannot be read is recorded as a [`PageError`] and the walk
/// continues; documents with no text after conversion are skipped.
pub fn paginate(archive: &mut EpubArchive) -> Pagination {
    let mut result = Pagination::default();
    let spine = archive.spine().to_vec();

    for source in spine {
        match archive.read_entry_text(&source) {
            Ok(markup) => {
                let text = html_to_text(&markup);
                if text.is_empty() {
                    tracing::debug!(source = %source, "Skipping empty spine document");
                    continue;
                }
                result.pages.push(Page {
                    index: result.pages.len(),
                    source,
                    text,
                });
            }
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Failed to load page");
                result.errors.push(PageError {
                    source,
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::debug!(
        pages = result.pages.len(),
        errors = result.errors.len(),
        "Paginated EPUB"
    );
    result
}

/// Reduce XHTML markup to plain text.
///
/// Script and style blocks are dropped with their content, block-level tags
/// become line breaks, every other tag is removed, entities are decoded, and
/// non-empty trimmed lines are joined by blank lines.
pub fn html_to_text(markup: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(markup, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Decode named and numeric character references. Unknown names stay as written.
fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let raw = &caps[0];
            unescape_with(raw, resolve_html5_entity)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string())
        })
        .into_owned()
}
