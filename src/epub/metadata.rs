//! Title and metadata lookup in the OPF package document.

use crate::epub::DC_NS;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

const TITLE_OPEN: &str = "<dc:title>";
const TITLE_CLOSE: &str = "</dc:title>";

/// How the title is pulled out of the OPF text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStrategy {
    /// Substring search between literal `<dc:title>` markers.
    PlainText,
    /// Namespace-aware XML query for `dc:title`.
    #[default]
    Xml,
}

/// Result of a title lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleLookup {
    /// The title text.
    Found(String),
    /// No `dc:title` in the document.
    NotFound,
}

impl TitleLookup {
    /// Convert into an `Option`, dropping the sentinel.
    pub fn into_option(self) -> Option<String> {
        match self {
            TitleLookup::Found(title) => Some(title),
            TitleLookup::NotFound => None,
        }
    }
}

/// Extract the book title from OPF text using the given strategy.
pub fn extract_title(opf: &str, strategy: TitleStrategy) -> TitleLookup {
    match strategy {
        TitleStrategy::PlainText => title_by_scan(opf),
        TitleStrategy::Xml => title_by_query(opf),
    }
}

fn title_by_scan(opf: &str) -> TitleLookup {
    let Some(start) = opf.find(TITLE_OPEN).map(|i| i + TITLE_OPEN.len()) else {
        return TitleLookup::NotFound;
    };
    match opf[start..].find(TITLE_CLOSE) {
        Some(len) => TitleLookup::Found(opf[start..start + len].to_string()),
        None => TitleLookup::NotFound,
    }
}

fn title_by_query(opf: &str) -> TitleLookup {
    let doc = match Document::parse(opf) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "OPF is not well-formed XML");
            return TitleLookup::NotFound;
        }
    };

    doc.descendants()
        .find(|n| n.has_tag_name((DC_NS, "title")))
        .map(|n| text_content(&n))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .map(TitleLookup::Found)
        .unwrap_or(TitleLookup::NotFound)
}

/// Concatenated text of every descendant text node.
fn text_content(node: &Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Descriptive metadata from the OPF `<metadata>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpfMetadata {
    /// Book title.
    pub title: Option<String>,
    /// Authors and other creators, in document order.
    pub creators: Vec<String>,
    /// Language code.
    pub language: Option<String>,
}

/// Extract title, creators, and language. Unparsable input yields defaults.
pub fn extract_metadata(opf: &str) -> OpfMetadata {
    let mut meta = OpfMetadata::default();
    let Ok(doc) = Document::parse(opf) else {
        return meta;
    };

    for node in doc.descendants().filter(|n| n.tag_name().namespace() == Some(DC_NS)) {
        let text = text_content(&node);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match node.tag_name().name() {
            "title" if meta.title.is_none() => meta.title = Some(text.to_string()),
            "creator" => meta.creators.push(text.to_string()),
            "language" if meta.language.is_none() => meta.language = Some(text.to_string()),
            _ => {}
        }
    }

    meta
}
