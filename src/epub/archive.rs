//! EPUB container handling.

use crate::epub::{CONTAINER_NS, OPF_NS};
use crate::error::{AppError, Result};
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::ZipArchive;
use zip::result::ZipError;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// An EPUB opened from an in-memory buffer.
///
/// Holds the ZIP handle together with the parsed manifest and spine. The
/// buffer is owned, so dropping the archive releases everything it loaded.
pub struct EpubArchive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<String>,
    opf_path: String,
    opf_dir: String,
    opf_text: String,
    manifest: HashMap<String, String>,
    spine: Vec<String>,
}

impl EpubArchive {
    /// Open raw EPUB bytes and resolve container, manifest, and spine.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| AppError::InvalidFormat(format!("Not a ZIP archive: {}", e)))?;
        let entries: Vec<String> = zip.file_names().map(String::from).collect();

        let container = read_zip_entry(&mut zip, CONTAINER_PATH)?
            .ok_or_else(|| AppError::InvalidFormat(format!("Missing {}", CONTAINER_PATH)))?;
        let opf_path = Self::find_opf_path(&utf8(container, CONTAINER_PATH)?)?;

        let opf_bytes = read_zip_entry(&mut zip, &opf_path)?.ok_or_else(|| {
            AppError::InvalidFormat(format!("Package document not found: {}", opf_path))
        })?;
        let opf_text = utf8(opf_bytes, &opf_path)?;

        let opf_dir = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        let (manifest, spine) = Self::parse_package(&opf_text, &opf_dir)?;

        tracing::debug!(
            opf = %opf_path,
            manifest = manifest.len(),
            spine = spine.len(),
            "Opened EPUB archive"
        );

        Ok(Self {
            zip,
            entries,
            opf_path,
            opf_dir,
            opf_text,
            manifest,
            spine,
        })
    }

    /// Find the OPF file path from container.xml.
    fn find_opf_path(content: &str) -> Result<String> {
        let doc = Document::parse(content)
            .map_err(|e| AppError::InvalidFormat(format!("Malformed container.xml: {}", e)))?;

        doc.descendants()
            .find(|n| is_element(n, CONTAINER_NS, "rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Build the manifest map and the resolved spine from the OPF document.
    fn parse_package(
        content: &str,
        opf_dir: &str,
    ) -> Result<(HashMap<String, String>, Vec<String>)> {
        let doc = Document::parse(content)
            .map_err(|e| AppError::InvalidFormat(format!("Malformed package document: {}", e)))?;

        let manifest: HashMap<String, String> = doc
            .descendants()
            .filter(|n| is_element(n, OPF_NS, "manifest"))
            .flat_map(|m| m.children().filter(|n| is_element(n, OPF_NS, "item")))
            .filter_map(|item| {
                let id = item.attribute("id")?;
                let href = item.attribute("href")?;
                Some((id.to_string(), href.to_string()))
            })
            .collect();

        let mut spine = Vec::new();
        let itemrefs = doc
            .descendants()
            .filter(|n| is_element(n, OPF_NS, "spine"))
            .flat_map(|s| s.children().filter(|n| is_element(n, OPF_NS, "itemref")));

        for itemref in itemrefs {
            let Some(idref) = itemref.attribute("idref") else {
                continue;
            };
            match manifest.get(idref) {
                Some(href) => spine.push(resolve_href(opf_dir, href)),
                None => tracing::debug!(idref, "Skipping spine item missing from manifest"),
            }
        }

        Ok((manifest, spine))
    }

    /// Archive path of the OPF package document.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Directory containing the OPF ("" when it sits at the root).
    pub fn opf_dir(&self) -> &str {
        &self.opf_dir
    }

    /// Raw text of the OPF package document.
    pub fn opf_text(&self) -> &str {
        &self.opf_text
    }

    /// Manifest item id to href, as written in the OPF.
    pub fn manifest(&self) -> &HashMap<String, String> {
        &self.manifest
    }

    /// Archive-relative paths of the content documents, in reading order.
    pub fn spine(&self) -> &[String] {
        &self.spine
    }

    /// All entry names, in archive order.
    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    /// Read an entry by its archive path.
    pub fn read_entry(&mut self, path: &str) -> Result<Vec<u8>> {
        read_zip_entry(&mut self.zip, path)?
            .ok_or_else(|| AppError::NotFound(format!("Archive entry: {}", path)))
    }

    /// Read an entry and decode it as UTF-8.
    pub fn read_entry_text(&mut self, path: &str) -> Result<String> {
        let bytes = self.read_entry(path)?;
        utf8(bytes, path)
    }
}

impl std::fmt::Debug for EpubArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpubArchive")
            .field("opf_path", &self.opf_path)
            .field("entries", &self.entries.len())
            .field("spine", &self.spine)
            .finish()
    }
}

/// Resolve a manifest href against the OPF directory.
///
/// Fragments are dropped, percent-escapes decoded, and `.`/`..` segments
/// folded, yielding a path usable as a ZIP entry name.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let decoded = urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let mut parts: Vec<&str> = if decoded.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    parts.join("/")
}

fn is_element(node: &Node, namespace: &str, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node
            .tag_name()
            .namespace()
            .is_none_or(|ns| ns == namespace)
}

fn read_zip_entry(zip: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Option<Vec<u8>>> {
    match zip.by_name(name) {
        Ok(mut file) => {
            // Declared entry sizes are untrusted
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            Ok(Some(data))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn utf8(bytes: Vec<u8>, path: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| AppError::InvalidFormat(format!("{} is not valid UTF-8", path)))
}
