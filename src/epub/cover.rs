//! Cover image discovery.

use crate::epub::EpubArchive;
use crate::error::Result;

/// Conventional cover locations, highest priority first.
pub const COVER_CANDIDATES: &[&str] = &[
    "OEBPS/Images/cover.png",
    "OEBPS/Images/cover.jpg",
    "OEBPS/Images/cover.jpeg",
    "OEBPS/images/cover.png",
    "OEBPS/images/cover.jpg",
    "OEBPS/cover.png",
    "OEBPS/cover.jpg",
    "Images/cover.png",
    "Images/cover.jpg",
    "images/cover.jpg",
    "cover.png",
    "cover.jpg",
    "cover.jpeg",
];

/// A cover image found inside an EPUB.
#[derive(Debug, Clone)]
pub struct Cover {
    /// Archive path of the image.
    pub path: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// MIME type, sniffed from the bytes when possible.
    pub media_type: String,
}

/// Locate the cover image. Returns `None` when nothing looks like a cover.
pub fn find_cover(archive: &mut EpubArchive) -> Result<Option<Cover>> {
    let Some(path) = cover_path(archive.entry_names()) else {
        return Ok(None);
    };

    let bytes = archive.read_entry(&path)?;
    let media_type = image_media_type(&path, &bytes);
    tracing::debug!(path = %path, size = bytes.len(), "Found cover image");

    Ok(Some(Cover {
        path,
        bytes,
        media_type,
    }))
}

fn cover_path(entries: &[String]) -> Option<String> {
    let conventional = COVER_CANDIDATES.iter().find_map(|candidate| {
        entries
            .iter()
            .find(|name| name.eq_ignore_ascii_case(candidate))
    });
    if let Some(name) = conventional {
        return Some(name.clone());
    }

    entries
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            lower.contains("cover")
                && (lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png"))
        })
        .cloned()
}

/// MIME type of an image, sniffed from its bytes with the extension as fallback.
pub fn image_media_type(path: &str, bytes: &[u8]) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    if path.to_lowercase().ends_with(".png") {
        "image/png".to_string()
    } else {
        "image/jpeg".to_string()
    }
}
