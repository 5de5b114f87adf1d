use crate::client::CatalogClient;
use crate::config::{ClientConfig, Config};
use crate::db::{Database, NewBook, StoredTag, now_timestamp};
use crate::epub::{
    EpubArchive, TitleLookup, TitleStrategy, extract_metadata, extract_title, find_cover, paginate,
};
use crate::error::AppError;
use crate::library::Book;
use crate::reader::{PositionStore, ReadingSession, load_session};
use crate::server::{AppState, create_router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n0000";

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn new_book(id: &str, title: &str, created_at: i64) -> NewBook {
    NewBook {
        id: id.to_string(),
        title: title.to_string(),
        epub: vec![1, 2, 3],
        cover: None,
        cover_type: None,
        created_at,
    }
}

fn create_tag(db: &Database, id: &str, name: &str) {
    let tag = StoredTag {
        id: id.to_string(),
        name: name.to_string(),
        book_count: 0,
        created_at: now_timestamp(),
    };
    db.create_tag(&tag).unwrap();
}

/// Build a ZIP from raw entries.
fn zip_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

fn opf(title: Option<&str>, chapters: usize) -> String {
    let title = title
        .map(|t| format!("<dc:title>{}</dc:title>", t))
        .unwrap_or_default();
    let items: String = (1..=chapters)
        .map(|i| {
            format!(
                r#"<item id="ch{i}" href="Text/ch{i}.xhtml" media-type="application/xhtml+xml"/>"#
            )
        })
        .collect();
    let itemrefs: String = (1..=chapters)
        .map(|i| format!(r#"<itemref idref="ch{i}"/>"#))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    {title}
    <dc:creator>Victor Hugo</dc:creator>
    <dc:language>fr</dc:language>
  </metadata>
  <manifest>{items}</manifest>
  <spine>{itemrefs}<itemref idref="ghost"/></spine>
</package>"#
    )
}

fn xhtml(body: &str) -> String {
    format!(r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><style>p {{ color: red }}</style></head><body>{}</body></html>"#, body)
}

/// EPUB with one chapter per body, plus extra raw entries.
fn build_epub(title: Option<&str>, bodies: &[&str], extra: &[(&str, &[u8])]) -> Vec<u8> {
    let opf = opf(title, bodies.len());
    let chapters: Vec<(String, String)> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| (format!("OEBPS/Text/ch{}.xhtml", i + 1), xhtml(body)))
        .collect();

    let mut entries: Vec<(&str, &[u8])> = vec![
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
    ];
    for (name, text) in &chapters {
        entries.push((name.as_str(), text.as_bytes()));
    }
    entries.extend_from_slice(extra);
    zip_entries(&entries)
}

fn three_chapters() -> Vec<u8> {
    build_epub(
        Some("Les Misérables"),
        &[
            "<h1>Fantine</h1><p>En 1815, M. Charles-François-Bienvenu Myriel</p>",
            "<p>Cosette</p>",
            "<p>Marius &amp; Cosette</p>",
        ],
        &[],
    )
}

// ============================================================================
// DATABASE
// ============================================================================

#[test]
fn db_insert_and_get_book() {
    let db = test_db();
    db.insert_book(&new_book("b1", "Candide", 100)).unwrap();

    let found = db.get_book("b1").unwrap().unwrap();
    assert_eq!(found.title, "Candide");
    assert_eq!(found.last_read_page, 0);
    assert!(!found.has_cover);
    assert_eq!(db.get_epub("b1").unwrap(), Some(vec![1, 2, 3]));
    assert!(db.get_book("missing").unwrap().is_none());
}

#[test]
fn db_duplicate_title_is_conflict() {
    let db = test_db();
    db.insert_book(&new_book("b1", "Candide", 100)).unwrap();

    let err = db.insert_book(&new_book("b2", "Candide", 200)).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(db.book_count().unwrap(), 1);
}

#[test]
fn db_list_books_newest_first() {
    let db = test_db();
    db.insert_book(&new_book("old", "Old", 100)).unwrap();
    db.insert_book(&new_book("new", "New", 200)).unwrap();
    db.insert_book(&new_book("same", "Same", 200)).unwrap();

    let ids: Vec<String> = db.list_books().unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(ids, vec!["same", "new", "old"]);
}

#[test]
fn db_filter_books_matches_any_tag() {
    let db = test_db();
    db.insert_book(&new_book("b1", "One", 100)).unwrap();
    db.insert_book(&new_book("b2", "Two", 200)).unwrap();
    db.insert_book(&new_book("b3", "Three", 300)).unwrap();
    create_tag(&db, "t1", "classics");
    create_tag(&db, "t2", "french");

    db.set_book_tags("b1", &["t1".into(), "t2".into()]).unwrap();
    db.set_book_tags("b2", &["t2".into()]).unwrap();

    let ids: Vec<String> = db
        .filter_books(&["t1".into(), "t2".into()])
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec!["b2", "b1"]);

    assert_eq!(db.filter_books(&[]).unwrap().len(), 3);
}

#[test]
fn db_tag_counts_and_conflicts() {
    let db = test_db();
    db.insert_book(&new_book("b1", "One", 100)).unwrap();
    create_tag(&db, "t1", "poetry");
    create_tag(&db, "t2", "drama");

    let dup = StoredTag {
        id: "t3".into(),
        name: "poetry".into(),
        book_count: 0,
        created_at: now_timestamp(),
    };
    assert!(matches!(db.create_tag(&dup), Err(AppError::Conflict(_))));

    db.set_book_tags("b1", &["t1".into()]).unwrap();
    let tags = db.list_tags().unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].name, "drama");
    assert_eq!(tags[0].book_count, 0);
    assert_eq!(tags[1].name, "poetry");
    assert_eq!(tags[1].book_count, 1);

    assert_eq!(db.get_tag_by_name("poetry").unwrap().unwrap().book_count, 1);
}

#[test]
fn db_set_book_tags_unknown_tag_keeps_previous() {
    let db = test_db();
    db.insert_book(&new_book("b1", "One", 100)).unwrap();
    create_tag(&db, "t1", "poetry");
    db.set_book_tags("b1", &["t1".into()]).unwrap();

    let err = db
        .set_book_tags("b1", &["t1".into(), "nope".into()])
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let tags = db.get_book_tags("b1").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id, "t1");
}

#[test]
fn db_cover_and_last_page() {
    let db = test_db();
    db.insert_book(&new_book("b1", "One", 100)).unwrap();
    assert!(db.get_cover("b1").unwrap().is_none());

    assert!(db.set_cover("b1", PNG_MAGIC, "image/png").unwrap());
    let cover = db.get_cover("b1").unwrap().unwrap();
    assert_eq!(cover.media_type, "image/png");
    assert!(db.get_book("b1").unwrap().unwrap().has_cover);

    assert!(db.set_last_read_page("b1", 12).unwrap());
    assert_eq!(db.get_book("b1").unwrap().unwrap().last_read_page, 12);
    assert!(!db.set_last_read_page("missing", 1).unwrap());
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"

[database]
path = "/tmp/catalog.db"

[client]
base_url = "http://10.0.2.2:3000"
max_retries = 5

[reader]
title_strategy = "plain_text"
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.client.base_url, "http://10.0.2.2:3000");
    assert_eq!(config.client.max_retries, 5);
    assert_eq!(config.client.retry_delay_ms, 1000);
    assert_eq!(config.reader.title_strategy, TitleStrategy::PlainText);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 3000);
    assert_eq!(config.client.max_retries, 3);
    assert_eq!(config.client.timeout_secs, 60);
    assert_eq!(config.reader.title_strategy, TitleStrategy::Xml);
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 3000);
    assert_eq!(config.client.base_url, "http://localhost:3000");
}

// ============================================================================
// EPUB
// ============================================================================

#[test]
fn epub_spine_resolves_against_opf_dir() {
    let archive = EpubArchive::from_bytes(three_chapters()).unwrap();
    assert_eq!(archive.opf_path(), "OEBPS/content.opf");
    assert_eq!(archive.opf_dir(), "OEBPS");
    assert_eq!(
        archive.spine(),
        &[
            "OEBPS/Text/ch1.xhtml".to_string(),
            "OEBPS/Text/ch2.xhtml".to_string(),
            "OEBPS/Text/ch3.xhtml".to_string(),
        ]
    );
    assert_eq!(archive.manifest().len(), 3);
}

#[test]
fn epub_missing_container_is_invalid() {
    let bytes = zip_entries(&[("OEBPS/content.opf", b"<package/>".as_slice())]);
    assert!(matches!(
        EpubArchive::from_bytes(bytes),
        Err(AppError::InvalidFormat(_))
    ));
}

#[test]
fn epub_not_a_zip_is_invalid() {
    assert!(matches!(
        EpubArchive::from_bytes(b"plain text".to_vec()),
        Err(AppError::InvalidFormat(_))
    ));
}

#[test]
fn epub_missing_opf_is_invalid() {
    let bytes = zip_entries(&[("META-INF/container.xml", CONTAINER.as_bytes())]);
    assert!(matches!(
        EpubArchive::from_bytes(bytes),
        Err(AppError::InvalidFormat(_))
    ));
}

#[test]
fn epub_oversized_declared_entry_is_rejected() {
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(true);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("META-INF/container.xml", options).unwrap();
    zip.write_all(CONTAINER.as_bytes()).unwrap();
    let mut bytes = zip.finish().unwrap().into_inner();

    // Claim an absurd size in the central directory's zip64 field
    let cd = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
    let name_len = u16::from_le_bytes([bytes[cd + 28], bytes[cd + 29]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[cd + 30], bytes[cd + 31]]) as usize;
    let start = cd + 46 + name_len;
    let mut i = start;
    let mut patched = false;
    while i + 4 <= start + extra_len {
        let id = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let len = u16::from_le_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if id == 0x0001 && len >= 16 {
            bytes[i + 4..i + 12].fill(0xff);
            bytes[i + 12..i + 20].fill(0x7f);
            patched = true;
        }
        i += 4 + len;
    }
    assert!(patched);

    assert!(EpubArchive::from_bytes(bytes).is_err());
}

#[test]
fn title_both_strategies_agree() {
    let opf = opf(Some("Les Misérables"), 1);
    assert_eq!(
        extract_title(&opf, TitleStrategy::PlainText),
        TitleLookup::Found("Les Misérables".into())
    );
    assert_eq!(
        extract_title(&opf, TitleStrategy::Xml),
        TitleLookup::Found("Les Misérables".into())
    );
}

#[test]
fn title_missing_is_not_found() {
    let opf = opf(None, 1);
    assert_eq!(
        extract_title(&opf, TitleStrategy::PlainText),
        TitleLookup::NotFound
    );
    assert_eq!(extract_title(&opf, TitleStrategy::Xml), TitleLookup::NotFound);
}

#[test]
fn metadata_creators_and_language() {
    let meta = extract_metadata(&opf(Some("Les Misérables"), 1));
    assert_eq!(meta.title.as_deref(), Some("Les Misérables"));
    assert_eq!(meta.creators, vec!["Victor Hugo".to_string()]);
    assert_eq!(meta.language.as_deref(), Some("fr"));
}

#[test]
fn paginate_one_page_per_non_empty_document() {
    let bytes = build_epub(
        Some("T"),
        &["<p>One</p>", "  <div> </div>\n", "<p>Three &eacute;t&#233;</p>"],
        &[],
    );
    let mut archive = EpubArchive::from_bytes(bytes).unwrap();
    let result = paginate(&mut archive);

    assert_eq!(result.len(), 2);
    assert!(result.errors.is_empty());
    assert_eq!(result.pages[0].text, "One");
    assert_eq!(result.pages[1].text, "Three été");
    assert_eq!(result.pages[1].index, 1);
    assert_eq!(result.pages[1].source, "OEBPS/Text/ch3.xhtml");
    assert!(result.pages.iter().all(|p| !p.text.trim().is_empty()));
}

#[test]
fn paginate_reports_missing_document_and_continues() {
    let opf = opf(Some("T"), 2);
    let ch2 = xhtml("<p>Two</p>");
    let bytes = zip_entries(&[
        ("META-INF/container.xml", CONTAINER.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
        ("OEBPS/Text/ch2.xhtml", ch2.as_bytes()),
    ]);

    let mut archive = EpubArchive::from_bytes(bytes).unwrap();
    let result = paginate(&mut archive);
    assert_eq!(result.len(), 1);
    assert_eq!(result.pages[0].text, "Two");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source, "OEBPS/Text/ch1.xhtml");
}

#[test]
fn cover_priority_prefers_conventional_path() {
    let bytes = build_epub(
        Some("T"),
        &["<p>x</p>"],
        &[
            ("OEBPS/Images/my-cover.jpg", b"\xFF\xD8\xFFjpeg".as_slice()),
            ("OEBPS/Images/cover.png", PNG_MAGIC),
        ],
    );
    let mut archive = EpubArchive::from_bytes(bytes).unwrap();
    let cover = find_cover(&mut archive).unwrap().unwrap();
    assert_eq!(cover.path, "OEBPS/Images/cover.png");
    assert_eq!(cover.media_type, "image/png");
    assert_eq!(cover.bytes, PNG_MAGIC);
}

#[test]
fn cover_none_when_absent() {
    let mut archive = EpubArchive::from_bytes(three_chapters()).unwrap();
    assert!(find_cover(&mut archive).unwrap().is_none());
}

// ============================================================================
// POSITIONS AND SESSIONS
// ============================================================================

#[test]
fn positions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("positions.db");

    {
        let store = PositionStore::open(&path).unwrap();
        for (id, p) in [("a", 0.0), ("b", 0.1), ("c", 0.333), ("d", 1.0)] {
            store.save(id, p).unwrap();
        }
    }

    let store = PositionStore::open(&path).unwrap();
    assert_eq!(store.load("a").unwrap(), 0.0);
    assert_eq!(store.load("b").unwrap(), 0.1);
    assert_eq!(store.load("c").unwrap(), 0.333);
    assert_eq!(store.load("d").unwrap(), 1.0);
    assert_eq!(store.load("unknown").unwrap(), 0.0);
}

#[test]
fn positions_numeric_and_string_ids_share_keys() {
    let store = PositionStore::open_memory().unwrap();
    store.save(7, 0.5).unwrap();
    assert_eq!(store.load("7").unwrap(), 0.5);
}

#[test]
fn session_navigation_persists_position() {
    let store = PositionStore::open_memory().unwrap();
    let mut session =
        ReadingSession::open("book-1", three_chapters(), store.clone(), TitleStrategy::Xml).unwrap();

    assert_eq!(session.title(), "Les Misérables");
    assert_eq!(session.pages().len(), 3);
    assert_eq!(session.page_index(), 0);
    assert_eq!(session.previous_page(), 1);

    assert_eq!(session.next_page(), 2);
    assert_eq!(session.current_page().text, "Cosette");
    assert_eq!(store.load("book-1").unwrap(), 1.0 / 3.0);

    let position = session.on_scroll(500.0, 1000.0);
    assert_eq!(position, 0.5);
    assert_eq!(store.load("book-1").unwrap(), 0.5);

    assert_eq!(session.go_to_page(99), 3);
    assert!(!session.view().can_go_next);
    assert_eq!(session.next_page(), 3);
}

#[test]
fn session_restores_saved_position() {
    let store = PositionStore::open_memory().unwrap();
    store.save("book-1", 0.5).unwrap();

    let session =
        ReadingSession::open("book-1", three_chapters(), store, TitleStrategy::PlainText).unwrap();
    assert_eq!(session.page_index(), 1);
    assert_eq!(session.position(), 0.5);
    assert_eq!(session.last_read_page(), 2);
}

#[test]
fn session_positions_do_not_leak_between_books() {
    let store = PositionStore::open_memory().unwrap();
    store.save("book-a", 0.9).unwrap();

    let session = ReadingSession::open("book-b", three_chapters(), store, TitleStrategy::Xml).unwrap();
    assert_eq!(session.page_index(), 0);
    assert_eq!(session.position(), 0.0);
}

#[test]
fn session_publishes_view_updates() {
    let store = PositionStore::open_memory().unwrap();
    let mut session =
        ReadingSession::open("book-1", three_chapters(), store, TitleStrategy::Xml).unwrap();
    let rx = session.subscribe();
    assert_eq!(rx.borrow().page_count, 3);

    session.next_page();
    session.set_title("Catalog Title");
    let view = rx.borrow().clone();
    assert_eq!(view.page_index, 1);
    assert_eq!(view.title, "Catalog Title");
    assert!(view.can_go_previous);
    assert_eq!(view.text, "Cosette");
}

#[test]
fn session_without_content_is_invalid() {
    let store = PositionStore::open_memory().unwrap();
    let bytes = build_epub(Some("Empty"), &["  ", "<p> </p>"], &[]);
    let result = ReadingSession::open("empty", bytes, store, TitleStrategy::Xml);
    assert!(matches!(result, Err(AppError::InvalidFormat(_))));
}

#[test]
fn session_title_falls_back_to_book_id() {
    let store = PositionStore::open_memory().unwrap();
    let bytes = build_epub(None, &["<p>x</p>"], &[]);
    let session = ReadingSession::open("book-9", bytes, store, TitleStrategy::Xml).unwrap();
    assert_eq!(session.title(), "book-9");
}

// ============================================================================
// SERVER
// ============================================================================

const BOUNDARY: &str = "bookshelf-test-boundary";

fn test_app() -> (Router, AppState) {
    let state = AppState::new(Config::default(), test_db());
    (create_router(state.clone()), state)
}

/// Encode multipart parts as `(name, file_name, data)`.
fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match file_name {
            Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
            None => format!("form-data; name=\"{}\"", name),
        };
        body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(path: &str, method: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, path: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn upload_candide(app: &Router) -> Book {
    let epub = build_epub(
        Some("Candide, ou l'Optimisme"),
        &["<p>Il y avait en Westphalie</p>"],
        &[("OEBPS/Images/cover.png", PNG_MAGIC)],
    );
    let body = multipart(&[("epub", Some("Candide.epub"), epub.as_slice())]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn server_upload_derives_title_and_cover() {
    let (app, _) = test_app();
    let book = upload_candide(&app).await;
    assert_eq!(book.title, "Candide");
    assert!(book.has_cover);
    assert_eq!(book.last_read_page, 0);

    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}/cover", book.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/books/{}/epub", book.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/epub+zip"
    );
    let epub = body_bytes(response).await;
    assert!(EpubArchive::from_bytes(epub).is_ok());
}

#[tokio::test]
async fn server_duplicate_upload_leaves_catalog_unchanged() {
    let (app, state) = test_app();
    let first = upload_candide(&app).await;

    let epub = build_epub(Some("Other"), &["<p>other</p>"], &[]);
    let body = multipart(&[("epub", Some("Candide.epub"), epub.as_slice())]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let books = state.list_books().unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, first.id);
    assert_eq!(state.db.get_epub(&first.id).unwrap().map(|e| e.is_empty()), Some(false));
}

#[tokio::test]
async fn server_upload_rejects_missing_or_invalid_file() {
    let (app, state) = test_app();

    let body = multipart(&[("cover", Some("cover.png"), PNG_MAGIC)]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = multipart(&[("epub", Some("Empty.epub"), b"".as_slice())]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = multipart(&[("epub", Some("Broken.epub"), b"not a zip".as_slice())]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(state.db.book_count().unwrap(), 0);
}

#[tokio::test]
async fn server_upload_without_file_name_uses_opf_title() {
    let (app, _) = test_app();
    let epub = three_chapters();
    let body = multipart(&[("epub", None, epub.as_slice())]);
    let response = app
        .clone()
        .oneshot(upload_request("/upload", "POST", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let book: Book = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(book.title, "Les Misérables");
    assert!(!book.has_cover);
}

#[tokio::test]
async fn server_replaces_cover() {
    let (app, _) = test_app();
    let book = upload_candide(&app).await;

    let jpeg: &[u8] = b"\xFF\xD8\xFF\xE0jpeg";
    let body = multipart(&[("cover", Some("front.jpg"), jpeg)]);
    let response = app
        .clone()
        .oneshot(upload_request(&format!("/books/{}/cover", book.id), "PUT", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}/cover", book.id)))
        .await
        .unwrap();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(body_bytes(response).await, jpeg);
}

#[tokio::test]
async fn server_tag_validation() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/tags", r#"{"name":"   "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/tags", r#"{"name":" Classics "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let tag: crate::library::Tag = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(tag.name, "Classics");

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tags", r#"{"name":"Classics"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn server_tags_and_filter() {
    let (app, state) = test_app();
    let book = upload_candide(&app).await;
    let tag = state.create_tag("satire").unwrap();
    let other = state.create_tag("poetry").unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/books/{}/tags", book.id),
            &format!(r#"{{"tagIds":["{}"]}}"#, tag.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Book = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(updated.has_tag(&tag.id));

    let response = app
        .clone()
        .oneshot(get(&format!("/books/filter?tagIds={},{}", other.id, tag.id)))
        .await
        .unwrap();
    let books: Vec<Book> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(books.len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/books/filter?tagIds={}", other.id)))
        .await
        .unwrap();
    let books: Vec<Book> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(books.is_empty());

    let response = app.clone().oneshot(get("/tags")).await.unwrap();
    let tags: Vec<crate::library::Tag> =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    let satire = tags.iter().find(|t| t.id == tag.id).unwrap();
    assert_eq!(satire.book_count, 1);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/books/{}/tags", book.id),
            r#"{"tagIds":["unknown"]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn server_last_page() {
    let (app, _) = test_app();
    let book = upload_candide(&app).await;
    let path = format!("/books/{}/lastpage", book.id);

    let response = app
        .clone()
        .oneshot(json_request("PUT", &path, r#"{"page":-1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request("PUT", &path, r#"{"page":5}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, br#"{"success":true}"#);

    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}", book.id)))
        .await
        .unwrap();
    let book: Book = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(book.last_read_page, 5);

    let response = app
        .clone()
        .oneshot(json_request("PUT", "/books/missing/lastpage", r#"{"page":1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn server_missing_resources() {
    let (app, _) = test_app();
    for path in ["/books/nope", "/epub/nope", "/books/nope/cover", "/books/nope/tags"] {
        let response = app.clone().oneshot(get(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
    }

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "ok");
}

// ============================================================================
// CLIENT
// ============================================================================

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn counting_router(status: StatusCode, hits: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/books",
        axum::routing::get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                status
            }
        }),
    )
}

fn fast_client(base_url: String) -> CatalogClient {
    CatalogClient::new(ClientConfig::new(base_url).with_retry_delay(5)).unwrap()
}

#[tokio::test]
async fn client_retries_server_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = spawn_server(counting_router(StatusCode::INTERNAL_SERVER_ERROR, hits.clone())).await;

    let err = fast_client(url).list_books().await.unwrap_err();
    assert!(matches!(err, AppError::Connection(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_does_not_retry_client_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = spawn_server(counting_router(StatusCode::NOT_FOUND, hits.clone())).await;

    let err = fast_client(url).list_books().await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_rejects_blank_tag_before_network() {
    // Nothing listens here; a network attempt would fail as a connection error.
    let client = fast_client("http://127.0.0.1:9".to_string());
    let err = client.create_tag(" \t ").await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn load_session_keeps_local_start_over_catalog_page() {
    let (app, _) = test_app();
    let url = spawn_server(app).await;
    let client = fast_client(url);

    let book = client
        .upload_book("Miserables.epub", three_chapters(), None)
        .await
        .unwrap();
    client.update_last_page(&book.id, 3).await.unwrap();

    let store = PositionStore::open_memory().unwrap();
    store.save(&book.id, 0.0).unwrap();

    let session = load_session(&client, store.clone(), &book.id, TitleStrategy::Xml)
        .await
        .unwrap();
    assert_eq!(session.page_index(), 0);
    assert_eq!(store.get(&book.id).unwrap(), Some(0.0));
}

#[tokio::test]
async fn awaited_syncs_leave_catalog_on_latest_page() {
    let (app, _) = test_app();
    let url = spawn_server(app).await;
    let client = Arc::new(fast_client(url));

    let book = client
        .upload_book("Miserables.epub", three_chapters(), None)
        .await
        .unwrap();
    let store = PositionStore::open_memory().unwrap();
    let mut session = load_session(&client, store, &book.id, TitleStrategy::Xml)
        .await
        .unwrap();

    for _ in 0..2 {
        session.next_page();
        session.sync_last_page(client.clone()).await.unwrap();
    }
    session.previous_page();
    session.sync_last_page(client.clone()).await.unwrap();

    let books = client.list_books().await.unwrap();
    assert_eq!(books[0].last_read_page, 2);
}

#[tokio::test]
async fn client_round_trip_against_server() {
    let (app, _) = test_app();
    let url = spawn_server(app).await;
    let client = Arc::new(fast_client(url));

    client.health().await.unwrap();

    let book = client
        .upload_book("Miserables.epub", three_chapters(), Some(PNG_MAGIC.to_vec()))
        .await
        .unwrap();
    assert!(book.has_cover);
    assert_eq!(client.get_cover(&book.id).await.unwrap(), Some(PNG_MAGIC.to_vec()));

    let err = client
        .upload_book("Miserables.epub", three_chapters(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(client.list_books().await.unwrap().len(), 1);

    let tag = client.create_tag("romans").await.unwrap();
    assert!(matches!(
        client.create_tag("romans").await,
        Err(AppError::Conflict(_))
    ));
    let tagged = client
        .set_book_tags(&book.id, std::slice::from_ref(&tag.id))
        .await
        .unwrap();
    assert!(tagged.has_tag(&tag.id));
    assert_eq!(client.get_book_tags(&book.id).await.unwrap().len(), 1);
    assert_eq!(client.filter_books(&[tag.id.clone()]).await.unwrap().len(), 1);
    assert_eq!(client.list_tags().await.unwrap()[0].book_count, 1);

    // Catalog page wins when there is no local position
    client.update_last_page(&book.id, 2).await.unwrap();
    let store = PositionStore::open_memory().unwrap();
    let mut session = load_session(&client, store.clone(), &book.id, TitleStrategy::Xml)
        .await
        .unwrap();
    assert_eq!(session.title(), book.title);
    assert_eq!(session.page_index(), 1);

    session.next_page();
    session.sync_last_page(client.clone()).await.unwrap();
    let books = client.list_books().await.unwrap();
    assert_eq!(books[0].last_read_page, 3);

    assert!(matches!(
        load_session(&client, store, "missing", TitleStrategy::Xml).await,
        Err(AppError::NotFound(_))
    ));
}
