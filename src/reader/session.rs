//! Reading session over a paginated EPUB.

use crate::client::CatalogClient;
use crate::epub::{EpubArchive, Page, PageError, TitleStrategy, extract_title, paginate};
use crate::error::{AppError, Result};
use crate::reader::{PositionStore, clamp_position, scroll_fraction};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of what the reader displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderView {
    /// Book being read.
    pub book_id: String,
    /// Display title.
    pub title: String,
    /// Current page (0-based).
    pub page_index: usize,
    /// Number of readable pages.
    pub page_count: usize,
    /// Text of the current page.
    pub text: String,
    /// Position in the whole book, in `[0, 1]`.
    pub position: f64,
    /// Whether a previous page exists.
    pub can_go_previous: bool,
    /// Whether a next page exists.
    pub can_go_next: bool,
}

/// State of one open book.
///
/// Position is tracked as a page index plus the scrolled fraction of that
/// page; the persisted value is `(page + fraction) / page_count`.
pub struct ReadingSession {
    book_id: String,
    title: String,
    pages: Vec<Page>,
    errors: Vec<PageError>,
    page_index: usize,
    in_page: f64,
    store: PositionStore,
    view_tx: watch::Sender<ReaderView>,
}

impl ReadingSession {
    /// Open a book from its EPUB bytes and restore its saved position.
    pub fn open(
        book_id: &str,
        epub: Vec<u8>,
        store: PositionStore,
        strategy: TitleStrategy,
    ) -> Result<Self> {
        let (title, pagination) = {
            let mut archive = EpubArchive::from_bytes(epub)?;
            let title = extract_title(archive.opf_text(), strategy)
                .into_option()
                .unwrap_or_else(|| book_id.to_string());
            (title, paginate(&mut archive))
        };

        if pagination.is_empty() {
            return Err(AppError::InvalidFormat(format!(
                "Book {} has no readable content",
                book_id
            )));
        }

        let saved = match store.load(book_id) {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(book_id, error = %e, "Failed to load reading position");
                0.0
            }
        };
        let (page_index, in_page) = locate(saved, pagination.pages.len());

        let mut session = Self {
            book_id: book_id.to_string(),
            title,
            pages: pagination.pages,
            errors: pagination.errors,
            page_index,
            in_page,
            store,
            view_tx: watch::Sender::new(ReaderView::empty(book_id)),
        };
        session.publish();

        tracing::info!(
            book_id,
            pages = session.pages.len(),
            failed = session.errors.len(),
            page = session.page_index + 1,
            "Opened book"
        );
        Ok(session)
    }

    /// Replace the display title (e.g. with the catalog title).
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.publish();
    }

    /// Book being read.
    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    /// Display title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Readable pages.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Spine documents that failed to load.
    pub fn page_errors(&self) -> &[PageError] {
        &self.errors
    }

    /// The page on display.
    pub fn current_page(&self) -> &Page {
        &self.pages[self.page_index]
    }

    /// Current page index (0-based).
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Page number to report to the catalog (1-based).
    pub fn last_read_page(&self) -> i64 {
        self.page_index as i64 + 1
    }

    /// Position in the whole book, in `[0, 1]`.
    pub fn position(&self) -> f64 {
        clamp_position((self.page_index as f64 + self.in_page) / self.pages.len() as f64)
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> ReaderView {
        ReaderView {
            book_id: self.book_id.clone(),
            title: self.title.clone(),
            page_index: self.page_index,
            page_count: self.pages.len(),
            text: self.current_page().text.clone(),
            position: self.position(),
            can_go_previous: self.page_index > 0,
            can_go_next: self.page_index + 1 < self.pages.len(),
        }
    }

    /// Watch the published view.
    pub fn subscribe(&self) -> watch::Receiver<ReaderView> {
        self.view_tx.subscribe()
    }

    /// Record a scroll event on the current page and persist the position.
    pub fn on_scroll(&mut self, offset: f64, content_height: f64) -> f64 {
        self.in_page = scroll_fraction(offset, content_height);
        self.persist();
        self.publish();
        self.position()
    }

    /// Move to the next page, if any. Returns the 1-based page number.
    pub fn next_page(&mut self) -> i64 {
        self.go_to_page(self.page_index.saturating_add(1))
    }

    /// Move to the previous page, if any. Returns the 1-based page number.
    pub fn previous_page(&mut self) -> i64 {
        self.go_to_page(self.page_index.saturating_sub(1))
    }

    /// Jump to a page (0-based, clamped). Returns the 1-based page number.
    pub fn go_to_page(&mut self, index: usize) -> i64 {
        let index = index.min(self.pages.len() - 1);
        if index != self.page_index {
            self.page_index = index;
            self.in_page = 0.0;
            self.persist();
            self.publish();
        }
        self.last_read_page()
    }

    /// Mirror the current page to the catalog without blocking the caller.
    pub fn sync_last_page(&self, client: Arc<CatalogClient>) -> JoinHandle<()> {
        let book_id = self.book_id.clone();
        let page = self.last_read_page();
        tokio::spawn(async move {
            if let Err(e) = client.update_last_page(&book_id, page).await {
                tracing::warn!(book_id = %book_id, page, error = %e, "Failed to sync last read page");
            }
        })
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.book_id, self.position()) {
            tracing::warn!(book_id = %self.book_id, error = %e, "Failed to save reading position");
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

impl ReaderView {
    fn empty(book_id: &str) -> Self {
        Self {
            book_id: book_id.to_string(),
            title: String::new(),
            page_index: 0,
            page_count: 0,
            text: String::new(),
            position: 0.0,
            can_go_previous: false,
            can_go_next: false,
        }
    }
}

/// Map a book-wide position onto a page and an in-page fraction.
fn locate(position: f64, page_count: usize) -> (usize, f64) {
    if page_count == 0 {
        return (0, 0.0);
    }
    let scaled = clamp_position(position) * page_count as f64;
    let page = (scaled.floor() as usize).min(page_count - 1);
    (page, (scaled - page as f64).clamp(0.0, 1.0))
}

/// Fetch a book from the catalog and open it.
///
/// Without a local position, the page last reported to the catalog is used.
pub async fn load_session(
    client: &CatalogClient,
    store: PositionStore,
    book_id: &str,
    strategy: TitleStrategy,
) -> Result<ReadingSession> {
    let book = client
        .list_books()
        .await?
        .into_iter()
        .find(|b| b.id == book_id)
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", book_id)))?;

    let epub = client.get_epub(book_id).await?;
    let has_local = match store.get(book_id) {
        Ok(saved) => saved.is_some(),
        Err(e) => {
            tracing::warn!(book_id, error = %e, "Failed to check local reading position");
            false
        }
    };

    let mut session = ReadingSession::open(book_id, epub, store, strategy)?;
    session.set_title(book.title);

    if !has_local && book.last_read_page > 0 {
        session.go_to_page((book.last_read_page - 1) as usize);
    }

    Ok(session)
}
