//! HTTP client for the catalog service.
//!
//! Every call goes through one retry loop: transport failures, timeouts and
//! 5xx responses are retried up to `max_retries` attempts with a linearly
//! growing delay; 4xx responses surface immediately.

use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use crate::library::{Book, Tag};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct NewTagRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct LastPageRequest {
    page: i64,
}

#[derive(Serialize)]
struct BookTagsRequest<'a> {
    #[serde(rename = "tagIds")]
    tag_ids: &'a [String],
}

#[derive(Deserialize)]
struct SuccessResponse {
    success: bool,
}

/// Client for the catalog REST service.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    config: ClientConfig,
}

impl CatalogClient {
    /// Create a client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::debug!(base_url = %config.base_url, "Catalog client ready");
        Ok(Self { client, config })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a request built by `build`, retrying transient failures.
    async fn execute<F>(&self, op: &'static str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            let result = match build().send().await {
                Ok(response) => check_status(response).await,
                Err(e) => Err(AppError::from(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.config.retry_delay_ms * u64::from(attempt);
                    tracing::warn!(op, attempt, delay_ms = delay, error = %e, "Request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(op, attempt, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }

    /// List all books, newest first.
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        let url = self.url("/books");
        let response = self.execute("list_books", || self.client.get(&url)).await?;
        let books: Vec<Book> = response.json().await?;
        tracing::debug!(count = books.len(), "Fetched books");
        Ok(books)
    }

    /// List books carrying any of the given tags.
    pub async fn filter_books(&self, tag_ids: &[String]) -> Result<Vec<Book>> {
        let url = self.url("/books/filter");
        let csv = tag_ids.join(",");
        let response = self
            .execute("filter_books", || {
                self.client.get(&url).query(&[("tagIds", csv.as_str())])
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Download the raw EPUB of a book.
    pub async fn get_epub(&self, book_id: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/epub/{}", book_id));
        let response = self.execute("get_epub", || self.client.get(&url)).await?;
        let bytes = response.bytes().await?;
        tracing::debug!(book_id, size = bytes.len(), "Fetched EPUB");
        Ok(bytes.to_vec())
    }

    /// Download the cover image of a book. `None` when it has none.
    pub async fn get_cover(&self, book_id: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url(&format!("/books/{}/cover", book_id));
        match self.execute("get_cover", || self.client.get(&url)).await {
            Ok(response) => Ok(Some(response.bytes().await?.to_vec())),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Report the last page read.
    pub async fn update_last_page(&self, book_id: &str, page: i64) -> Result<()> {
        let url = self.url(&format!("/books/{}/lastpage", book_id));
        let body = LastPageRequest { page };
        let response = self
            .execute("update_last_page", || self.client.put(&url).json(&body))
            .await?;

        let result: SuccessResponse = response.json().await?;
        if !result.success {
            return Err(AppError::Http("Server did not confirm last page".into()));
        }
        Ok(())
    }

    /// List all tags.
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        let url = self.url("/tags");
        let response = self.execute("list_tags", || self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// Create a tag. Blank names are rejected without contacting the server.
    pub async fn create_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Tag name cannot be empty".into()));
        }

        let url = self.url("/tags");
        let body = NewTagRequest { name };
        let response = self
            .execute("create_tag", || self.client.post(&url).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    /// Tags associated with a book.
    pub async fn get_book_tags(&self, book_id: &str) -> Result<Vec<Tag>> {
        let url = self.url(&format!("/books/{}/tags", book_id));
        let response = self.execute("get_book_tags", || self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// Replace the tags of a book; returns the updated book.
    pub async fn set_book_tags(&self, book_id: &str, tag_ids: &[String]) -> Result<Book> {
        let url = self.url(&format!("/books/{}/tags", book_id));
        let body = BookTagsRequest { tag_ids };
        let response = self
            .execute("set_book_tags", || self.client.post(&url).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    /// Upload an EPUB, optionally with a cover image.
    pub async fn upload_book(
        &self,
        file_name: &str,
        epub: Vec<u8>,
        cover: Option<Vec<u8>>,
    ) -> Result<Book> {
        let url = self.url("/upload");
        let response = self
            .execute("upload_book", || {
                let mut form =
                    Form::new().part("epub", Part::bytes(epub.clone()).file_name(file_name.to_string()));
                if let Some(cover) = &cover {
                    form = form.part("cover", Part::bytes(cover.clone()).file_name("cover.jpg"));
                }
                self.client.post(&url).multipart(form)
            })
            .await?;

        let book: Book = response.json().await?;
        tracing::info!(id = %book.id, title = %book.title, "Uploaded book");
        Ok(book)
    }

    /// Check that the service answers.
    pub async fn health(&self) -> Result<()> {
        let url = self.url("/health");
        self.execute("health", || self.client.get(&url)).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

/// Map an error status to the error taxonomy.
fn status_error(status: StatusCode, body: String) -> AppError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.trim())
    };

    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(detail),
        StatusCode::CONFLICT => AppError::Conflict(detail),
        s if s.is_client_error() => AppError::BadRequest(detail),
        _ => AppError::Connection(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "Book already exists".into()),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            AppError::BadRequest(_)
        ));
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }

    #[test]
    fn test_url_joining() {
        let client = CatalogClient::new(ClientConfig::new("http://10.0.2.2:3000/")).unwrap();
        assert_eq!(client.url("/books"), "http://10.0.2.2:3000/books");
        assert_eq!(client.url("tags"), "http://10.0.2.2:3000/tags");
    }
}
