//! HTTP request handlers.

use crate::epub::image_media_type;
use crate::error::{AppError, Result};
use crate::library::{Book, Tag};
use crate::server::{AppState, UploadedCover};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};

/// EPUB content type.
const EPUB_MIME: &str = "application/epub+zip";

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Read a multipart field fully.
async fn field_bytes(field: Field<'_>, what: &str) -> Result<Vec<u8>> {
    field
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| AppError::BadRequest(format!("Failed to read {}: {}", what, e)))
}

/// Read a cover image field.
async fn cover_field(field: Field<'_>) -> Result<UploadedCover> {
    let file_name = field.file_name().unwrap_or("cover").to_string();
    let data = field_bytes(field, "cover").await?;
    let media_type = image_media_type(&file_name, &data);
    Ok(UploadedCover { data, media_type })
}

// ============================================================================
// BOOK HANDLERS
// ============================================================================

/// Filter query (`?tagIds=a,b`).
#[derive(Debug, Deserialize)]
pub struct FilterQuery {
    #[serde(rename = "tagIds", default)]
    tag_ids: String,
}

/// All books, newest first.
pub async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.list_books()?))
}

/// Books carrying any of the listed tags.
pub async fn filter_books(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<Book>>> {
    let tag_ids: Vec<String> = query
        .tag_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();

    Ok(Json(state.filter_books(&tag_ids)?))
}

/// Book metadata (JSON).
pub async fn book_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    Ok(Json(state.get_book(&id)?))
}

/// Raw EPUB download.
pub async fn book_epub(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let book = state.get_book(&id)?;
    let data = state
        .db
        .get_epub(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    let content_disposition = format!(
        "attachment; filename*=UTF-8''{}.epub",
        urlencoding::encode(&book.title)
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EPUB_MIME)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .unwrap_or_else(|_| Response::default()))
}

/// Book cover image.
pub async fn book_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let cover = state
        .db
        .get_cover(&id)?
        .ok_or_else(|| AppError::NotFound(format!("No cover for book: {}", id)))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, cover.media_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(cover.data))
        .unwrap_or_else(|_| Response::default()))
}

/// Replace a book's cover (multipart `cover` part).
pub async fn update_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Book>> {
    let mut cover = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() == Some("cover") {
            cover = Some(cover_field(field).await?);
        }
    }

    let cover = cover.ok_or_else(|| AppError::BadRequest("Missing cover part".into()))?;
    Ok(Json(state.set_cover(&id, cover)?))
}

/// Last page update request.
#[derive(Debug, Deserialize)]
pub struct LastPageRequest {
    page: i64,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    success: bool,
}

/// Record the last page read.
pub async fn update_last_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LastPageRequest>,
) -> Result<Json<SuccessResponse>> {
    state.set_last_read_page(&id, req.page)?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================================
// TAG HANDLERS
// ============================================================================

/// New tag request.
#[derive(Debug, Deserialize)]
pub struct NewTagRequest {
    name: String,
}

/// Book tags request.
#[derive(Debug, Deserialize)]
pub struct BookTagsRequest {
    #[serde(rename = "tagIds", default)]
    tag_ids: Vec<String>,
}

/// All tags with book counts.
pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.list_tags()?))
}

/// Create a tag.
pub async fn create_tag(
    State(state): State<AppState>,
    Json(req): Json<NewTagRequest>,
) -> Result<(StatusCode, Json<Tag>)> {
    let tag = state.create_tag(&req.name)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// Tags of a book.
pub async fn book_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.book_tags(&id)?))
}

/// Replace the tags of a book.
pub async fn set_book_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BookTagsRequest>,
) -> Result<Json<Book>> {
    Ok(Json(state.set_book_tags(&id, &req.tag_ids)?))
}

// ============================================================================
// UPLOAD
// ============================================================================

/// Upload an EPUB (`epub` part) with an optional `cover` part.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Book>> {
    let mut epub: Option<(Option<String>, Vec<u8>)> = None;
    let mut cover = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("epub") => {
                let file_name = field.file_name().map(String::from);
                let data = field_bytes(field, "EPUB").await?;
                epub = Some((file_name, data));
            }
            Some("cover") => {
                let uploaded = cover_field(field).await?;
                if !uploaded.data.is_empty() {
                    cover = Some(uploaded);
                }
            }
            _ => {}
        }
    }

    let (file_name, data) = epub
        .filter(|(_, data)| !data.is_empty())
        .ok_or_else(|| AppError::BadRequest("No EPUB file uploaded".into()))?;

    Ok(Json(state.import_book(file_name.as_deref(), data, cover)?))
}

// ============================================================================
// HEALTH
// ============================================================================

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    books: usize,
}

/// Liveness check.
pub async fn health(State(state): State<AppState>) -> Result<Response<Body>> {
    let body = serde_json::to_vec(&HealthResponse {
        status: "ok",
        books: state.db.book_count()?,
    })
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(build_response(StatusCode::OK, "application/json", body))
}
