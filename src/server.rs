//! HTTP server and routes.

mod handlers;
mod state;

pub use state::{AppState, UploadedCover};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Catalog routes, served both at the root and under `/api`.
fn catalog_routes() -> Router<AppState> {
    let book_routes = Router::new()
        .route("/", get(handlers::list_books))
        .route("/filter", get(handlers::filter_books))
        .route("/{id}", get(handlers::book_metadata))
        .route("/{id}/epub", get(handlers::book_epub))
        .route(
            "/{id}/cover",
            get(handlers::book_cover).put(handlers::update_cover),
        )
        .route("/{id}/lastpage", put(handlers::update_last_page))
        .route(
            "/{id}/tags",
            get(handlers::book_tags).post(handlers::set_book_tags),
        );

    Router::new()
        .route("/epub/{id}", get(handlers::book_epub))
        .route("/tags", get(handlers::list_tags).post(handlers::create_tag))
        .route("/upload", post(handlers::upload))
        .route("/health", get(handlers::health))
        .nest("/books", book_routes)
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .merge(catalog_routes())
        .nest("/api", catalog_routes())
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
