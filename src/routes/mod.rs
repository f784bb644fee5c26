//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - Bulk import, generation and collection reads under `/api/v1/...`
/// - Builder session actions under `/api/v1/builder/:id/...`
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Ingestion
        .route("/api/v1/import", post(http::http_post_import))
        .route("/api/v1/import/csv", post(http::http_post_import_csv))
        .route("/api/v1/generate", post(http::http_post_generate))
        .route("/api/v1/generate/quiz", post(http::http_post_generate_quiz))
        .route("/api/v1/generate/course", post(http::http_post_generate_course))
        .route("/api/v1/collections/:id", get(http::http_get_collection))
        .route("/api/v1/collections/:id/questions", get(http::http_get_collection_questions))
        // Builder sessions
        .route("/api/v1/builder", post(http::http_open_session))
        .route(
            "/api/v1/builder/:id",
            get(http::http_get_session).delete(http::http_close_session),
        )
        .route("/api/v1/builder/:id/config", post(http::http_configure_session))
        .route("/api/v1/builder/:id/generate", post(http::http_generate_in_session))
        .route("/api/v1/builder/:id/cancel", post(http::http_cancel_session))
        .route("/api/v1/builder/:id/questions/:index", put(http::http_edit_question))
        .route("/api/v1/builder/:id/preview", post(http::http_preview_session))
        .route("/api/v1/builder/:id/edit", post(http::http_back_to_edit))
        .route("/api/v1/builder/:id/save", post(http::http_save_session))
        .route("/api/v1/builder/:id/retry", post(http::http_retry_session))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
