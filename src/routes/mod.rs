//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Report images for document export arrive base64-encoded in a JSON body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - Session API under `/api/v1/sessions/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers), adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/sessions", post(http::http_create_session))
        .route("/api/v1/sessions/:id", get(http::http_get_session).delete(http::http_delete_session))
        .route("/api/v1/sessions/:id/submit", post(http::http_submit))
        .route("/api/v1/sessions/:id/answers", post(http::http_answer))
        .route("/api/v1/sessions/:id/writing", post(http::http_writing))
        .route("/api/v1/sessions/:id/speaking/start", post(http::http_speaking_start))
        .route("/api/v1/sessions/:id/speaking/stop", post(http::http_speaking_stop))
        .route("/api/v1/sessions/:id/speaking/transcript", post(http::http_speaking_transcript))
        .route("/api/v1/sessions/:id/speaking/buffer", put(http::http_speaking_buffer))
        .route("/api/v1/sessions/:id/speaking/next", post(http::http_speaking_next))
        .route("/api/v1/sessions/:id/sections/next", post(http::http_next_section))
        .route("/api/v1/sessions/:id/evaluate", post(http::http_evaluate))
        .route("/api/v1/sessions/:id/restart", post(http::http_restart))
        .route("/api/v1/sessions/:id/report", get(http::http_report))
        .route("/api/v1/sessions/:id/report/markdown", get(http::http_report_markdown))
        .route("/api/v1/sessions/:id/report/document", post(http::http_report_document))
        .route("/api/v1/sessions/:id/test/text", get(http::http_test_text))
        // State + body limit + CORS + HTTP tracing
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
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
        // Frontend fallback
        .fallback_service(static_service)
}
