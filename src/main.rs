//! IELTS Mock Test Backend
//!
//! - Axum HTTP + WebSocket API
//! - OpenAI integration for test generation, chart images, and evaluation
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   OPENAI_API_KEY      : enables OpenAI integration if present
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_TEXT_MODEL   : default "gpt-4o"
//!   OPENAI_IMAGE_MODEL  : default "dall-e-3"
//!   OPENAI_TIMEOUT_SECS : optional per-request timeout, none by default
//!   EXAM_CONFIG_PATH    : path to TOML config (prompt overrides)
//!   SESSION_TTL_SECS    : forget sessions idle this long (default 3600, 0 keeps them forever)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use ielts_mock::routes::build_router;
use ielts_mock::state::{session_ttl_from_env, spawn_session_sweeper, AppState};
use ielts_mock::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // A missing .env is fine.
  let _ = dotenvy::dotenv();
  telemetry::init_tracing();

  // Shared state: session store and AI gateway.
  let state = Arc::new(AppState::from_env());
  if let Some(ttl) = session_ttl_from_env() {
    info!(target: "ielts_mock", ttl_secs = ttl.as_secs(), "Idle session sweep enabled");
    spawn_session_sweeper(state.clone(), ttl);
  }

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "ielts_mock", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
