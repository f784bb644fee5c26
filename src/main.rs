//! QuizForge · Content ingestion backend
//!
//! - Axum HTTP API for bulk import, generation and the quiz builder
//! - Optional OpenAI-compatible generation (via environment variables),
//!   deterministic offline fallback otherwise
//! - In-memory content store
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   OPENAI_API_KEY     : enables live generation if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_MODEL       : default "gpt-4o-mini"
//!   AUTHORING_CONFIG_PATH : path to TOML config (prompts, generation, persistence)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod validation;
mod prompt;
mod document;
mod seeds;
mod openai;
mod generation;
mod import;
mod store;
mod ordering;
mod persistence;
mod builder;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: config, content store, generation adapter, builder sessions.
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizforge_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "quizforge_backend", error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
      }
      info!(target: "quizforge_backend", "Shutting down");
    })
    .await?;
  Ok(())
}
