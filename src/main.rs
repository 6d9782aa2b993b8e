//! IllustratED · Illustrated Quest Backend
//!
//! - Axum HTTP + WebSocket API; one quest session per WebSocket connection
//! - Quest generation and illustration through Gemini (via environment variables)
//! - Optional ElevenLabs narration
//! - Progress and generated quests persisted as JSON under DATA_DIR
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   DATA_DIR             : storage directory (default "./data")
//!   GEMINI_API_KEY       : enables generation (API_KEY is accepted as an alias)
//!   GEMINI_BASE_URL      : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL         : default "gemini-2.5-flash-image-preview"
//!   ELEVENLABS_API_KEY   : enables narration if present
//!   ELEVENLABS_BASE_URL  : default "https://api.elevenlabs.io/v1"
//!   ELEVENLABS_VOICE_ID  : narration voice
//!   QUEST_CONFIG_PATH    : path to TOML config (prompts, voice settings, extra quests)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod catalog;
mod decoder;
mod gemini;
mod generator;
mod narration;
mod storage;
mod state;
mod protocol;
mod rewards;
mod render;
mod session;
mod logic;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Settings;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();

  // Shared state: storage, Gemini + ElevenLabs clients, catalog, preloaded content.
  let state = Arc::new(AppState::from_settings(&settings).await?);

  let app = build_router(state.clone());

  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "illustrated", %addr, data_dir = %settings.data_dir.display(), "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "illustrated", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "illustrated", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "illustrated", "Shutdown requested");
}
