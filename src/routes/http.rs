//! HTTP endpoint handlers. Read-only views over the catalog and stored progress;
//! all gameplay goes through the WebSocket session.

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, Json, response::IntoResponse};
use tracing::{error, info, instrument};

use crate::catalog::merge_custom;
use crate::domain::CoreState;
use crate::protocol::*;
use crate::state::AppState;
use crate::storage::{load_core_state, StorageError};

type ApiError = (StatusCode, Json<ErrorOut>);

fn storage_failure(e: StorageError) -> ApiError {
  error!(target: "illustrated", error = %e, "Failed to read stored progress");
  (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorOut { error: "Stored progress is unavailable.".into() }))
}

async fn stored_progress(state: &AppState) -> Result<CoreState, ApiError> {
  Ok(load_core_state(state.storage.as_ref()).await.map_err(storage_failure)?.unwrap_or_default())
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, generation: state.generation_enabled, narration: state.tts.is_some() })
}

/// The catalog never fails: unreadable progress serves the built-ins alone.
#[instrument(level = "info", skip(state))]
pub async fn http_quests(State(state): State<Arc<AppState>>) -> Json<QuestsOut> {
  let quests = match load_core_state(state.storage.as_ref()).await {
    Ok(progress) => merge_custom(&state.builtins, &progress.unwrap_or_default().quests),
    Err(e) => {
      error!(target: "illustrated", error = %e, "Failed to read custom quests; serving built-ins");
      state.builtins.clone()
    }
  };
  info!(target: "illustrated", quests = quests.len(), "HTTP quest catalog served");
  Json(QuestsOut { quests })
}

#[instrument(level = "info", skip(state))]
pub async fn http_progress(State(state): State<Arc<AppState>>) -> Result<Json<ProgressOut>, ApiError> {
  let progress = stored_progress(&state).await?;
  info!(target: "illustrated", sparkles = progress.sparkles, stickers = progress.stickers.len(), "HTTP progress served");
  Ok(Json(ProgressOut { progress }))
}

#[cfg(test)]
mod tests {
  use axum::body::Body;
  use axum::http::Request;
  use tower::ServiceExt;

  use crate::routes::build_router;
  use crate::testing::{app_state, MemoryStore, ScriptedModel};

  use super::*;

  async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let res = build_router(Arc::new(state))
      .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
      .await
      .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  fn state_with(storage: MemoryStore) -> AppState {
    app_state(Arc::new(ScriptedModel::failing()), Arc::new(storage), None)
  }

  #[tokio::test]
  async fn health_reports_configured_services() {
    let (status, v) = get_json(state_with(MemoryStore::default()), "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["ok"], true);
    assert_eq!(v["narration"], false);
  }

  #[tokio::test]
  async fn quests_include_stored_custom_quests() {
    let storage = MemoryStore::default();
    storage.put_core(serde_json::json!({
      "sparkles": 35,
      "stickers": [],
      "quests": [{"id": "custom_1", "title": "Rockets", "emoji": "🚀", "prompt": "rockets"}]
    }));
    let (_, v) = get_json(state_with(storage), "/api/v1/quests").await;
    let quests = v["quests"].as_array().unwrap();
    assert_eq!(quests.len(), 14);
    assert_eq!(quests.last().unwrap()["id"], "custom_1");
  }

  #[tokio::test]
  async fn progress_defaults_when_nothing_is_stored() {
    let (status, v) = get_json(state_with(MemoryStore::default()), "/api/v1/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v, serde_json::json!({"sparkles": 0, "stickers": [], "quests": []}));
  }

  #[tokio::test]
  async fn quests_fall_back_to_builtins_when_storage_fails() {
    let (status, v) = get_json(state_with(MemoryStore::failing()), "/api/v1/quests").await;
    assert_eq!(status, StatusCode::OK);
    let quests = v["quests"].as_array().unwrap();
    assert_eq!(quests.len(), 13);
    assert!(quests.iter().all(|q| !q["id"].as_str().unwrap().starts_with("custom_")));
  }

  #[tokio::test]
  async fn storage_failure_is_a_server_error() {
    let (status, v) = get_json(state_with(MemoryStore::failing()), "/api/v1/progress").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(v["error"].is_string());
  }
}
