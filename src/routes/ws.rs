//! WebSocket upgrade + session loop. Each connection owns one `QuestSession`;
//! client messages are dispatched in order, and everything the session emits
//! (frames, rewards, audio) is forwarded from its outbox.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::QuestSession;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "illustrated", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "illustrated", "WebSocket connected");
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();
  let session = QuestSession::new(state, tx);
  session.init().await;

  loop {
    tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "illustrated", "WS received: {:?}", &msg);
            dispatch(&session, msg);
          }
          Err(e) => session.notify(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
        },
        Some(Ok(Message::Ping(payload))) => {
          if socket.send(Message::Pong(payload)).await.is_err() {
            break;
          }
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          debug!(target: "illustrated", error = %e, "WS receive error");
          break;
        }
      },
      outgoing = rx.recv() => {
        let Some(msg) = outgoing else { break };
        let out = serde_json::to_string(&msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });
        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "illustrated", error = %e, "WS send error");
          break;
        }
      }
    }
  }

  session.narrator.stop();
  info!(target: "illustrated", "WebSocket disconnected");
}

fn dispatch(session: &Arc<QuestSession>, msg: ClientWsMessage) {
  match msg {
    ClientWsMessage::Ping => session.notify(ServerWsMessage::Pong),

    ClientWsMessage::SelectQuest { quest_id } => {
      if !session.select_quest_by_id(&quest_id) {
        session.notify(ServerWsMessage::Error { message: format!("Unknown questId: {}", quest_id) });
      }
    }

    // Generation takes a while; keep serving other events meanwhile.
    ClientWsMessage::SubmitTopic { topic, age_group } => {
      let session = session.clone();
      tokio::spawn(async move { session.submit_topic(&topic, age_group.as_deref()).await });
    }

    ClientWsMessage::Answer { option } => session.answer(&option),
    ClientWsMessage::NextStep => session.next_step(),
    ClientWsMessage::GoHome => session.go_home(),
    ClientWsMessage::OpenStickerBook => session.open_sticker_book(),

    ClientWsMessage::ReplaySticker { title } => {
      if !session.replay_sticker(&title) {
        session.notify(ServerWsMessage::Error { message: format!("No quest found for sticker: {}", title) });
      }
    }

    ClientWsMessage::Listen => session.listen(),
    ClientWsMessage::NarrationEnded | ClientWsMessage::NarrationFailed => session.narration_finished(),
  }
}
