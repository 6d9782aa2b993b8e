//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{CoreState, QuestDescriptor};
use crate::render::Frame;
use crate::rewards::Particle;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    SelectQuest {
        #[serde(rename = "questId")]
        quest_id: String,
    },
    SubmitTopic {
        topic: String,
        #[serde(rename = "ageGroup", default)]
        age_group: Option<String>,
    },
    Answer {
        option: String,
    },
    NextStep,
    GoHome,
    OpenStickerBook,
    ReplaySticker {
        title: String,
    },
    Listen,
    NarrationEnded,
    NarrationFailed,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Render {
        frame: Frame,
    },
    Reward {
        message: String,
        major: bool,
    },
    Confetti {
        particles: Vec<Particle>,
    },
    Alert {
        message: String,
    },
    PlayAudio {
        mime: String,
        #[serde(rename = "audioBase64")]
        audio_base64: String,
    },
    StopAudio,
    Error {
        message: String,
    },
}

/// Per-connection channel towards the WebSocket writer.
pub type Outbox = mpsc::UnboundedSender<ServerWsMessage>;

/// Queue a message for the client. A closed connection is not an error.
pub fn send(outbox: &Outbox, msg: ServerWsMessage) {
    if outbox.send(msg).is_err() {
        debug!(target: "illustrated", "Client gone; message dropped");
    }
}

//
// HTTP response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub generation: bool,
    pub narration: bool,
}

#[derive(Serialize)]
pub struct QuestsOut {
    pub quests: Vec<QuestDescriptor>,
}

#[derive(Serialize)]
pub struct ProgressOut {
    #[serde(flatten)]
    pub progress: CoreState,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
