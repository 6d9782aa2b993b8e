//! Narration: text-to-speech through ElevenLabs, played by the client.
//!
//! One utterance at a time per session. A request while busy is dropped, not queued.
//! Busy clears when the client reports playback ended/failed, when synthesis fails,
//! or on `stop()`. A synthesis result that arrives after a `stop()` is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::NarrationCfg;
use crate::protocol::{send, Outbox, ServerWsMessage};

#[derive(Debug, Error)]
pub enum TtsError {
  #[error("request failed: {0}")]
  Request(String),
  #[error("TTS request failed with status {0}")]
  Status(u16),
}

/// Synthesized audio ready for playback.
#[derive(Clone, Debug)]
pub struct Audio {
  pub mime: String,
  pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SpeechSynth: Send + Sync {
  async fn synthesize(&self, text: &str) -> Result<Audio, TtsError>;
}

#[derive(Clone)]
pub struct ElevenLabs {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  voice_id: String,
  voice: NarrationCfg,
}

impl ElevenLabs {
  /// Construct the client if a key is present; otherwise return None.
  pub fn new(api_key: Option<String>, base_url: &str, voice_id: &str, voice: NarrationCfg) -> Option<Self> {
    let api_key = api_key?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().ok()?;
    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), voice_id: voice_id.to_string(), voice })
  }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
  text: &'a str,
  model_id: &'a str,
  voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
  speed: f32,
  stability: f32,
  similarity_boost: f32,
}

#[async_trait]
impl SpeechSynth for ElevenLabs {
  #[instrument(level = "info", skip(self, text), fields(text_len = text.len(), voice = %self.voice_id))]
  async fn synthesize(&self, text: &str) -> Result<Audio, TtsError> {
    let url = format!("{}/text-to-speech/{}", self.base_url, self.voice_id);
    let body = TtsRequest {
      text,
      model_id: &self.voice.model_id,
      voice_settings: VoiceSettings {
        speed: self.voice.speed,
        stability: self.voice.stability,
        similarity_boost: self.voice.similarity_boost,
      },
    };

    let res = self.client.post(&url)
      .header(ACCEPT, "audio/mpeg")
      .header(CONTENT_TYPE, "application/json")
      .header("xi-api-key", &self.api_key)
      .json(&body).send().await.map_err(|e| TtsError::Request(e.to_string()))?;

    if !res.status().is_success() {
      return Err(TtsError::Status(res.status().as_u16()));
    }
    let mime = res
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("audio/mpeg")
      .to_string();
    let bytes = res.bytes().await.map_err(|e| TtsError::Request(e.to_string()))?.to_vec();
    info!(audio_bytes = bytes.len(), "Narration synthesized");
    Ok(Audio { mime, bytes })
  }
}

pub struct Narrator {
  tts: Option<Arc<dyn SpeechSynth>>,
  busy: AtomicBool,
  epoch: AtomicU64,
  outbox: Outbox,
}

impl Narrator {
  pub fn new(tts: Option<Arc<dyn SpeechSynth>>, outbox: Outbox) -> Self {
    Self { tts, busy: AtomicBool::new(false), epoch: AtomicU64::new(0), outbox }
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::SeqCst)
  }

  /// Fire-and-forget narration of `text`.
  pub fn speak(self: &Arc<Self>, text: &str) {
    if self.is_busy() {
      debug!(target: "illustrated", "Narration already in progress; request dropped");
      return;
    }
    send(&self.outbox, ServerWsMessage::StopAudio);

    let Some(tts) = self.tts.clone() else {
      error!(target: "illustrated", "ElevenLabs API key not found. Narration is disabled.");
      return;
    };
    if self.busy.swap(true, Ordering::SeqCst) {
      return;
    }

    let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
    let this = self.clone();
    let text = text.to_string();
    tokio::spawn(async move {
      match tts.synthesize(&text).await {
        Ok(audio) if this.epoch.load(Ordering::SeqCst) == epoch => {
          let audio_base64 = base64::engine::general_purpose::STANDARD.encode(&audio.bytes);
          send(&this.outbox, ServerWsMessage::PlayAudio { mime: audio.mime, audio_base64 });
        }
        Ok(_) => debug!(target: "illustrated", "Narration stopped before synthesis finished; audio discarded"),
        Err(e) => {
          error!(target: "illustrated", error = %e, "Failed to narrate text");
          // A newer narration owns the busy flag now.
          if this.epoch.load(Ordering::SeqCst) == epoch {
            this.finish();
          }
        }
      }
    });
  }

  /// Stop any playback and clear the busy flag. Safe to call when idle.
  pub fn stop(&self) {
    self.epoch.fetch_add(1, Ordering::SeqCst);
    send(&self.outbox, ServerWsMessage::StopAudio);
    self.finish();
  }

  /// Playback ended or failed on the client.
  pub fn finish(&self) {
    self.busy.store(false, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{drain, FakeTts};
  use tokio::sync::mpsc;

  fn narrator(tts: Option<Arc<FakeTts>>) -> (Arc<Narrator>, mpsc::UnboundedReceiver<ServerWsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tts = tts.map(|t| t as Arc<dyn SpeechSynth>);
    (Arc::new(Narrator::new(tts, tx)), rx)
  }

  fn plays(msgs: &[ServerWsMessage]) -> usize {
    msgs.iter().filter(|m| matches!(m, ServerWsMessage::PlayAudio { .. })).count()
  }

  #[tokio::test(start_paused = true)]
  async fn second_request_while_busy_is_dropped() {
    let tts = Arc::new(FakeTts::ok().delayed(Duration::from_millis(100)));
    let (n, mut rx) = narrator(Some(tts.clone()));
    n.speak("The sun is a star.");
    n.speak("Second request");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(tts.calls(), 1);
    let msgs = drain(&mut rx);
    assert_eq!(plays(&msgs), 1);
    assert!(n.is_busy(), "busy until the client reports playback ended");

    n.finish();
    n.speak("Third request");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tts.calls(), 2);
  }

  #[tokio::test]
  async fn missing_credential_is_silent_and_not_busy() {
    let (n, mut rx) = narrator(None);
    n.speak("hello");
    assert!(!n.is_busy());
    let msgs = drain(&mut rx);
    assert_eq!(plays(&msgs), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn synthesis_failure_clears_busy() {
    let tts = Arc::new(FakeTts::failing());
    let (n, mut rx) = narrator(Some(tts));
    n.speak("hello");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!n.is_busy());
    assert_eq!(plays(&drain(&mut rx)), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn stop_discards_in_flight_audio() {
    let tts = Arc::new(FakeTts::ok().delayed(Duration::from_millis(100)));
    let (n, mut rx) = narrator(Some(tts));
    n.speak("hello");
    n.stop();
    assert!(!n.is_busy());
    tokio::time::sleep(Duration::from_millis(200)).await;
    let msgs = drain(&mut rx);
    assert_eq!(plays(&msgs), 0);
    assert!(msgs.iter().any(|m| matches!(m, ServerWsMessage::StopAudio)));
  }

  #[tokio::test(start_paused = true)]
  async fn late_failure_of_a_stopped_narration_keeps_the_newer_one_busy() {
    let tts = Arc::new(FakeTts::ok().delayed(Duration::from_millis(500)).first_call_fails_after(Duration::from_millis(50)));
    let (n, mut rx) = narrator(Some(tts.clone()));
    n.speak("first");
    n.stop();
    n.speak("second");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(n.is_busy(), "the first request's failure must not release the second");
    n.speak("third");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(tts.calls(), 2);
    assert_eq!(plays(&drain(&mut rx)), 1);
  }

  #[test]
  fn request_body_matches_tts_contract() {
    let cfg = NarrationCfg::default();
    let body = TtsRequest {
      text: "hi",
      model_id: &cfg.model_id,
      voice_settings: VoiceSettings { speed: cfg.speed, stability: cfg.stability, similarity_boost: cfg.similarity_boost },
    };
    let v = serde_json::to_value(body).unwrap();
    assert_eq!(v["model_id"], "eleven_multilingual_v2");
    assert_eq!(v["voice_settings"]["similarity_boost"], 0.75);
  }

  #[test]
  fn client_requires_a_key() {
    assert!(ElevenLabs::new(None, "http://x", "v", NarrationCfg::default()).is_none());
    assert!(ElevenLabs::new(Some("k".into()), "http://x/", "v", NarrationCfg::default()).is_some());
  }
}
