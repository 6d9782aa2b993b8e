//! Test doubles and harness shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::catalog::builtin_quests;
use crate::config::Prompts;
use crate::decoder::FencedOrBraces;
use crate::domain::{CoreState, QuestDescriptor};
use crate::gemini::{GenerativeModel, InlineImage, ModelError};
use crate::generator::ContentGenerator;
use crate::narration::{Audio, SpeechSynth, TtsError};
use crate::protocol::ServerWsMessage;
use crate::render::Frame;
use crate::session::QuestSession;
use crate::state::AppState;
use crate::storage::{record_key, StoreName, Storage, StorageError, CORE_STATE_KEY};

/// Four steps: lesson, flashcard, lesson, flashcard.
pub const FRACTIONS_QUEST: &str = r#"{"title":"Fun with Fractions","steps":[
  {"type":"lesson","content":"A pizza cut into 2 equal parts gives two halves."},
  {"type":"flashcard","content":"What do we call one of two equal parts?","options":["A half","A third","A quarter","A whole"],"correctAnswer":"A half"},
  {"type":"lesson","content":"A pizza cut into 4 equal parts gives four quarters."},
  {"type":"flashcard","content":"How many quarters make a whole pizza?","options":["2","3","4","5"],"correctAnswer":"4"}
]}"#;

/// Wrap `json` the way the model usually answers: chatter around a fenced block.
pub fn fenced(json: &str) -> String {
  format!("Here is your quest!\n```json\n{}\n```\nHave fun!", json)
}

/// Image payload `ScriptedModel` returns for a lesson description.
pub fn image_data_for(description: &str) -> String {
  base64::engine::general_purpose::STANDARD.encode(description)
}

// --- Generation service ---

pub struct ScriptedModel {
  text: Option<String>,
  text_delay: Duration,
  image_delays: HashMap<String, Duration>,
  image_failures: HashSet<String>,
  text_calls: AtomicUsize,
  image_calls: AtomicUsize,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  text_prompts: Mutex<Vec<String>>,
  image_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
  fn build(text: Option<String>) -> Self {
    Self {
      text,
      text_delay: Duration::ZERO,
      image_delays: HashMap::new(),
      image_failures: HashSet::new(),
      text_calls: AtomicUsize::new(0),
      image_calls: AtomicUsize::new(0),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
      text_prompts: Mutex::new(Vec::new()),
      image_prompts: Mutex::new(Vec::new()),
    }
  }

  /// Every text call answers `text`; every image call succeeds.
  pub fn with_text(text: &str) -> Self {
    Self::build(Some(text.to_string()))
  }

  /// Every call fails with an HTTP 500.
  pub fn failing() -> Self {
    Self::build(None)
  }

  pub fn text_delay(mut self, d: Duration) -> Self {
    self.text_delay = d;
    self
  }

  pub fn image_delay(mut self, description: &str, d: Duration) -> Self {
    self.image_delays.insert(description.to_string(), d);
    self
  }

  pub fn image_failure(mut self, description: &str) -> Self {
    self.image_failures.insert(description.to_string());
    self
  }

  pub fn text_calls(&self) -> usize {
    self.text_calls.load(Ordering::SeqCst)
  }

  pub fn image_calls(&self) -> usize {
    self.image_calls.load(Ordering::SeqCst)
  }

  pub fn max_concurrent_images(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn last_text_prompt(&self) -> Option<String> {
    self.text_prompts.lock().unwrap().last().cloned()
  }

  pub fn image_prompts(&self) -> Vec<String> {
    self.image_prompts.lock().unwrap().clone()
  }

  fn server_error() -> ModelError {
    ModelError::Http { status: 500, message: "scripted failure".into() }
  }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
  async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
    self.text_calls.fetch_add(1, Ordering::SeqCst);
    self.text_prompts.lock().unwrap().push(prompt.to_string());
    if !self.text_delay.is_zero() {
      tokio::time::sleep(self.text_delay).await;
    }
    self.text.clone().ok_or_else(Self::server_error)
  }

  async fn generate_image(&self, prompt: &str) -> Result<Option<InlineImage>, ModelError> {
    self.image_calls.fetch_add(1, Ordering::SeqCst);
    self.image_prompts.lock().unwrap().push(prompt.to_string());
    let description = prompt.rsplit_once("about: ").map(|(_, d)| d).unwrap_or(prompt).to_string();

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if let Some(d) = self.image_delays.get(&description) {
      tokio::time::sleep(*d).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.text.is_none() || self.image_failures.contains(&description) {
      return Err(Self::server_error());
    }
    Ok(Some(InlineImage { mime_type: "image/png".into(), data: image_data_for(&description) }))
  }
}

// --- Storage ---

#[derive(Default)]
pub struct MemoryStore {
  docs: Mutex<HashMap<StoreName, BTreeMap<String, Value>>>,
  fail: bool,
}

impl MemoryStore {
  /// A store whose every operation fails.
  pub fn failing() -> Self {
    Self { docs: Mutex::default(), fail: true }
  }

  fn check(&self) -> Result<(), StorageError> {
    if self.fail {
      return Err(StorageError::Io(std::io::Error::other("disk unavailable")));
    }
    Ok(())
  }

  pub fn put_quest(&self, json: &str, quest_id: &str) {
    let mut v: Value = serde_json::from_str(json).unwrap();
    v["id"] = Value::String(quest_id.to_string());
    self.docs.lock().unwrap().entry(StoreName::QuestData).or_default().insert(quest_id.to_string(), v);
  }

  pub fn put_core(&self, v: Value) {
    self.docs.lock().unwrap().entry(StoreName::State).or_default().insert(CORE_STATE_KEY.to_string(), v);
  }

  pub fn core(&self) -> Option<CoreState> {
    let docs = self.docs.lock().unwrap();
    let v = docs.get(&StoreName::State)?.get(CORE_STATE_KEY)?;
    serde_json::from_value(v.clone()).ok()
  }

  pub fn quest_records(&self) -> usize {
    self.docs.lock().unwrap().get(&StoreName::QuestData).map_or(0, |d| d.len())
  }
}

#[async_trait]
impl Storage for MemoryStore {
  async fn get(&self, store: StoreName, key: &str) -> Result<Option<Value>, StorageError> {
    self.check()?;
    Ok(self.docs.lock().unwrap().get(&store).and_then(|d| d.get(key).cloned()))
  }

  async fn get_all(&self, store: StoreName) -> Result<Vec<Value>, StorageError> {
    self.check()?;
    Ok(self.docs.lock().unwrap().get(&store).map(|d| d.values().cloned().collect()).unwrap_or_default())
  }

  async fn put(&self, store: StoreName, value: Value, key: Option<&str>) -> Result<(), StorageError> {
    self.check()?;
    let key = record_key(store, &value, key)?;
    self.docs.lock().unwrap().entry(store).or_default().insert(key, value);
    Ok(())
  }
}

// --- Narration ---

pub struct FakeTts {
  fail: bool,
  delay: Duration,
  first_failure: Option<Duration>,
  calls: AtomicUsize,
}

impl FakeTts {
  pub fn ok() -> Self {
    Self {
      fail: false,
      delay: Duration::ZERO,
      first_failure: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn failing() -> Self {
    Self { fail: true, ..Self::ok() }
  }

  pub fn delayed(mut self, d: Duration) -> Self {
    self.delay = d;
    self
  }

  /// The first call fails after `d`; later calls behave as configured.
  pub fn first_call_fails_after(mut self, d: Duration) -> Self {
    self.first_failure = Some(d);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl SpeechSynth for FakeTts {
  async fn synthesize(&self, text: &str) -> Result<Audio, TtsError> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst);
    let (delay, fail) = match self.first_failure {
      Some(d) if n == 0 => (d, true),
      _ => (self.delay, self.fail),
    };
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    if fail {
      return Err(TtsError::Status(401));
    }
    Ok(Audio { mime: "audio/mpeg".into(), bytes: text.as_bytes().to_vec() })
  }
}

// --- Outbox helpers ---

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerWsMessage>) -> Vec<ServerWsMessage> {
  let mut out = Vec::new();
  while let Ok(m) = rx.try_recv() {
    out.push(m);
  }
  out
}

pub fn frames(rx: &mut mpsc::UnboundedReceiver<ServerWsMessage>) -> Vec<Frame> {
  drain(rx)
    .into_iter()
    .filter_map(|m| match m {
      ServerWsMessage::Render { frame } => Some(frame),
      _ => None,
    })
    .collect()
}

pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<ServerWsMessage>) -> Frame {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      match rx.recv().await {
        Some(ServerWsMessage::Render { frame }) => return frame,
        Some(_) => continue,
        None => panic!("outbox closed"),
      }
    }
  })
  .await
  .expect("no frame rendered")
}

// --- Session harness ---

pub struct Harness {
  pub app: Arc<AppState>,
  pub session: Arc<QuestSession>,
  pub model: Arc<ScriptedModel>,
  pub storage: Arc<MemoryStore>,
  pub rx: mpsc::UnboundedReceiver<ServerWsMessage>,
}

impl Harness {
  pub fn quest(&self, quest_id: &str) -> QuestDescriptor {
    self.app.builtins.iter().find(|q| q.id == quest_id).cloned().unwrap()
  }
}

pub fn app_state(model: Arc<ScriptedModel>, storage: Arc<dyn Storage>, tts: Option<Arc<FakeTts>>) -> AppState {
  let generator = ContentGenerator::new(model, Arc::new(FencedOrBraces), Prompts::default());
  AppState::new(generator, tts.map(|t| t as Arc<dyn SpeechSynth>), storage, builtin_quests())
}

fn build(model: ScriptedModel, storage: MemoryStore, tts: Option<Arc<FakeTts>>) -> Harness {
  let model = Arc::new(model);
  let storage = Arc::new(storage);
  let app = Arc::new(app_state(model.clone(), storage.clone(), tts));
  let (tx, rx) = mpsc::unbounded_channel();
  let session = QuestSession::new(app.clone(), tx);
  Harness { app, session, model, storage, rx }
}

pub fn harness(model: ScriptedModel) -> Harness {
  build(model, MemoryStore::default(), None)
}

pub fn harness_with(model: ScriptedModel, storage: MemoryStore) -> Harness {
  build(model, storage, None)
}

pub fn harness_with_tts(model: ScriptedModel, tts: Arc<FakeTts>) -> Harness {
  build(model, MemoryStore::default(), Some(tts))
}
