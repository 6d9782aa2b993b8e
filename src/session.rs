//! Per-connection session: the state container every handler and render cycle works on.
//!
//! All mutation goes through `QuestSession::set_state`, which starts a render cycle
//! and snapshots progress to storage without waiting for either.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::catalog::merge_custom;
use crate::domain::{CoreState, QuestContent, QuestDescriptor, Sticker};
use crate::narration::Narrator;
use crate::protocol::{send, Outbox, ServerWsMessage};
use crate::render::{self, RenderEngine, RenderToken, Resolution};
use crate::state::AppState;
use crate::storage::{load_core_state, save_core_state, Storage};

pub const LOADING_ADVENTURE: &str = "Loading your adventure...";
pub const BUILDING_QUEST: &str = "Building your new quest...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenKind {
  QuestSelection,
  QuestView,
  StickerBook,
}

/// The answer given on the current flashcard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerMark {
  pub chosen: String,
  pub correct_answer: String,
}

#[derive(Clone, Debug)]
pub struct SessionState {
  pub screen: ScreenKind,
  pub current_quest: Option<QuestDescriptor>,
  pub step_index: usize,
  /// `Some(message)` while loading.
  pub loading: Option<String>,
  /// Set once the current flashcard has been answered.
  pub answer: Option<AnswerMark>,
  /// Set once the current quest has been finished, until the next navigation.
  pub completed: bool,
  /// Quest whose generation failed in this visit; shown as an error instead of retrying.
  pub failed_quest: Option<String>,
  pub sparkles: u32,
  pub stickers: Vec<Sticker>,
  /// Built-ins followed by custom quests.
  pub quests: Vec<QuestDescriptor>,
}

impl SessionState {
  pub fn new(quests: Vec<QuestDescriptor>) -> Self {
    Self {
      screen: ScreenKind::QuestSelection,
      current_quest: None,
      step_index: 0,
      loading: None,
      answer: None,
      completed: false,
      failed_quest: None,
      sparkles: 0,
      stickers: Vec::new(),
      quests,
    }
  }

  /// The persisted part of the session. Only custom quests are stored.
  pub fn core_state(&self) -> CoreState {
    CoreState {
      sparkles: self.sparkles,
      stickers: self.stickers.clone(),
      quests: self.quests.iter().filter(|q| q.is_custom()).cloned().collect(),
    }
  }

  pub fn find_quest(&self, quest_id: &str) -> Option<&QuestDescriptor> {
    self.quests.iter().find(|q| q.id == quest_id)
  }
}

pub struct QuestSession {
  pub(crate) app: Arc<AppState>,
  state: Mutex<SessionState>,
  renderer: RenderEngine,
  pub(crate) narrator: Arc<Narrator>,
  pub(crate) outbox: Outbox,
  progress: watch::Sender<Option<CoreState>>,
}

/// Single writer for one session's progress. Snapshots are written in the order they
/// were taken; a burst collapses into its latest snapshot. Exits with the session.
fn spawn_progress_writer(storage: Arc<dyn Storage>) -> watch::Sender<Option<CoreState>> {
  let (tx, mut rx) = watch::channel(None::<CoreState>);
  tokio::spawn(async move {
    while rx.changed().await.is_ok() {
      let Some(core) = rx.borrow_and_update().clone() else { continue };
      if let Err(e) = save_core_state(storage.as_ref(), &core).await {
        error!(target: "illustrated", error = %e, "Failed to save progress");
      }
    }
  });
  tx
}

impl QuestSession {
  /// Must be called inside the Tokio runtime; the progress writer starts here.
  pub fn new(app: Arc<AppState>, outbox: Outbox) -> Arc<Self> {
    let state = SessionState::new(app.builtins.clone());
    let narrator = Arc::new(Narrator::new(app.tts.clone(), outbox.clone()));
    let progress = spawn_progress_writer(app.storage.clone());
    Arc::new(Self { app, state: Mutex::new(state), renderer: RenderEngine::default(), narrator, outbox, progress })
  }

  fn lock(&self) -> MutexGuard<'_, SessionState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Copy of the current state.
  pub fn snapshot(&self) -> SessionState {
    self.lock().clone()
  }

  /// Apply `update`, then render and persist. Returns whatever `update` returns.
  pub fn set_state<R>(self: &Arc<Self>, update: impl FnOnce(&mut SessionState) -> R) -> R {
    let (out, snapshot) = {
      let mut s = self.lock();
      let out = update(&mut s);
      (out, s.clone())
    };
    self.publish(snapshot, true);
    out
  }

  /// Like `set_state`, but `update` may decline by returning `None` without mutating;
  /// nothing is rendered or persisted then.
  pub fn set_state_if<R>(self: &Arc<Self>, update: impl FnOnce(&mut SessionState) -> Option<R>) -> Option<R> {
    let (out, snapshot) = {
      let mut s = self.lock();
      let out = update(&mut s)?;
      (out, s.clone())
    };
    self.publish(snapshot, true);
    Some(out)
  }

  fn publish(self: &Arc<Self>, snapshot: SessionState, persist: bool) {
    if persist {
      self.persist(snapshot.core_state());
    }
    self.request_render(snapshot);
  }

  pub fn notify(&self, msg: ServerWsMessage) {
    send(&self.outbox, msg);
  }

  /// Restore saved progress and merge custom quests after the built-ins.
  #[instrument(level = "info", skip(self))]
  pub async fn init(self: &Arc<Self>) {
    // Render only: the in-memory defaults must not reach storage before the load.
    let snapshot = {
      let mut s = self.lock();
      s.loading = Some(LOADING_ADVENTURE.into());
      s.clone()
    };
    self.publish(snapshot, false);
    match load_core_state(self.app.storage.as_ref()).await {
      Ok(Some(core)) => {
        let quests = merge_custom(&self.app.builtins, &core.quests);
        info!(target: "illustrated", sparkles = core.sparkles, stickers = core.stickers.len(), quests = quests.len(), "Progress restored");
        let mut s = self.lock();
        s.sparkles = core.sparkles;
        s.stickers = core.stickers;
        s.quests = quests;
      }
      Ok(None) => debug!(target: "illustrated", "No saved progress; starting fresh"),
      Err(e) => error!(target: "illustrated", error = %e, "Initialization failed; continuing with defaults"),
    }
    self.set_state(|s| s.loading = None);
  }

  fn persist(&self, core: CoreState) {
    self.progress.send_replace(Some(core));
  }

  fn request_render(self: &Arc<Self>, snapshot: SessionState) {
    let token = self.renderer.begin();
    let this = self.clone();
    tokio::spawn(async move { this.render_cycle(token, snapshot).await });
  }

  async fn render_cycle(self: Arc<Self>, token: RenderToken, snapshot: SessionState) {
    let resolution = match (&snapshot.loading, snapshot.screen, &snapshot.current_quest) {
      (None, ScreenKind::QuestView, Some(quest)) if snapshot.failed_quest.as_ref() == Some(&quest.id) => {
        Some(Resolution::Failed(QuestContent::fallback(&quest.id)))
      }
      (None, ScreenKind::QuestView, Some(quest)) => {
        let r = self.quest_data(quest).await;
        if !self.renderer.is_current(token) {
          debug!(target: "illustrated", quest_id = %quest.id, "Stale render cycle discarded");
          return;
        }
        Some(r)
      }
      _ => None,
    };

    let frame = render::frame(&snapshot, resolution.as_ref());
    if !self.renderer.commit(token, || send(&self.outbox, ServerWsMessage::Render { frame })) {
      debug!(target: "illustrated", "Stale render cycle discarded before commit");
    }
  }

  /// Content for `quest`: memory cache, then storage, then generation (shown as loading).
  /// Generation for one quest id is single-flight; later waiters reuse the cached result.
  #[instrument(level = "info", skip(self, quest), fields(quest_id = %quest.id))]
  pub async fn quest_data(self: &Arc<Self>, quest: &QuestDescriptor) -> Resolution {
    let library = &self.app.library;
    if let Some(c) = library.cached(&quest.id) {
      return Resolution::Ready(c);
    }

    let slot = library.slot(&quest.id);
    // Another session is generating this quest: show loading while waiting for it.
    let (_flight, waited) = match slot.try_lock() {
      Ok(guard) => (guard, false),
      Err(_) => {
        self.set_state(|s| s.loading = Some(BUILDING_QUEST.into()));
        (slot.lock().await, true)
      }
    };
    let found = match library.cached(&quest.id) {
      Some(c) => Some(c),
      None => library.stored(&quest.id).await,
    };
    if let Some(c) = found {
      if waited {
        self.set_state(|s| s.loading = None);
      }
      return Resolution::Ready(c);
    }

    if !waited {
      self.set_state(|s| s.loading = Some(BUILDING_QUEST.into()));
    }
    let content = self.app.generator.generate(quest).await;
    if content.is_fallback() {
      self.set_state(|s| {
        s.loading = None;
        s.failed_quest = Some(quest.id.clone());
      });
      return Resolution::Failed(content);
    }
    let cached = library.store(content).await;
    self.set_state(|s| s.loading = None);
    Resolution::Ready(cached)
  }
}
