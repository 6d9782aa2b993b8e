//! Render engine: turns a session snapshot into the UI tree sent to the client.
//!
//! Every render cycle takes a `RenderToken` when it starts. Quest view rendering may
//! suspend while content is resolved; before committing, a cycle checks that no newer
//! cycle has started and otherwise drops its frame entirely. Frame building itself is
//! pure (`frame`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::domain::{QuestContent, Step};
use crate::session::{AnswerMark, ScreenKind, SessionState};

pub const APP_TITLE: &str = "IllustratED";
const LOAD_ERROR: &str = "Oops! Something went wrong loading the quest.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderToken(u64);

#[derive(Default)]
pub struct RenderEngine {
  cycle: AtomicU64,
  commit_lock: Mutex<()>,
}

impl RenderEngine {
  pub fn begin(&self) -> RenderToken {
    RenderToken(self.cycle.fetch_add(1, Ordering::SeqCst) + 1)
  }

  pub fn is_current(&self, token: RenderToken) -> bool {
    self.cycle.load(Ordering::SeqCst) == token.0
  }

  /// Run `commit` only if `token` is still the latest cycle. Commits are serialized,
  /// so a stale cycle can never write after a newer one.
  pub fn commit(&self, token: RenderToken, commit: impl FnOnce()) -> bool {
    let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
    if !self.is_current(token) {
      return false;
    }
    commit();
    true
  }
}

/// Outcome of resolving quest content for the quest view.
#[derive(Clone, Debug)]
pub enum Resolution {
  Ready(Arc<QuestContent>),
  Failed(QuestContent),
}

// --- UI tree ---

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Frame {
  pub header: Header,
  pub main: Screen,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Header {
  pub title: &'static str,
  pub sparkles: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
  Loading { message: String },
  QuestSelection { heading: String, subtitle: &'static str, topic_placeholder: &'static str, quests: Vec<QuestTab> },
  QuestView { quest_id: String, progress: Progress, step: StepView },
  QuestError { message: String, back_label: &'static str },
  StickerBook { message: &'static str, stickers: Vec<StickerTile> },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestTab {
  pub quest_id: String,
  pub emoji: String,
  pub title: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Progress {
  /// One-based.
  pub step: usize,
  pub total: usize,
  pub percent: f32,
  pub label: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepView {
  Lesson { content: String, image_url: Option<String> },
  Flashcard { question: String, answered: bool, options: Vec<OptionButton> },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OptionButton {
  pub label: String,
  pub mark: Option<Mark>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
  Correct,
  Incorrect,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StickerTile {
  pub emoji: String,
  pub title: String,
  /// Quest to replay on click, when it is still in the catalog.
  pub quest_id: Option<String>,
}

// --- Pure builders ---

/// Build the frame for `state`. `content` is the resolved quest content when the
/// quest view is showing; other screens ignore it.
pub fn frame(state: &SessionState, content: Option<&Resolution>) -> Frame {
  let main = match (&state.loading, state.screen) {
    (Some(message), _) => Screen::Loading { message: message.clone() },
    (None, ScreenKind::QuestSelection) => quest_selection(state),
    (None, ScreenKind::QuestView) => match content {
      Some(r) => quest_view(state, r),
      None => quest_error(LOAD_ERROR),
    },
    (None, ScreenKind::StickerBook) => sticker_book(state),
  };
  Frame { header: Header { title: APP_TITLE, sparkles: state.sparkles }, main }
}

fn quest_selection(state: &SessionState) -> Screen {
  Screen::QuestSelection {
    heading: format!("Welcome to {}", APP_TITLE),
    subtitle: "This app is designed for kids of age 5 - 10",
    topic_placeholder: "Generate Quests for any topics in Math, Science and Social Studies",
    quests: state
      .quests
      .iter()
      .map(|q| QuestTab { quest_id: q.id.clone(), emoji: q.emoji.clone(), title: q.title.clone() })
      .collect(),
  }
}

fn quest_error(message: &str) -> Screen {
  Screen::QuestError { message: message.into(), back_label: "Back to Quests" }
}

fn quest_view(state: &SessionState, resolution: &Resolution) -> Screen {
  let content = match resolution {
    Resolution::Ready(c) => c.as_ref(),
    Resolution::Failed(c) => return quest_error(c.steps.first().map(Step::content).unwrap_or(LOAD_ERROR)),
  };
  let Some(step) = content.steps.get(state.step_index) else {
    return quest_error(LOAD_ERROR);
  };

  let total = content.steps.len();
  let n = state.step_index + 1;
  let progress = Progress {
    step: n,
    total,
    percent: (n as f32 / total as f32) * 100.0,
    label: format!("Step {} of {}", n, total),
  };

  let step = match step {
    Step::Lesson { content, image_url } => StepView::Lesson { content: content.clone(), image_url: image_url.clone() },
    Step::Flashcard { content, options, .. } => StepView::Flashcard {
      question: content.clone(),
      answered: state.answer.is_some(),
      options: options
        .iter()
        .map(|o| OptionButton { label: o.clone(), mark: mark_for(state.answer.as_ref(), o) })
        .collect(),
    },
  };

  Screen::QuestView { quest_id: content.id.clone(), progress, step }
}

fn mark_for(answer: Option<&AnswerMark>, option: &str) -> Option<Mark> {
  let a = answer?;
  if option == a.correct_answer {
    Some(Mark::Correct)
  } else if option == a.chosen {
    Some(Mark::Incorrect)
  } else {
    None
  }
}

fn sticker_book(state: &SessionState) -> Screen {
  let message = if state.stickers.is_empty() {
    "Complete quests to earn stickers!"
  } else {
    "Click a sticker to replay a quest!"
  };
  Screen::StickerBook {
    message,
    stickers: state
      .stickers
      .iter()
      .map(|s| StickerTile {
        emoji: s.emoji.clone(),
        title: s.title.clone(),
        quest_id: state.quests.iter().find(|q| q.title == s.title).map(|q| q.id.clone()),
      })
      .collect(),
  }
}
