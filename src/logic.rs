//! User-facing behaviors shared by every transport: navigation, answering,
//! advancing through a quest, rewards, custom topics and narration.
//!
//! Handlers decide and mutate inside a single `set_state_if` call, so an event that
//! arrives at the wrong moment (a second answer, a stale timer, Next on a flashcard)
//! is ignored without a render.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::catalog::custom_quest;
use crate::domain::{QuestDescriptor, Step, Sticker};
use crate::protocol::ServerWsMessage;
use crate::rewards::{
  affirmation, completion_message, confetti, lesson_reward, ANSWER_DELAY, COMPLETION_DELAY, CORRECT_ANSWER_SPARKLES,
  LESSON_SPARKLES,
};
use crate::session::{AnswerMark, QuestSession, ScreenKind, SessionState, BUILDING_QUEST};

const CUSTOM_FAILED: &str = "Oops! I couldn't create a quest for that topic. Please try another one!";

/// Identifies the step a delayed transition was scheduled from.
#[derive(Clone, Debug, PartialEq, Eq)]
struct StepKey {
  quest_id: String,
  step_index: usize,
}

impl StepKey {
  fn of(s: &SessionState) -> Option<Self> {
    let quest = s.current_quest.as_ref()?;
    Some(Self { quest_id: quest.id.clone(), step_index: s.step_index })
  }
}

enum Trigger {
  /// The Next button, offered on lessons only.
  NextButton,
  /// The pause after answering the flashcard at this step.
  AfterAnswer(StepKey),
}

enum Advanced {
  Step { lesson_reward: bool },
  Completed { quest_id: String },
}

fn open_quest(s: &mut SessionState, quest: QuestDescriptor) {
  s.current_quest = Some(quest);
  s.step_index = 0;
  s.screen = ScreenKind::QuestView;
  s.answer = None;
  s.completed = false;
  s.failed_quest = None;
}

impl QuestSession {
  /// Open `quest` at its first step.
  #[instrument(level = "info", skip(self, quest), fields(quest_id = %quest.id))]
  pub fn select_quest(self: &Arc<Self>, quest: QuestDescriptor) {
    self.narrator.stop();
    self.set_state(|s| open_quest(s, quest));
  }

  /// Open a quest from the session's list. Returns false for an unknown id.
  pub fn select_quest_by_id(self: &Arc<Self>, quest_id: &str) -> bool {
    let quest = self.snapshot().find_quest(quest_id).cloned();
    match quest {
      Some(q) => {
        self.select_quest(q);
        true
      }
      None => {
        debug!(target: "quest", %quest_id, "Unknown quest id");
        false
      }
    }
  }

  /// Generate a quest for a free-text topic and open it.
  #[instrument(level = "info", skip(self, topic), fields(topic_len = topic.len()))]
  pub async fn submit_topic(self: &Arc<Self>, topic: &str, age_group: Option<&str>) {
    let topic = topic.trim();
    if topic.is_empty() {
      return;
    }

    self.set_state(|s| s.loading = Some(BUILDING_QUEST.into()));
    match self.app.generator.generate_custom(topic, age_group).await {
      Ok(custom) => {
        let quest = custom_quest(&custom.title, &custom.emoji, topic);
        let mut content = custom.content;
        content.id = quest.id.clone();
        self.app.library.store(content).await;
        info!(target: "quest", quest_id = %quest.id, title = %quest.title, "Custom quest added");
        self.set_state(|s| {
          s.quests.push(quest.clone());
          open_quest(s, quest);
          s.loading = None;
        });
      }
      Err(e) => {
        error!(target: "quest", error = %e, "Failed to create custom quest");
        self.notify(ServerWsMessage::Alert { message: CUSTOM_FAILED.into() });
        self.set_state(|s| s.loading = None);
      }
    }
  }

  /// Answer the current flashcard. Only the first answer on a card counts.
  #[instrument(level = "info", skip(self, option))]
  pub fn answer(self: &Arc<Self>, option: &str) {
    let library = &self.app.library;
    let accepted = self.set_state_if(|s| {
      if s.loading.is_some() || s.screen != ScreenKind::QuestView || s.answer.is_some() || s.completed {
        return None;
      }
      let key = StepKey::of(s)?;
      let content = library.cached(&key.quest_id)?;
      let Step::Flashcard { options, correct_answer, .. } = content.steps.get(s.step_index)? else {
        return None;
      };
      if !options.iter().any(|o| o == option) {
        return None;
      }

      let correct = option == correct_answer;
      s.answer = Some(AnswerMark { chosen: option.to_string(), correct_answer: correct_answer.clone() });
      if correct {
        s.sparkles += CORRECT_ANSWER_SPARKLES;
      }
      Some((correct, key))
    });

    let Some((correct, key)) = accepted else {
      debug!(target: "quest", "Answer ignored");
      return;
    };
    info!(target: "quest", quest_id = %key.quest_id, step = key.step_index, %correct, "Flashcard answered");
    if correct {
      self.notify(ServerWsMessage::Confetti { particles: confetti() });
      self.notify(ServerWsMessage::Reward { message: affirmation(), major: false });
    }

    let this = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(ANSWER_DELAY).await;
      this.advance(Trigger::AfterAnswer(key));
    });
  }

  /// The Next button on a lesson.
  pub fn next_step(self: &Arc<Self>) {
    self.advance(Trigger::NextButton);
  }

  fn advance(self: &Arc<Self>, trigger: Trigger) {
    // A tap on Next always silences narration. A stale timer must not cut off new audio.
    if matches!(trigger, Trigger::NextButton) {
      self.narrator.stop();
    }
    let library = &self.app.library;
    let outcome = self.set_state_if(|s| {
      if s.loading.is_some() || s.screen != ScreenKind::QuestView || s.completed {
        return None;
      }
      let quest = s.current_quest.clone()?;
      let content = library.cached(&quest.id)?;
      let step = content.steps.get(s.step_index)?;
      match &trigger {
        Trigger::NextButton if !step.is_lesson() => return None,
        Trigger::AfterAnswer(key) if StepKey::of(s).as_ref() != Some(key) || s.answer.is_none() => return None,
        _ => {}
      }

      if s.step_index + 1 < content.steps.len() {
        let lesson = step.is_lesson();
        if lesson {
          s.sparkles += LESSON_SPARKLES;
        }
        s.step_index += 1;
        s.answer = None;
        return Some(Advanced::Step { lesson_reward: lesson });
      }

      s.completed = true;
      if !s.stickers.iter().any(|st| st.title == quest.title) {
        s.stickers.push(Sticker { emoji: quest.emoji.clone(), title: quest.title.clone() });
      }
      Some(Advanced::Completed { quest_id: quest.id })
    });

    let Some(outcome) = outcome else {
      debug!(target: "quest", "Advance ignored");
      return;
    };
    if !matches!(trigger, Trigger::NextButton) {
      self.narrator.stop();
    }
    match outcome {
      Advanced::Step { lesson_reward: true } => {
        self.notify(ServerWsMessage::Reward { message: lesson_reward(), major: false });
      }
      Advanced::Step { lesson_reward: false } => {}
      Advanced::Completed { quest_id } => {
        info!(target: "quest", %quest_id, "Quest completed");
        self.notify(ServerWsMessage::Reward { message: completion_message(), major: true });
        self.schedule_return_home(quest_id, COMPLETION_DELAY);
      }
    }
  }

  fn schedule_return_home(self: &Arc<Self>, quest_id: String, delay: Duration) {
    let this = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let returned = this.set_state_if(|s| {
        let still_here = s.completed
          && s.screen == ScreenKind::QuestView
          && s.current_quest.as_ref().is_some_and(|q| q.id == quest_id);
        if !still_here {
          return None;
        }
        s.screen = ScreenKind::QuestSelection;
        Some(())
      });
      if returned.is_none() {
        debug!(target: "quest", %quest_id, "Player already left the finished quest");
      }
    });
  }

  pub fn go_home(self: &Arc<Self>) {
    self.narrator.stop();
    self.set_state(|s| s.screen = ScreenKind::QuestSelection);
  }

  pub fn open_sticker_book(self: &Arc<Self>) {
    self.narrator.stop();
    self.set_state(|s| s.screen = ScreenKind::StickerBook);
  }

  /// Replay the quest a sticker was earned on. Returns false when no quest carries that title.
  pub fn replay_sticker(self: &Arc<Self>, title: &str) -> bool {
    let quest = self.snapshot().quests.into_iter().find(|q| q.title == title);
    match quest {
      Some(q) => {
        self.select_quest(q);
        true
      }
      None => false,
    }
  }

  /// Read the current step aloud.
  pub fn listen(self: &Arc<Self>) {
    let s = self.snapshot();
    if s.loading.is_some() || s.screen != ScreenKind::QuestView {
      return;
    }
    let Some(quest) = s.current_quest.as_ref() else { return };
    let Some(content) = self.app.library.cached(&quest.id) else { return };
    if let Some(step) = content.steps.get(s.step_index) {
      self.narrator.speak(step.content());
    }
  }

  /// The client finished (or failed) playing narration audio.
  pub fn narration_finished(&self) {
    self.narrator.finish();
  }
}
