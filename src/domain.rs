//! Domain models: quest descriptors, generated quest content, stickers and the persisted progress record.

use serde::{Deserialize, Serialize};

/// Prefix of quest ids created from a user-entered topic.
pub const CUSTOM_PREFIX: &str = "custom_";

/// An entry of the quest catalog. Built-ins are static; custom ones are created on generation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestDescriptor {
  pub id: String,
  pub title: String,
  pub emoji: String,
  pub prompt: String,
}

impl QuestDescriptor {
  pub fn is_custom(&self) -> bool {
    self.id.starts_with(CUSTOM_PREFIX)
  }
}

/// One step of a quest. Wire shape matches what the generator is asked to produce.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
  Lesson {
    content: String,
    #[serde(rename = "imageUrl", default)]
    image_url: Option<String>,
  },
  Flashcard {
    content: String,
    options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    correct_answer: String,
  },
}

impl Step {
  pub fn content(&self) -> &str {
    match self {
      Step::Lesson { content, .. } | Step::Flashcard { content, .. } => content,
    }
  }

  pub fn is_lesson(&self) -> bool {
    matches!(self, Step::Lesson { .. })
  }
}

/// Generated quest content, cached per quest id and never mutated once cached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestContent {
  #[serde(default)]
  pub id: String,
  pub title: String,
  pub steps: Vec<Step>,
}

impl QuestContent {
  pub const FALLBACK_TITLE: &'static str = "Error";
  pub const FALLBACK_MESSAGE: &'static str =
    "Oops! We couldn't create this quest. Please try another one.";

  /// Deterministic single-step content shown when generation fails.
  pub fn fallback(quest_id: &str) -> Self {
    Self {
      id: quest_id.to_string(),
      title: Self::FALLBACK_TITLE.into(),
      steps: vec![Step::Lesson { content: Self::FALLBACK_MESSAGE.into(), image_url: None }],
    }
  }

  pub fn is_fallback(&self) -> bool {
    self.title == Self::FALLBACK_TITLE
      && matches!(self.steps.as_slice(), [Step::Lesson { content, image_url: None }] if content == Self::FALLBACK_MESSAGE)
  }

  pub fn lesson_count(&self) -> usize {
    self.steps.iter().filter(|s| s.is_lesson()).count()
  }
}

/// Cosmetic unlock, unique by title.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sticker {
  pub emoji: String,
  pub title: String,
}

/// The single persisted progress record (`coreState`). Only custom quests are stored.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CoreState {
  #[serde(default)]
  pub sparkles: u32,
  #[serde(default)]
  pub stickers: Vec<Sticker>,
  #[serde(default)]
  pub quests: Vec<QuestDescriptor>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn steps_use_camel_case_wire_keys() {
    let json = r#"[
      {"type":"lesson","content":"Pizza can be cut into slices.","imageUrl":null},
      {"type":"flashcard","content":"Half of 4?","options":["1","2","3","4"],"correctAnswer":"2"}
    ]"#;
    let steps: Vec<Step> = serde_json::from_str(json).unwrap();
    assert!(steps[0].is_lesson());
    match &steps[1] {
      Step::Flashcard { correct_answer, options, .. } => {
        assert_eq!(correct_answer, "2");
        assert_eq!(options.len(), 4);
      }
      other => panic!("expected flashcard, got {other:?}"),
    }
    let back = serde_json::to_value(&steps[1]).unwrap();
    assert_eq!(back["correctAnswer"], "2");
    assert_eq!(back["type"], "flashcard");
  }

  #[test]
  fn fallback_is_a_single_lesson() {
    let c = QuestContent::fallback("dinosaurs");
    assert_eq!(c.title, "Error");
    assert_eq!(c.steps.len(), 1);
    assert_eq!(c.lesson_count(), 1);
    assert!(c.is_fallback());

    let mut real = c.clone();
    real.title = "Mighty Dinosaurs".into();
    assert!(!real.is_fallback());
  }

  #[test]
  fn core_state_tolerates_missing_fields() {
    let s: CoreState = serde_json::from_str(r#"{"sparkles": 35}"#).unwrap();
    assert_eq!(s.sparkles, 35);
    assert!(s.stickers.is_empty());
    assert!(s.quests.is_empty());
  }
}
