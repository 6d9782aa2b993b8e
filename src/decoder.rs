//! Decoding of free-text model output into typed quest content.
//!
//! Extraction order: a ```` ```json ```` fenced block, then the outermost `{...}` span.
//! The extracted JSON is validated into `Step`s here, so nothing downstream sees
//! a malformed step.

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::Step;

#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("could not find a valid JSON object in the model response")]
  NoJson,
  #[error("invalid JSON in model response: {0}")]
  Json(#[from] serde_json::Error),
  #[error("quest data has no steps")]
  MissingSteps,
  #[error("quest data is missing required field '{0}'")]
  MissingField(&'static str),
  #[error("step {index} is malformed: {reason}")]
  BadStep { index: usize, reason: String },
}

/// Turns raw response text into a JSON value.
pub trait ResponseDecoder: Send + Sync {
  fn extract(&self, text: &str) -> Result<serde_json::Value, DecodeError>;
}

/// Fenced block first, brace span second.
#[derive(Clone, Copy, Debug, Default)]
pub struct FencedOrBraces;

impl ResponseDecoder for FencedOrBraces {
  fn extract(&self, text: &str) -> Result<serde_json::Value, DecodeError> {
    let text = text.trim();
    let candidate = fenced_json(text).or_else(|| brace_span(text)).ok_or(DecodeError::NoJson)?;
    Ok(serde_json::from_str(candidate)?)
  }
}

fn fenced_json(text: &str) -> Option<&str> {
  const OPEN: &str = "```json\n";
  let start = text.find(OPEN)? + OPEN.len();
  let rest = &text[start..];
  let end = rest.find("\n```")?;
  Some(&rest[..end])
}

fn brace_span(text: &str) -> Option<&str> {
  let start = text.find('{')?;
  let end = text.rfind('}')?;
  (end > start).then(|| &text[start..=end])
}

/// Loosely-typed shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct RawQuest {
  #[serde(default)]
  title: Option<String>,
  #[serde(default)]
  emoji: Option<String>,
  steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  content: String,
  #[serde(default)]
  options: Option<Vec<String>>,
  #[serde(rename = "correctAnswer", default)]
  correct_answer: Option<String>,
}

/// Result of decoding. `title`/`emoji` stay optional; the custom path requires them.
#[derive(Debug)]
pub struct DecodedQuest {
  pub title: Option<String>,
  pub emoji: Option<String>,
  pub steps: Vec<Step>,
}

impl DecodedQuest {
  pub fn require_title_and_emoji(self) -> Result<(String, String, Vec<Step>), DecodeError> {
    let title = self.title.filter(|t| !t.trim().is_empty()).ok_or(DecodeError::MissingField("title"))?;
    let emoji = self.emoji.filter(|e| !e.trim().is_empty()).ok_or(DecodeError::MissingField("emoji"))?;
    Ok((title, emoji, self.steps))
  }
}

pub fn decode_quest(decoder: &dyn ResponseDecoder, text: &str) -> Result<DecodedQuest, DecodeError> {
  let value = decoder.extract(text)?;
  if !value.get("steps").map(|s| s.is_array()).unwrap_or(false) {
    return Err(DecodeError::MissingSteps);
  }
  let raw: RawQuest = serde_json::from_value(value)?;
  let raw_steps = raw.steps.unwrap_or_default();
  if raw_steps.is_empty() {
    return Err(DecodeError::MissingSteps);
  }

  let steps = raw_steps
    .into_iter()
    .enumerate()
    .map(|(index, s)| to_step(index, s))
    .collect::<Result<Vec<_>, _>>()?;

  Ok(DecodedQuest { title: raw.title, emoji: raw.emoji, steps })
}

fn to_step(index: usize, raw: RawStep) -> Result<Step, DecodeError> {
  let bad = |reason: &str| DecodeError::BadStep { index, reason: reason.into() };
  if raw.content.trim().is_empty() {
    return Err(bad("empty content"));
  }
  match raw.kind.as_str() {
    "lesson" => Ok(Step::Lesson { content: raw.content, image_url: None }),
    "flashcard" => {
      let options = raw.options.filter(|o| !o.is_empty()).ok_or_else(|| bad("flashcard without options"))?;
      let correct_answer = raw.correct_answer.ok_or_else(|| bad("flashcard without correctAnswer"))?;
      if !options.contains(&correct_answer) {
        return Err(bad("correctAnswer is not one of the options"));
      }
      if options.len() != 4 {
        warn!(target: "quest", index, options = options.len(), "Flashcard does not have exactly 4 options");
      }
      Ok(Step::Flashcard { content: raw.content, options, correct_answer })
    }
    other => Err(bad(&format!("unknown step type '{other}'"))),
  }
}
