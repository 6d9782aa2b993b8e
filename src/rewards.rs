//! Reward amounts, celebratory messages and the confetti burst.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

pub const CORRECT_ANSWER_SPARKLES: u32 = 10;
pub const LESSON_SPARKLES: u32 = 25;

/// Delay between answering a flashcard and moving on.
pub const ANSWER_DELAY: Duration = Duration::from_secs(2);
/// Delay between finishing a quest and returning to quest selection.
pub const COMPLETION_DELAY: Duration = Duration::from_secs(3);

pub const CORRECT_ANSWER_MESSAGES: &[&str] = &[
  "Awesome!",
  "Brilliant!",
  "You got it!",
  "Superstar!",
  "Great job!",
  "Well done!",
  "Fantastic!",
];

pub const QUEST_COMPLETE_MESSAGES: &[&str] = &[
  "Quest Complete! 🎉",
  "Amazing work! 🌟",
  "You're a superstar!",
  "Quest Master! 🏆",
  "You did it! 🥳",
];

const CONFETTI_COLORS: &[&str] = &["#f5a623", "#4a90e2", "#ffc107", "#4caf50", "#f44336", "#e91e63"];
const CONFETTI_COUNT: usize = 80;

/// One confetti particle, positioned and styled by the client.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Particle {
  /// Horizontal start position, percent of the viewport width.
  pub left: f32,
  pub color: &'static str,
  /// Animation delay in seconds.
  pub delay: f32,
  pub round: bool,
  /// Degrees.
  pub rotation: f32,
}

fn pick(messages: &'static [&'static str]) -> &'static str {
  messages.choose(&mut rand::thread_rng()).copied().unwrap_or_default()
}

pub fn affirmation() -> String {
  format!("{} +{} ✨", pick(CORRECT_ANSWER_MESSAGES), CORRECT_ANSWER_SPARKLES)
}

pub fn lesson_reward() -> String {
  format!("+{} ✨", LESSON_SPARKLES)
}

pub fn completion_message() -> String {
  format!("{} Sticker Unlocked!", pick(QUEST_COMPLETE_MESSAGES))
}

pub fn confetti() -> Vec<Particle> {
  let mut rng = rand::thread_rng();
  (0..CONFETTI_COUNT)
    .map(|_| Particle {
      left: rng.gen_range(0.0..100.0),
      color: CONFETTI_COLORS.choose(&mut rng).copied().unwrap_or("#f5a623"),
      delay: rng.gen_range(0.0..0.75),
      round: rng.gen_bool(0.5),
      rotation: rng.gen_range(0.0..360.0),
    })
    .collect()
}
