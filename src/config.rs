//! Runtime configuration: environment settings plus an optional TOML file
//! (prompt templates, narration voice, extra built-in quests).
//!
//! See `QuestConfig` and `Prompts` for the expected schema.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::QuestDescriptor;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
pub const DEFAULT_VOICE_ID: &str = "XrExE9yKIg1WjnnlVkGX";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QuestConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub narration: NarrationCfg,
  /// Extra built-in quests appended after the static catalog.
  #[serde(default)]
  pub quests: Vec<QuestDescriptor>,
}

/// Prompt templates used by the content generator. `{key}` placeholders are filled at call time.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Wraps a catalog quest prompt. Placeholder: `{prompt}`.
  pub quest_template: String,
  /// Custom-topic request. Placeholders: `{topic}`, `{age}`.
  pub custom_template: String,
  /// Illustration request. Placeholder: `{description}`.
  pub illustration_template: String,
  /// Age group used when the client does not send one.
  pub default_age_group: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      quest_template: "{prompt}\n\n\
The quest should have between 3 to 5 steps, alternating between lessons and flashcards.\n\
Each flashcard should have 4 options and a correct answer.\n\
Please respond with ONLY a valid JSON object inside a markdown code block (e.g., ```json ... ```).\n\
The JSON object should have this structure: { \"title\": string, \"steps\": [ { \"type\": \"lesson\" | \"flashcard\", \"content\": string, \"options\"?: string[], \"correctAnswer\"?: string } ] }".into(),
      custom_template: "Generate a quest for a {age} about \"{topic}\".\n\n\
The response must include a short, fun title, a single suitable emoji, and the quest content.\n\
The quest should have between 3 to 5 steps, alternating between lessons and flashcards.\n\
Each flashcard must have exactly 4 options and a correct answer.\n\n\
Please respond with ONLY a valid JSON object inside a markdown code block (e.g., ```json ... ```).\n\
The JSON object should have this structure: { \"title\": string, \"emoji\": string, \"steps\": [ { \"type\": \"lesson\" | \"flashcard\", \"content\": string, \"options\"?: string[], \"correctAnswer\"?: string } ] }".into(),
      illustration_template: "Generate a cute, simple, and colorful illustration for a children's book about: {description}".into(),
      default_age_group: "7-year-old".into(),
    }
  }
}

/// Voice parameters sent with every TTS request.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NarrationCfg {
  pub model_id: String,
  pub speed: f32,
  pub stability: f32,
  pub similarity_boost: f32,
}

impl Default for NarrationCfg {
  fn default() -> Self {
    Self { model_id: "eleven_multilingual_v2".into(), speed: 1.0, stability: 0.5, similarity_boost: 0.75 }
  }
}

/// Process settings read from the environment at startup.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub data_dir: PathBuf,
  pub gemini_api_key: Option<String>,
  pub gemini_base_url: String,
  pub gemini_model: String,
  pub elevenlabs_api_key: Option<String>,
  pub elevenlabs_base_url: String,
  pub voice_id: String,
  pub quest: QuestConfig,
}

impl Settings {
  pub fn from_env() -> Self {
    let port = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000);
    let data_dir = std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"));
    let gemini_api_key = non_empty_var("GEMINI_API_KEY").or_else(|| non_empty_var("API_KEY"));

    Self {
      port,
      data_dir,
      gemini_api_key,
      gemini_base_url: std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.into()),
      gemini_model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.into()),
      elevenlabs_api_key: non_empty_var("ELEVENLABS_API_KEY"),
      elevenlabs_base_url: std::env::var("ELEVENLABS_BASE_URL").unwrap_or_else(|_| DEFAULT_ELEVENLABS_BASE_URL.into()),
      voice_id: std::env::var("ELEVENLABS_VOICE_ID").unwrap_or_else(|_| DEFAULT_VOICE_ID.into()),
      quest: load_quest_config_from_env().unwrap_or_default(),
    }
  }
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a TOML quest config document.
pub fn parse_quest_config(s: &str) -> Result<QuestConfig, toml::de::Error> {
  toml::from_str::<QuestConfig>(s)
}

/// Attempt to load `QuestConfig` from QUEST_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_quest_config_from_env() -> Option<QuestConfig> {
  let path = std::env::var("QUEST_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_quest_config(&s) {
      Ok(cfg) => {
        info!(target: "illustrated", %path, extra_quests = cfg.quests.len(), "Loaded quest config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "illustrated", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "illustrated", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
