//! Quest content generation: one text call per quest, then one illustration call
//! per lesson step, all illustrations in flight at once.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::decoder::{decode_quest, DecodeError, ResponseDecoder};
use crate::domain::{QuestContent, QuestDescriptor, Step};
use crate::gemini::{GenerativeModel, ModelError};
use crate::util::{fill_template, trunc_for_log};

#[derive(Debug, Error)]
pub enum GenerateError {
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Parse(#[from] DecodeError),
}

/// Output of the custom-topic path.
#[derive(Debug)]
pub struct CustomQuest {
  pub title: String,
  pub emoji: String,
  /// Content with an empty `id`; the caller assigns it with the new descriptor.
  pub content: QuestContent,
}

#[derive(Clone)]
pub struct ContentGenerator {
  model: Arc<dyn GenerativeModel>,
  decoder: Arc<dyn ResponseDecoder>,
  prompts: Prompts,
}

impl ContentGenerator {
  pub fn new(model: Arc<dyn GenerativeModel>, decoder: Arc<dyn ResponseDecoder>, prompts: Prompts) -> Self {
    Self { model, decoder, prompts }
  }

  /// Content for a catalog quest. Never fails: errors become `QuestContent::fallback`.
  #[instrument(level = "info", skip(self, quest), fields(quest_id = %quest.id))]
  pub async fn generate(&self, quest: &QuestDescriptor) -> QuestContent {
    match self.try_generate(quest).await {
      Ok(c) => c,
      Err(e) => {
        error!(target: "quest", quest_id = %quest.id, error = %e, "Quest generation failed; serving fallback content");
        QuestContent::fallback(&quest.id)
      }
    }
  }

  async fn try_generate(&self, quest: &QuestDescriptor) -> Result<QuestContent, GenerateError> {
    let prompt = fill_template(&self.prompts.quest_template, &[("prompt", &quest.prompt)]);
    let text = self.model.generate_text(&prompt).await?;
    let decoded = decode_quest(self.decoder.as_ref(), &text).inspect_err(|e| {
      error!(target: "quest", quest_id = %quest.id, error = %e, response = %trunc_for_log(&text, 300), "Invalid quest data from model");
    })?;

    let steps = self.illustrate_lessons(decoded.steps).await;
    let title = decoded.title.unwrap_or_else(|| quest.title.clone());
    let content = QuestContent { id: quest.id.clone(), title, steps };
    info!(target: "quest", quest_id = %quest.id, steps = content.steps.len(), lessons = content.lesson_count(), "Quest content generated");
    Ok(content)
  }

  /// Content for a user-entered topic. Errors are returned so the caller can alert.
  #[instrument(level = "info", skip(self, topic), fields(topic_len = topic.len()))]
  pub async fn generate_custom(&self, topic: &str, age_group: Option<&str>) -> Result<CustomQuest, GenerateError> {
    let age = age_group.unwrap_or(&self.prompts.default_age_group);
    let prompt = fill_template(&self.prompts.custom_template, &[("topic", topic), ("age", age)]);
    let text = self.model.generate_text(&prompt).await?;
    let (title, emoji, steps) = decode_quest(self.decoder.as_ref(), &text)
      .and_then(|d| d.require_title_and_emoji())
      .inspect_err(|e| {
        error!(target: "quest", error = %e, response = %trunc_for_log(&text, 300), "Invalid custom quest data from model");
      })?;

    let steps = self.illustrate_lessons(steps).await;
    info!(target: "quest", %title, steps = steps.len(), "Custom quest generated");
    Ok(CustomQuest { title: title.clone(), emoji, content: QuestContent { id: String::new(), title, steps } })
  }

  /// Illustrate every lesson concurrently and attach results by position once all are done.
  async fn illustrate_lessons(&self, mut steps: Vec<Step>) -> Vec<Step> {
    let handles: Vec<_> = steps
      .iter()
      .filter(|s| s.is_lesson())
      .map(|s| {
        let this = self.clone();
        let description = s.content().to_string();
        tokio::spawn(async move { this.illustrate(&description).await })
      })
      .collect();

    let mut images = Vec::with_capacity(handles.len());
    for h in handles {
      images.push(h.await.unwrap_or_else(|e| {
        warn!(target: "quest", error = %e, "Illustration task aborted");
        None
      }));
    }

    let mut images = images.into_iter();
    for step in steps.iter_mut() {
      if let Step::Lesson { image_url, .. } = step {
        *image_url = images.next().flatten();
      }
    }
    steps
  }

  /// One illustration as a `data:` URI, or `None` when the service returns no image or fails.
  #[instrument(level = "info", skip(self, description), fields(description_len = description.len()))]
  pub async fn illustrate(&self, description: &str) -> Option<String> {
    let prompt = fill_template(&self.prompts.illustration_template, &[("description", description)]);
    match self.model.generate_image(&prompt).await {
      Ok(Some(img)) => Some(img.to_data_uri()),
      Ok(None) => {
        warn!(target: "quest", description = %trunc_for_log(description, 80), "No image generated for prompt");
        None
      }
      Err(e) => {
        warn!(target: "quest", error = %e, "Failed to generate image");
        None
      }
    }
  }
}
