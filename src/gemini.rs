//! Minimal Gemini client for our use-cases.
//!
//! We only call `models/{model}:generateContent`, asking either for text or for image+text.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key or image payloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ModelError {
  #[error("generation service is not configured (no API key)")]
  NotConfigured,
  #[error("request failed: {0}")]
  Request(String),
  #[error("generation service HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("invalid response: {0}")]
  InvalidResponse(String),
}

/// An inline image returned by the image-capable endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
  pub mime_type: String,
  /// Base64 payload as delivered by the service.
  pub data: String,
}

impl InlineImage {
  pub fn to_data_uri(&self) -> String {
    format!("data:{};base64,{}", self.mime_type, self.data)
  }
}

/// Generation service seam. `Gemini` implements it over HTTP.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
  /// One text completion for `prompt`.
  async fn generate_text(&self, prompt: &str) -> Result<String, ModelError>;
  /// Image+text request; returns the first inline image, if any.
  async fn generate_image(&self, prompt: &str) -> Result<Option<InlineImage>, ModelError>;
}

#[derive(Clone)]
pub struct Gemini {
  client: reqwest::Client,
  api_key: Option<String>,
  pub base_url: String,
  pub model: String,
}

impl Gemini {
  /// Build the client. Without a key every call fails with `ModelError::NotConfigured`.
  pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(120))
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());
    Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model: model.to_string() }
  }

  pub fn is_configured(&self) -> bool {
    self.api_key.is_some()
  }

  #[instrument(level = "info", skip(self, req), fields(model = %self.model))]
  async fn generate_content(&self, req: &GenerateContentRequest) -> Result<GenerateContentResponse, ModelError> {
    let api_key = self.api_key.as_deref().ok_or(ModelError::NotConfigured)?;
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let start = std::time::Instant::now();

    let res = self.client.post(&url)
      .header(USER_AGENT, "illustrated/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", api_key)
      .json(req).send().await.map_err(|e| ModelError::Request(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_gemini_error(&body).unwrap_or(body);
      return Err(ModelError::Http { status, message });
    }

    let body: GenerateContentResponse = res.json().await.map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
    let elapsed = start.elapsed();
    if let Some(usage) = &body.usage_metadata {
      info!(?elapsed, prompt_tokens = ?usage.prompt_token_count, candidates_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Gemini usage");
    } else {
      info!(?elapsed, "Gemini response received");
    }
    Ok(body)
  }
}

#[async_trait]
impl GenerativeModel for Gemini {
  #[instrument(level = "info", skip(self, prompt), fields(prompt_len = prompt.len()))]
  async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
    let body = self.generate_content(&GenerateContentRequest::text(prompt, None)).await?;
    let text = body.text();
    info!(text_len = text.len(), "Gemini text completion");
    Ok(text)
  }

  #[instrument(level = "info", skip(self, prompt), fields(prompt_len = prompt.len()))]
  async fn generate_image(&self, prompt: &str) -> Result<Option<InlineImage>, ModelError> {
    let config = GenerationConfig { response_modalities: vec!["IMAGE".into(), "TEXT".into()] };
    let body = self.generate_content(&GenerateContentRequest::text(prompt, Some(config))).await?;
    Ok(body.first_inline_image())
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<ContentReq>,
  #[serde(skip_serializing_if = "Option::is_none")]
  generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
  fn text(prompt: &str, generation_config: Option<GenerationConfig>) -> Self {
    Self { contents: vec![ContentReq { parts: vec![PartReq { text: prompt.to_string() }] }], generation_config }
  }
}

#[derive(Serialize)]
struct ContentReq { parts: Vec<PartReq> }
#[derive(Serialize)]
struct PartReq { text: String }
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig { response_modalities: Vec<String> }

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
  fn parts(&self) -> impl Iterator<Item = &PartResp> {
    self.candidates.first().and_then(|c| c.content.as_ref()).into_iter().flat_map(|c| c.parts.iter())
  }

  /// Concatenated text parts of the first candidate.
  fn text(&self) -> String {
    self.parts().filter_map(|p| p.text.as_deref()).collect::<Vec<_>>().join("")
  }

  fn first_inline_image(&self) -> Option<InlineImage> {
    self.parts().find_map(|p| p.inline_data.as_ref()).map(|d| InlineImage {
      mime_type: d.mime_type.clone(),
      data: d.data.clone(),
    })
  }
}

#[derive(Deserialize)]
struct Candidate { #[serde(default)] content: Option<ContentResp> }
#[derive(Deserialize)]
struct ContentResp { #[serde(default)] parts: Vec<PartResp> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResp {
  #[serde(default)] text: Option<String>,
  #[serde(default)] inline_data: Option<InlineData>,
}
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData { mime_type: String, data: String }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
