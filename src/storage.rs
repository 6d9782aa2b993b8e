//! Local persistence: two logical key/value stores backed by JSON documents on disk.
//!
//! ```text
//! data/
//! ├── stateStore.json       ← { "coreState": { sparkles, stickers, quests } }
//! └── questDataStore.json   ← { "<quest id>": { id, title, steps } }
//! ```
//!
//! Writes are whole-document and atomic (temp file + rename), serialized by a lock.
//! Every failure surfaces as `StorageError`; callers log and keep going in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::{CoreState, QuestContent};

pub const CORE_STATE_KEY: &str = "coreState";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreName {
  /// Explicitly keyed records (the core progress snapshot).
  State,
  /// Records keyed by their own `id` field (quest content).
  QuestData,
}

impl StoreName {
  pub fn as_str(self) -> &'static str {
    match self {
      StoreName::State => "stateStore",
      StoreName::QuestData => "questDataStore",
    }
  }

  /// Field used as the key when `put` is called without one.
  pub fn key_path(self) -> Option<&'static str> {
    match self {
      StoreName::State => None,
      StoreName::QuestData => Some("id"),
    }
  }
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("storage I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("stored data is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("no key given and record has no '{field}' field for store {store}")]
  MissingKey { store: &'static str, field: &'static str },
  #[error("store {0} requires an explicit key")]
  KeyRequired(&'static str),
}

#[async_trait]
pub trait Storage: Send + Sync {
  async fn get(&self, store: StoreName, key: &str) -> Result<Option<Value>, StorageError>;
  async fn get_all(&self, store: StoreName) -> Result<Vec<Value>, StorageError>;
  async fn put(&self, store: StoreName, value: Value, key: Option<&str>) -> Result<(), StorageError>;
}

/// Resolve the record key for `put`, following the store's key path.
pub fn record_key(store: StoreName, value: &Value, key: Option<&str>) -> Result<String, StorageError> {
  if let Some(k) = key {
    return Ok(k.to_string());
  }
  let field = store.key_path().ok_or(StorageError::KeyRequired(store.as_str()))?;
  value
    .get(field)
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or(StorageError::MissingKey { store: store.as_str(), field })
}

type Document = BTreeMap<String, Value>;

pub struct FileStore {
  dir: PathBuf,
  write_lock: Mutex<()>,
}

impl FileStore {
  /// Open (and create if needed) the data directory.
  pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
    let dir = dir.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(Self { dir, write_lock: Mutex::new(()) })
  }

  fn path(&self, store: StoreName) -> PathBuf {
    self.dir.join(format!("{}.json", store.as_str()))
  }

  async fn read_doc(&self, store: StoreName) -> Result<Document, StorageError> {
    match tokio::fs::read(self.path(store)).await {
      Ok(bytes) if bytes.is_empty() => Ok(Document::new()),
      Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
      Err(e) => Err(e.into()),
    }
  }
}

#[async_trait]
impl Storage for FileStore {
  async fn get(&self, store: StoreName, key: &str) -> Result<Option<Value>, StorageError> {
    Ok(self.read_doc(store).await?.remove(key))
  }

  async fn get_all(&self, store: StoreName) -> Result<Vec<Value>, StorageError> {
    Ok(self.read_doc(store).await?.into_values().collect())
  }

  #[instrument(level = "debug", skip(self, value), fields(store = store.as_str()))]
  async fn put(&self, store: StoreName, value: Value, key: Option<&str>) -> Result<(), StorageError> {
    let key = record_key(store, &value, key)?;
    let _guard = self.write_lock.lock().await;
    let mut doc = self.read_doc(store).await?;
    doc.insert(key.clone(), value);

    let path = self.path(store);
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(&doc)?).await?;
    tokio::fs::rename(&tmp, &path).await?;
    debug!(target: "illustrated", %key, records = doc.len(), "Record stored");
    Ok(())
  }
}

// --- Typed helpers ---

pub async fn load_core_state(storage: &dyn Storage) -> Result<Option<CoreState>, StorageError> {
  match storage.get(StoreName::State, CORE_STATE_KEY).await? {
    Some(v) => Ok(Some(serde_json::from_value(v)?)),
    None => Ok(None),
  }
}

pub async fn save_core_state(storage: &dyn Storage, state: &CoreState) -> Result<(), StorageError> {
  storage.put(StoreName::State, serde_json::to_value(state)?, Some(CORE_STATE_KEY)).await
}

pub async fn load_quest_content(storage: &dyn Storage, quest_id: &str) -> Result<Option<QuestContent>, StorageError> {
  match storage.get(StoreName::QuestData, quest_id).await? {
    Some(v) => Ok(Some(serde_json::from_value(v)?)),
    None => Ok(None),
  }
}

/// All stored quest content. Unreadable records are skipped with a warning.
pub async fn load_all_quest_content(storage: &dyn Storage) -> Result<Vec<QuestContent>, StorageError> {
  let records = storage.get_all(StoreName::QuestData).await?;
  Ok(records
    .into_iter()
    .filter_map(|v| match serde_json::from_value::<QuestContent>(v) {
      Ok(c) if !c.id.is_empty() => Some(c),
      Ok(_) => {
        warn!(target: "illustrated", "Skipping stored quest content without id");
        None
      }
      Err(e) => {
        warn!(target: "illustrated", error = %e, "Skipping unreadable stored quest content");
        None
      }
    })
    .collect())
}

pub async fn save_quest_content(storage: &dyn Storage, content: &QuestContent) -> Result<(), StorageError> {
  storage.put(StoreName::QuestData, serde_json::to_value(content)?, None).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{Step, Sticker};
  use serde_json::json;
  use tempfile::TempDir;

  async fn store() -> (FileStore, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let s = FileStore::open(dir.path().join("data")).await.expect("open");
    (s, dir)
  }

  #[tokio::test]
  async fn missing_records_read_as_none_and_empty() {
    let (s, _dir) = store().await;
    assert!(s.get(StoreName::State, CORE_STATE_KEY).await.unwrap().is_none());
    assert!(s.get_all(StoreName::QuestData).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn quest_data_is_keyed_by_its_id_field() {
    let (s, _dir) = store().await;
    s.put(StoreName::QuestData, json!({"id": "oceans", "title": "Deep Blue Oceans", "steps": []}), None).await.unwrap();
    s.put(StoreName::QuestData, json!({"id": "oceans", "title": "Replaced", "steps": []}), None).await.unwrap();
    let got = s.get(StoreName::QuestData, "oceans").await.unwrap().unwrap();
    assert_eq!(got["title"], "Replaced");
    assert_eq!(s.get_all(StoreName::QuestData).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn put_without_usable_key_is_rejected() {
    let (s, _dir) = store().await;
    let err = s.put(StoreName::QuestData, json!({"title": "no id"}), None).await.unwrap_err();
    assert!(matches!(err, StorageError::MissingKey { field: "id", .. }));
    let err = s.put(StoreName::State, json!({}), None).await.unwrap_err();
    assert!(matches!(err, StorageError::KeyRequired("stateStore")));
  }

  #[tokio::test]
  async fn typed_helpers_persist_across_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let core = CoreState {
      sparkles: 45,
      stickers: vec![Sticker { emoji: "🍕".into(), title: "Fun with Fractions".into() }],
      quests: vec![],
    };
    let content = QuestContent {
      id: "fractions".into(),
      title: "Fun with Fractions".into(),
      steps: vec![Step::Lesson { content: "Halves".into(), image_url: Some("data:image/png;base64,AA".into()) }],
    };
    {
      let s = FileStore::open(dir.path()).await.unwrap();
      save_core_state(&s, &core).await.unwrap();
      save_quest_content(&s, &content).await.unwrap();
    }
    let s = FileStore::open(dir.path()).await.unwrap();
    assert_eq!(load_core_state(&s).await.unwrap(), Some(core));
    assert_eq!(load_quest_content(&s, "fractions").await.unwrap(), Some(content.clone()));
    assert_eq!(load_all_quest_content(&s).await.unwrap(), vec![content]);
  }

  #[tokio::test]
  async fn corrupt_document_is_an_error() {
    let (s, dir) = store().await;
    std::fs::write(dir.path().join("data").join("stateStore.json"), b"{not json").unwrap();
    assert!(matches!(load_core_state(&s).await, Err(StorageError::Json(_))));
  }
}
