//! Application state: shared services and the process-wide quest content library.
//!
//! This module owns:
//!   - the content generator (Gemini-backed unless replaced in tests)
//!   - the optional TTS client
//!   - the storage adapter
//!   - the built-in catalog (static + config extras)
//!   - the content cache, keyed by quest id
//!
//! Per-connection state lives in `session.rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{error, info, instrument, warn};

use crate::catalog::catalog_with_extras;
use crate::config::Settings;
use crate::decoder::FencedOrBraces;
use crate::domain::{QuestContent, QuestDescriptor};
use crate::gemini::Gemini;
use crate::generator::ContentGenerator;
use crate::narration::{ElevenLabs, SpeechSynth};
use crate::storage::{load_all_quest_content, load_quest_content, save_quest_content, FileStore, Storage, StorageError};

pub struct AppState {
    pub generator: ContentGenerator,
    pub tts: Option<Arc<dyn SpeechSynth>>,
    pub storage: Arc<dyn Storage>,
    pub builtins: Vec<QuestDescriptor>,
    pub library: QuestLibrary,
    pub generation_enabled: bool,
}

impl AppState {
    /// Build state from settings: open the data directory, build clients, preload stored content.
    #[instrument(level = "info", skip_all)]
    pub async fn from_settings(settings: &Settings) -> Result<Self, StorageError> {
        let storage: Arc<dyn Storage> = Arc::new(FileStore::open(&settings.data_dir).await?);

        let gemini = Gemini::new(settings.gemini_api_key.clone(), &settings.gemini_base_url, &settings.gemini_model);
        let generation_enabled = gemini.is_configured();
        if generation_enabled {
            info!(target: "illustrated", base_url = %gemini.base_url, model = %gemini.model, "Gemini enabled.");
        } else {
            warn!(target: "illustrated", "Gemini disabled (no GEMINI_API_KEY). New quests will fail to generate.");
        }

        let tts = ElevenLabs::new(
            settings.elevenlabs_api_key.clone(),
            &settings.elevenlabs_base_url,
            &settings.voice_id,
            settings.quest.narration.clone(),
        )
        .map(|t| Arc::new(t) as Arc<dyn SpeechSynth>);
        if tts.is_none() {
            info!(target: "illustrated", "Narration disabled (no ELEVENLABS_API_KEY).");
        }

        let generator = ContentGenerator::new(Arc::new(gemini), Arc::new(FencedOrBraces), settings.quest.prompts.clone());
        let mut state = Self::new(generator, tts, storage, catalog_with_extras(&settings.quest.quests));
        state.generation_enabled = generation_enabled;
        state.preload().await;
        Ok(state)
    }

    pub fn new(
        generator: ContentGenerator,
        tts: Option<Arc<dyn SpeechSynth>>,
        storage: Arc<dyn Storage>,
        builtins: Vec<QuestDescriptor>,
    ) -> Self {
        let library = QuestLibrary::new(storage.clone());
        Self { generator, tts, storage, builtins, library, generation_enabled: true }
    }

    /// Load every stored quest into the cache. Failures leave the cache empty.
    async fn preload(&self) {
        match load_all_quest_content(self.storage.as_ref()).await {
            Ok(all) => {
                let n = all.len();
                for c in all {
                    self.library.insert_cached(c);
                }
                info!(target: "illustrated", quests = n, "Preloaded stored quest content");
            }
            Err(e) => error!(target: "illustrated", error = %e, "Failed to preload quest content; starting with an empty cache"),
        }
    }
}

/// Quest content cache with write-through to storage and per-quest generation slots.
pub struct QuestLibrary {
    cache: RwLock<HashMap<String, Arc<QuestContent>>>,
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    storage: Arc<dyn Storage>,
}

impl QuestLibrary {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { cache: RwLock::new(HashMap::new()), slots: Mutex::new(HashMap::new()), storage }
    }

    pub fn cached(&self, quest_id: &str) -> Option<Arc<QuestContent>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).get(quest_id).cloned()
    }

    /// Insert into the cache unless an entry exists; returns the cached entry either way.
    pub fn insert_cached(&self, content: QuestContent) -> Arc<QuestContent> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.entry(content.id.clone()).or_insert_with(|| Arc::new(content)).clone()
    }

    /// Look in storage and promote a hit into the cache.
    #[instrument(level = "debug", skip(self), fields(%quest_id))]
    pub async fn stored(&self, quest_id: &str) -> Option<Arc<QuestContent>> {
        match load_quest_content(self.storage.as_ref(), quest_id).await {
            Ok(Some(c)) => Some(self.insert_cached(c)),
            Ok(None) => None,
            Err(e) => {
                error!(target: "illustrated", %quest_id, error = %e, "Failed to read stored quest content");
                None
            }
        }
    }

    /// Cache and persist freshly generated content. Persistence failures are logged only.
    #[instrument(level = "debug", skip(self, content), fields(quest_id = %content.id))]
    pub async fn store(&self, content: QuestContent) -> Arc<QuestContent> {
        let cached = self.insert_cached(content);
        if let Err(e) = save_quest_content(self.storage.as_ref(), &cached).await {
            error!(target: "illustrated", quest_id = %cached.id, error = %e, "Failed to persist quest content");
        }
        cached
    }

    /// Single-flight slot for generating one quest id.
    pub fn slot(&self, quest_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(quest_id.to_string()).or_default().clone()
    }
}
