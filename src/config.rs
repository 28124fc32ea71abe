use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ai::{ProviderKind, ProviderSettings};
use crate::error::Result;
use crate::session::storage::Storage;

pub const DEFAULT_SYSTEM: &str = "You are Aura, an intelligent OS copilot. Be concise.";

const KEY_PROVIDER: &str = "provider";
const KEY_API_KEY: &str = "apiKey";
const KEY_MODEL: &str = "model";
const KEY_SYSTEM_CONTEXT: &str = "systemContext";

/// Host settings, kept as JSON in the app data dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub ollama_url: String,
    pub openai_url: String,
    pub helper_url: String,
    pub hotkey: String,
    pub capture_settle_ms: u64,
    /// Substitute a default model name when none is selected.
    pub use_fallback_model: bool,
    pub ollama_fallback_model: String,
    pub openai_fallback_model: String,
    pub live_strategy: LiveStrategy,
    pub analysis_backend: AnalysisBackend,
    pub live_chunk_secs: u64,
    pub silence_threshold: f32,
    /// Command line for the local speech-to-text helper, spawned at startup.
    pub helper_command: Option<Vec<String>>,
    pub update_manifest_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LiveStrategy {
    #[default]
    Speech,
    Transcription,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisBackend {
    #[default]
    Helper,
    Builtin,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            helper_url: "http://127.0.0.1:11435".to_string(),
            hotkey: "CommandOrControl+Shift+Space".to_string(),
            capture_settle_ms: 200,
            use_fallback_model: true,
            ollama_fallback_model: "llama3".to_string(),
            openai_fallback_model: "gpt-4o".to_string(),
            live_strategy: LiveStrategy::Speech,
            analysis_backend: AnalysisBackend::Helper,
            live_chunk_secs: 3,
            silence_threshold: 0.01,
            helper_command: None,
            update_manifest_url: None,
        }
    }
}

impl AppConfig {
    pub fn load(app_data: &Path) -> Self {
        let config_path = app_data.join("config.json");
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::error!("Ignoring malformed {}: {}", config_path.display(), e);
                    Self::default()
                }),
                Err(_) => Self::default(),
            }
        } else {
            let c = Self::default();
            if let Err(e) = c.save(app_data) {
                log::error!("Failed to write default config: {}", e);
            }
            c
        }
    }

    pub fn save(&self, app_data: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(app_data.join("config.json"), content)?;
        Ok(())
    }

    /// Endpoint, credentials and model for the selected provider.
    pub fn provider_settings(&self, chat: &ChatConfig) -> ProviderSettings {
        let (endpoint, fallback) = match chat.provider {
            ProviderKind::Ollama => (&self.ollama_url, &self.ollama_fallback_model),
            ProviderKind::OpenAI => (&self.openai_url, &self.openai_fallback_model),
        };
        ProviderSettings {
            endpoint: endpoint.clone(),
            api_key: chat.api_key.clone(),
            model: chat.model.clone(),
            fallback_model: self.use_fallback_model.then(|| fallback.clone()),
        }
    }
}

/// The user-facing provider record, persisted field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub system_context: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            api_key: String::new(),
            model: String::new(),
            system_context: DEFAULT_SYSTEM.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn load(storage: &Storage) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

        let provider = match non_empty(storage.get(KEY_PROVIDER)?) {
            Some(p) => p.parse().unwrap_or_else(|e| {
                log::error!("{}; using ollama", e);
                ProviderKind::Ollama
            }),
            None => ProviderKind::Ollama,
        };

        Ok(Self {
            provider,
            api_key: storage.get(KEY_API_KEY)?.unwrap_or_default(),
            model: storage.get(KEY_MODEL)?.unwrap_or_default(),
            system_context: non_empty(storage.get(KEY_SYSTEM_CONTEXT)?)
                .unwrap_or_else(|| DEFAULT_SYSTEM.to_string()),
        })
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.set(KEY_PROVIDER, self.provider.as_str())?;
        storage.set(KEY_API_KEY, &self.api_key)?;
        storage.set(KEY_MODEL, &self.model)?;
        storage.set(KEY_SYSTEM_CONTEXT, &self.system_context)?;
        Ok(())
    }

    /// `OPENAI_API_KEY` fills an empty key.
    pub fn with_env_overrides(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                if !key.is_empty() {
                    self.api_key = key;
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_config_round_trip() {
        let storage = Storage::in_memory().unwrap();
        let config = ChatConfig {
            provider: ProviderKind::Ollama,
            api_key: String::new(),
            model: "llama3".into(),
            ..ChatConfig::default()
        };
        config.save(&storage).unwrap();

        assert_eq!(ChatConfig::load(&storage).unwrap(), config);
    }

    #[test]
    fn test_chat_config_defaults_when_empty() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(ChatConfig::load(&storage).unwrap(), ChatConfig::default());

        storage.set("provider", "").unwrap();
        storage.set("systemContext", "").unwrap();
        let loaded = ChatConfig::load(&storage).unwrap();
        assert_eq!(loaded.provider, ProviderKind::Ollama);
        assert_eq!(loaded.system_context, DEFAULT_SYSTEM);
    }

    #[test]
    fn test_openai_config_persists_key() {
        let storage = Storage::in_memory().unwrap();
        let config = ChatConfig {
            provider: ProviderKind::OpenAI,
            api_key: "sk-123".into(),
            model: "gpt-4o-mini".into(),
            system_context: "Answer in French.".into(),
        };
        config.save(&storage).unwrap();
        assert_eq!(storage.get("provider").unwrap().as_deref(), Some("openai"));
        assert_eq!(ChatConfig::load(&storage).unwrap(), config);
    }

    #[test]
    fn test_app_config_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config, AppConfig::default());
        assert!(dir.path().join("config.json").exists());

        let mut changed = config.clone();
        changed.capture_settle_ms = 350;
        changed.save(dir.path()).unwrap();
        assert_eq!(AppConfig::load(dir.path()).capture_settle_ms, 350);
    }

    #[test]
    fn test_partial_app_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"live_strategy":"transcription"}"#).unwrap();
        let config = AppConfig::load(dir.path());
        assert_eq!(config.live_strategy, LiveStrategy::Transcription);
        assert_eq!(config.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn test_provider_settings_fallback_is_configurable() {
        let chat = ChatConfig::default();
        let mut app = AppConfig::default();
        assert_eq!(app.provider_settings(&chat).fallback_model.as_deref(), Some("llama3"));

        app.use_fallback_model = false;
        assert_eq!(app.provider_settings(&chat).fallback_model, None);

        let cloud = ChatConfig {
            provider: ProviderKind::OpenAI,
            ..ChatConfig::default()
        };
        app.use_fallback_model = true;
        let settings = app.provider_settings(&cloud);
        assert_eq!(settings.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(settings.fallback_model.as_deref(), Some("gpt-4o"));
    }
}
