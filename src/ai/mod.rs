pub mod battlecards;
pub mod live_engine;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod streaming;
pub mod stt;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::DEFAULT_SYSTEM;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "Ollama",
            ProviderKind::OpenAI => "OpenAI",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAI),
            other => Err(AppError::Config(format!("Unknown provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A screenshot or other image riding along with a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub mime: String,
    pub base64: String,
}

impl ImageAttachment {
    /// Accepts either a `data:<mime>;base64,<payload>` URL or a bare base64
    /// payload, which is assumed to be PNG.
    pub fn from_data_url(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix("data:") {
            if let Some((meta, payload)) = rest.split_once(',') {
                let mime = meta.strip_suffix(";base64").unwrap_or(meta);
                let mime = if mime.is_empty() { "image/png" } else { mime };
                return Self {
                    mime: mime.to_string(),
                    base64: payload.to_string(),
                };
            }
        }
        Self {
            mime: "image/png".to_string(),
            base64: input.to_string(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// Everything a provider needs to build one request.
#[derive(Debug, Clone)]
pub struct PromptInput {
    pub prompt: String,
    pub image: Option<ImageAttachment>,
    pub history: Vec<ChatMessage>,
    pub system_context: String,
}

impl PromptInput {
    pub fn persona(&self) -> &str {
        if self.system_context.trim().is_empty() {
            DEFAULT_SYSTEM
        } else {
            &self.system_context
        }
    }

    /// System message followed by the rolling history.
    pub fn leading_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage {
            role: Role::System,
            content: self.persona().to_string(),
        });
        messages.extend(self.history.iter().cloned());
        messages
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub fallback_model: Option<String>,
}

impl ProviderSettings {
    pub fn resolve_model(&self) -> Result<String> {
        if !self.model.trim().is_empty() {
            return Ok(self.model.clone());
        }
        self.fallback_model
            .clone()
            .ok_or_else(|| AppError::Config("No model selected. Pick one in Settings.".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Stream,
    Blocking,
}

/// A ready-to-send HTTP POST.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub provider: ProviderKind,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedChunk {
    pub text: String,
    /// The provider signalled the end of the stream inside this chunk.
    pub finished: bool,
}

pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn build_request(
        &self,
        input: &PromptInput,
        settings: &ProviderSettings,
        mode: RequestMode,
    ) -> Result<ProviderRequest>;

    /// Extracts tokens from one or more complete stream lines.
    fn parse_chunk(&self, chunk: &str) -> ParsedChunk;

    fn parse_full_response(&self, body: &serde_json::Value) -> Option<String>;
}

pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProviderAdapter {
    match kind {
        ProviderKind::Ollama => &ollama::OllamaAdapter,
        ProviderKind::OpenAI => &openai::OpenAIAdapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trips_through_str() {
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!(ProviderKind::OpenAI.as_str().parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert!("gemini".parse::<ProviderKind>().is_err());
        assert_eq!(serde_json::to_string(&ProviderKind::OpenAI).unwrap(), "\"openai\"");
    }

    #[test]
    fn test_image_from_data_url() {
        let img = ImageAttachment::from_data_url("data:image/jpeg;base64,QUJD");
        assert_eq!(img.mime, "image/jpeg");
        assert_eq!(img.base64, "QUJD");
        assert_eq!(img.data_url(), "data:image/jpeg;base64,QUJD");

        let bare = ImageAttachment::from_data_url("QUJD");
        assert_eq!(bare.mime, "image/png");
        assert_eq!(bare.base64, "QUJD");
    }

    #[test]
    fn test_persona_falls_back_to_default() {
        let input = PromptInput {
            prompt: "hi".into(),
            image: None,
            history: vec![],
            system_context: "   ".into(),
        };
        assert_eq!(input.persona(), DEFAULT_SYSTEM);
        let leading = input.leading_messages();
        assert_eq!(leading.len(), 1);
        assert_eq!(leading[0].role, Role::System);
    }

    #[test]
    fn test_resolve_model() {
        let mut settings = ProviderSettings {
            endpoint: String::new(),
            api_key: String::new(),
            model: String::new(),
            fallback_model: Some("llama3".into()),
        };
        assert_eq!(settings.resolve_model().unwrap(), "llama3");

        settings.fallback_model = None;
        assert!(matches!(settings.resolve_model(), Err(AppError::Config(_))));

        settings.model = "mistral".into();
        assert_eq!(settings.resolve_model().unwrap(), "mistral");
    }
}
