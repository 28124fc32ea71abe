use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    ChatMessage, ParsedChunk, PromptInput, ProviderAdapter, ProviderKind, ProviderRequest,
    ProviderSettings, RequestMode, Role,
};
use crate::error::{AppError, Result};

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

impl From<ChatMessage> for OllamaMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content,
            images: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamLine {
    message: Option<OllamaMessageResponse>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Local model server speaking the Ollama HTTP API.
pub struct OllamaAdapter;

impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn build_request(
        &self,
        input: &PromptInput,
        settings: &ProviderSettings,
        mode: RequestMode,
    ) -> Result<ProviderRequest> {
        let model = settings.resolve_model()?;
        let base = settings.endpoint.trim_end_matches('/');
        let images = input.image.as_ref().map(|img| vec![img.base64.clone()]);

        let (url, body) = match mode {
            RequestMode::Stream => {
                let mut messages: Vec<OllamaMessage> = input
                    .leading_messages()
                    .into_iter()
                    .map(OllamaMessage::from)
                    .collect();
                messages.push(OllamaMessage {
                    role: Role::User,
                    content: input.prompt.clone(),
                    images,
                });
                let request = OllamaChatRequest {
                    model,
                    messages,
                    stream: true,
                };
                (format!("{}/api/chat", base), serde_json::to_value(request)?)
            }
            RequestMode::Blocking => {
                let request = OllamaGenerateRequest {
                    model,
                    prompt: input.prompt.clone(),
                    system: input.persona().to_string(),
                    stream: false,
                    images,
                };
                (format!("{}/api/generate", base), serde_json::to_value(request)?)
            }
        };

        Ok(ProviderRequest {
            provider: ProviderKind::Ollama,
            url,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        })
    }

    fn parse_chunk(&self, chunk: &str) -> ParsedChunk {
        let mut parsed = ParsedChunk::default();
        for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(line) = serde_json::from_str::<OllamaStreamLine>(line) else {
                log::debug!("Skipping malformed Ollama line");
                continue;
            };
            if let Some(content) = line.message.and_then(|m| m.content) {
                parsed.text.push_str(&content);
            }
            if line.done {
                parsed.finished = true;
            }
        }
        parsed
    }

    fn parse_full_response(&self, body: &serde_json::Value) -> Option<String> {
        body.get("response")
            .and_then(|v| v.as_str())
            .or_else(|| body.pointer("/message/content").and_then(|v| v.as_str()))
            .map(str::to_string)
    }
}

/// `GET /api/tags`: names of the locally installed models.
pub async fn list_models(client: &Client, base_url: &str) -> Result<Vec<String>> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| AppError::Network(format!("Ollama request failed: {}. Is Ollama running?", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Provider {
            provider: "Ollama",
            status: status.as_u16(),
            body,
        });
    }

    let tags: OllamaTags = response
        .json()
        .await
        .map_err(|e| AppError::Parse(format!("Failed to parse Ollama tags: {}", e)))?;

    Ok(tags.models.into_iter().map(|m| m.name).collect())
}
