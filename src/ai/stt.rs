use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Health checks made while a spawned helper starts up.
pub const HELPER_READY_ATTEMPTS: u32 = 10;

/// A topic hint returned by context analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattlecardMatch {
    #[serde(default)]
    pub triggers: Vec<String>,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    matches: Vec<BattlecardMatch>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperHealth {
    pub status: String,
    pub model: Option<String>,
}

/// Speech-to-text for one recorded chunk.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_wav: Vec<u8>) -> Result<String>;
}

/// Keyword matching over transcript text.
#[async_trait::async_trait]
pub trait ContextAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Vec<BattlecardMatch>>;
}

/// Client for the local helper process (`/transcribe`, `/analyze-context`).
#[derive(Clone)]
pub struct HelperClient {
    client: Client,
    base_url: String,
}

impl HelperClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn health(&self) -> Result<HelperHealth> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Helper not reachable: {}", e)))?;
        response
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("Failed to parse helper health: {}", e)))
    }

    /// Polls `/health` until the helper answers. A freshly spawned helper
    /// needs a moment to load its model.
    pub async fn wait_ready(&self, attempts: u32, delay: Duration) -> Result<HelperHealth> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.health().await {
                Ok(health) => return Ok(health),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => log::debug!("Helper health attempt {} failed: {}", attempt, e),
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for HelperClient {
    async fn transcribe(&self, audio_wav: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio_wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AppError::Network(format!("MIME error: {}", e)))?;

        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Transcription request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider {
                provider: "Transcriber",
                status: status.as_u16(),
                body,
            });
        }

        let result: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("Failed to parse transcription: {}", e)))?;

        if let Some(error) = result.error {
            return Err(AppError::Audio(error));
        }
        Ok(result.text.unwrap_or_default().trim().to_string())
    }
}

#[async_trait::async_trait]
impl ContextAnalyzer for HelperClient {
    async fn analyze(&self, text: &str) -> Result<Vec<BattlecardMatch>> {
        let response = self
            .client
            .post(format!("{}/analyze-context", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Context analysis failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider {
                provider: "Analyzer",
                status: status.as_u16(),
                body,
            });
        }

        let result: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("Failed to parse analysis: {}", e)))?;
        Ok(result.matches)
    }
}
