use serde::{Deserialize, Serialize};

use super::{
    ParsedChunk, PromptInput, ProviderAdapter, ProviderKind, ProviderRequest, ProviderSettings,
    RequestMode, Role,
};
use crate::error::{AppError, Result};

pub const DONE_SENTINEL: &str = "[DONE]";
const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: Role,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

/// OpenAI-compatible chat completions.
pub struct OpenAIAdapter;

impl ProviderAdapter for OpenAIAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn build_request(
        &self,
        input: &PromptInput,
        settings: &ProviderSettings,
        mode: RequestMode,
    ) -> Result<ProviderRequest> {
        if settings.api_key.trim().is_empty() {
            return Err(AppError::Config(
                "OpenAI API key not configured. Go to Settings to add your key.".to_string(),
            ));
        }
        let model = settings.resolve_model()?;

        let mut messages: Vec<OpenAIMessage> = input
            .leading_messages()
            .into_iter()
            .map(|m| OpenAIMessage {
                role: m.role,
                content: serde_json::Value::String(m.content),
            })
            .collect();

        let mut parts = vec![serde_json::json!({ "type": "text", "text": input.prompt })];
        if let Some(ref img) = input.image {
            parts.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": img.data_url() }
            }));
        }
        messages.push(OpenAIMessage {
            role: Role::User,
            content: serde_json::Value::Array(parts),
        });

        let request = OpenAIRequest {
            model,
            messages,
            stream: mode == RequestMode::Stream,
        };

        Ok(ProviderRequest {
            provider: ProviderKind::OpenAI,
            url: settings.endpoint.clone(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", settings.api_key),
                ),
            ],
            body: serde_json::to_value(request)?,
        })
    }

    fn parse_chunk(&self, chunk: &str) -> ParsedChunk {
        let mut parsed = ParsedChunk::default();
        for line in chunk.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let data = line.strip_prefix(DATA_PREFIX).map(str::trim);
            if line == DONE_SENTINEL || data == Some(DONE_SENTINEL) {
                parsed.finished = true;
                return parsed;
            }
            let Some(data) = data else {
                continue;
            };
            let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                continue;
            };
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
            {
                parsed.text.push_str(&content);
            }
        }
        parsed
    }

    fn parse_full_response(&self, body: &serde_json::Value) -> Option<String> {
        body.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatMessage, ImageAttachment};

    fn settings(api_key: &str) -> ProviderSettings {
        ProviderSettings {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key: api_key.into(),
            model: String::new(),
            fallback_model: Some("gpt-4o".into()),
        }
    }

    fn input() -> PromptInput {
        PromptInput {
            prompt: "Describe this screen.".into(),
            image: Some(ImageAttachment::from_data_url("data:image/png;base64,AAAA")),
            history: vec![ChatMessage {
                role: Role::User,
                content: "hello".into(),
            }],
            system_context: String::new(),
        }
    }

    #[test]
    fn test_stream_request_shape() {
        let req = OpenAIAdapter
            .build_request(&input(), &settings("sk-test"), RequestMode::Stream)
            .unwrap();

        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer sk-test"));
        assert_eq!(req.body["model"], "gpt-4o");
        assert_eq!(req.body["stream"], true);

        let messages = req.body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], crate::config::DEFAULT_SYSTEM);
        assert_eq!(messages[1]["content"], "hello");

        let parts = messages[2]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Describe this screen.");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let err = OpenAIAdapter
            .build_request(&input(), &settings(""), RequestMode::Stream)
            .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_parse_chunk_stops_at_done() {
        let parsed = OpenAIAdapter.parse_chunk(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert_eq!(parsed.text, "Hi");
        assert!(parsed.finished);
    }

    #[test]
    fn test_parse_chunk_skips_noise() {
        let parsed = OpenAIAdapter.parse_chunk(
            ": keep-alive\ndata: {broken\ndata: {\"choices\":[{\"delta\":{}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}",
        );
        assert_eq!(parsed.text, "ok");
        assert!(!parsed.finished);
    }

    #[test]
    fn test_parse_full_response() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello\nthere" } }]
        });
        assert_eq!(
            OpenAIAdapter.parse_full_response(&body).as_deref(),
            Some("Hello\nthere")
        );
        assert_eq!(OpenAIAdapter.parse_full_response(&serde_json::json!({ "choices": [] })), None);
    }
}
