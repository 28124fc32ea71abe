use super::streaming::ChatTransport;
use super::{ChatMessage, PromptInput, ProviderAdapter, ProviderSettings, RequestMode, Role};
use crate::error::{AppError, Result};
use crate::session::manager::{Message, Sender};

/// Prior messages sent along with each prompt.
pub const HISTORY_LIMIT: usize = 10;

/// The last [`HISTORY_LIMIT`] settled messages, as provider roles.
pub fn rolling_history(messages: &[Message]) -> Vec<ChatMessage> {
    let settled: Vec<&Message> = messages.iter().filter(|m| !m.is_loading).collect();
    settled[settled.len().saturating_sub(HISTORY_LIMIT)..]
        .iter()
        .map(|m| ChatMessage {
            role: match m.sender {
                Sender::Ai => Role::Assistant,
                Sender::User => Role::User,
            },
            content: m.text.clone(),
        })
        .collect()
}

/// Newlines become `<br>` for the webview.
pub fn render_display_html(text: &str) -> String {
    text.replace('\n', "<br>")
}

/// One blocking (non-streaming) completion.
pub async fn generate(
    transport: &dyn ChatTransport,
    adapter: &dyn ProviderAdapter,
    input: &PromptInput,
    settings: &ProviderSettings,
) -> Result<String> {
    let request = adapter.build_request(input, settings, RequestMode::Blocking)?;
    let body = transport.send(&request).await?;
    adapter.parse_full_response(&body).ok_or_else(|| {
        AppError::Parse(format!(
            "No response from {}",
            adapter.kind().display_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::streaming::ByteStream;
    use crate::ai::{adapter_for, ProviderKind, ProviderRequest};
    use parking_lot::Mutex;

    fn msg(id: i64, text: &str, sender: Sender, is_loading: bool) -> Message {
        Message {
            id,
            text: text.into(),
            sender,
            is_image: false,
            is_loading,
        }
    }

    #[test]
    fn test_history_caps_at_ten_and_maps_roles() {
        let mut messages: Vec<Message> = (0..14)
            .map(|i| {
                let sender = if i % 2 == 0 { Sender::User } else { Sender::Ai };
                msg(i, &format!("m{}", i), sender, false)
            })
            .collect();
        messages.push(msg(99, "", Sender::Ai, true));

        let history = rolling_history(&messages);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].content, "m4");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[9].content, "m13");
        assert_eq!(history[9].role, Role::Assistant);
    }

    #[test]
    fn test_short_history_is_kept_whole() {
        let history = rolling_history(&[msg(1, "Welcome to Aura", Sender::Ai, false)]);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_render_display_html() {
        assert_eq!(render_display_html("a\nb\n"), "a<br>b<br>");
    }

    struct CannedTransport {
        body: serde_json::Value,
        seen: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait::async_trait]
    impl ChatTransport for CannedTransport {
        async fn open_stream(&self, _request: &ProviderRequest) -> Result<ByteStream> {
            Err(AppError::Network("not streaming".into()))
        }

        async fn send(&self, request: &ProviderRequest) -> Result<serde_json::Value> {
            self.seen.lock().push(request.clone());
            Ok(self.body.clone())
        }
    }

    fn input() -> PromptInput {
        PromptInput {
            prompt: "hello".into(),
            image: None,
            history: vec![],
            system_context: String::new(),
        }
    }

    #[tokio::test]
    async fn test_generate_extracts_local_response() {
        let transport = CannedTransport {
            body: serde_json::json!({ "response": "Hi there" }),
            seen: Mutex::new(vec![]),
        };
        let settings = ProviderSettings {
            endpoint: "http://localhost:11434".into(),
            api_key: String::new(),
            model: "llama3".into(),
            fallback_model: None,
        };
        let text = generate(&transport, adapter_for(ProviderKind::Ollama), &input(), &settings)
            .await
            .unwrap();
        assert_eq!(text, "Hi there");
        assert_eq!(transport.seen.lock()[0].url, "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn test_generate_reports_missing_content() {
        let transport = CannedTransport {
            body: serde_json::json!({ "choices": [] }),
            seen: Mutex::new(vec![]),
        };
        let settings = ProviderSettings {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key: "sk".into(),
            model: "gpt-4o".into(),
            fallback_model: None,
        };
        let err = generate(&transport, adapter_for(ProviderKind::OpenAI), &input(), &settings)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse response: No response from OpenAI");
        assert_eq!(transport.seen.lock()[0].body["stream"], false);
    }
}
