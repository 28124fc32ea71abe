use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::manager::{ChatState, SessionAction, SessionStore};
use super::storage::StorageState;
use crate::ai::live_engine::LiveSink;
use crate::ai::llm::{self, rolling_history};
use crate::ai::streaming::{self, ChatTransport, RequestId, RequestIds, StreamResponse};
use crate::ai::{
    adapter_for, ollama, ChatMessage, ImageAttachment, PromptInput, ProviderAdapter, ProviderKind,
    ProviderSettings, RequestMode,
};
use crate::capture::screen::{self, ScreenSource};
use crate::config::{AppConfig, ChatConfig};
use crate::error::Result;
use crate::events::{self, EventSink};
use crate::window::OverlayWindow;

pub const SCREEN_PROMPT: &str = "Describe this screen.";
pub const SCREEN_MESSAGE: &str = "Analyze this screen.";

/// Runs chat requests against the configured provider and feeds the
/// results into the [`SessionStore`].
pub struct ChatService {
    store: Arc<SessionStore>,
    app_config: Arc<Mutex<AppConfig>>,
    chat_config: Mutex<ChatConfig>,
    storage: StorageState,
    transport: Arc<dyn ChatTransport>,
    events: Arc<dyn EventSink>,
    client: Client,
    ids: RequestIds,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl ChatService {
    pub fn new(
        store: Arc<SessionStore>,
        app_config: Arc<Mutex<AppConfig>>,
        chat_config: ChatConfig,
        storage: StorageState,
        transport: Arc<dyn ChatTransport>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            app_config,
            chat_config: Mutex::new(chat_config),
            storage,
            transport,
            events,
            client: Client::new(),
            ids: RequestIds::default(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<ChatState> {
        self.store.snapshot()
    }

    pub fn config(&self) -> ChatConfig {
        self.chat_config.lock().clone()
    }

    pub fn save_config(&self, config: ChatConfig) -> Result<()> {
        config.save(&self.storage.lock())?;
        *self.chat_config.lock() = config;
        Ok(())
    }

    /// Installed local models. An empty model selection is filled with the
    /// first one.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let base_url = self.app_config.lock().ollama_url.clone();
        let models = ollama::list_models(&self.client, &base_url).await?;

        let pick = {
            let cfg = self.chat_config.lock();
            (cfg.provider == ProviderKind::Ollama && cfg.model.is_empty())
                .then(|| models.first().cloned())
                .flatten()
        };
        if let Some(first) = pick {
            let mut cfg = self.config();
            cfg.model = first;
            self.save_config(cfg)?;
        }
        Ok(models)
    }

    fn dispatch(&self, action: SessionAction) -> bool {
        let changed = self.store.dispatch(action);
        if changed {
            events::emit(&*self.events, events::CHAT_UPDATED, &*self.store.snapshot());
        }
        changed
    }

    /// Shows a one-off AI-side message.
    pub fn push_notice(&self, text: impl Into<String>) {
        self.dispatch(SessionAction::PushNotice(text.into()));
    }

    /// Appends the user's text and streams a reply. Blank input is ignored.
    pub fn send_message(self: &Arc<Self>, text: &str) -> Option<RequestId> {
        if text.trim().is_empty() {
            return None;
        }
        let history = rolling_history(&self.store.snapshot().messages);
        self.dispatch(SessionAction::PushUser {
            text: text.to_string(),
            is_image: false,
        });
        Some(self.call_ai(text, None, history))
    }

    /// Sends a captured screen (data URL) for description.
    pub fn send_screen(self: &Arc<Self>, data_url: &str) -> RequestId {
        let history = rolling_history(&self.store.snapshot().messages);
        self.dispatch(SessionAction::PushUser {
            text: SCREEN_MESSAGE.to_string(),
            is_image: true,
        });
        self.call_ai(
            SCREEN_PROMPT,
            Some(ImageAttachment::from_data_url(data_url)),
            history,
        )
    }

    /// Captures the screen and asks for a description. A failed capture is
    /// reported in the chat.
    pub async fn analyze_screen(
        self: &Arc<Self>,
        window: &dyn OverlayWindow,
        source: Arc<dyn ScreenSource>,
    ) -> Result<RequestId> {
        let settle = Duration::from_millis(self.app_config.lock().capture_settle_ms);
        match screen::capture_screen(window, source, settle).await {
            Ok(data_url) => Ok(self.send_screen(&data_url)),
            Err(e) => {
                log::error!("Screen capture failed: {}", e);
                self.push_notice(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    fn prompt_input(
        &self,
        prompt: &str,
        image: Option<ImageAttachment>,
        history: Vec<ChatMessage>,
    ) -> (PromptInput, ProviderSettings, ProviderKind) {
        let chat = self.config();
        let settings = self.app_config.lock().provider_settings(&chat);
        let input = PromptInput {
            prompt: prompt.to_string(),
            image,
            history,
            system_context: chat.system_context,
        };
        (input, settings, chat.provider)
    }

    /// Starts a streaming request and makes it the active one. Any earlier
    /// request stops contributing output, and its HTTP call is cancelled as
    /// well instead of being left to run to completion.
    pub fn call_ai(
        self: &Arc<Self>,
        prompt: &str,
        image: Option<ImageAttachment>,
        history: Vec<ChatMessage>,
    ) -> RequestId {
        let request_id = self.ids.next();
        let (input, settings, kind) = self.prompt_input(prompt, image, history);
        let adapter = adapter_for(kind);

        let cancel = CancellationToken::new();
        if let Some(previous) = self.in_flight.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        self.dispatch(SessionAction::Begin(request_id));

        let request = match adapter.build_request(&input, &settings, RequestMode::Stream) {
            Ok(request) => request,
            Err(e) => {
                self.handle_stream_event(adapter, StreamResponse::error(request_id, e.to_string()), &cancel);
                return request_id;
            }
        };

        log::info!("Request {:?} -> {} ({})", request_id, kind, request.url);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                opened = service.transport.open_stream(&request) => opened,
            };
            match stream {
                Ok(stream) => {
                    let token = cancel.clone();
                    streaming::pump(request_id, stream, cancel, |event| {
                        service.handle_stream_event(adapter, event, &token)
                    })
                    .await;
                }
                Err(e) => {
                    log::error!("Request {:?} failed: {}", request_id, e);
                    service.handle_stream_event(
                        adapter,
                        StreamResponse::error(request_id, e.to_string()),
                        &cancel,
                    );
                }
            }
        });

        request_id
    }

    /// Applies one transport event. An event is forwarded to the UI only
    /// after the store accepted it, so events of a request that is no longer
    /// active change nothing and emit nothing.
    pub fn handle_stream_event(
        &self,
        adapter: &dyn ProviderAdapter,
        event: StreamResponse,
        cancel: &CancellationToken,
    ) {
        let request_id = event.request_id;

        if let Some(error) = event.error {
            let applied = self.dispatch(SessionAction::Fail {
                request_id,
                error: error.clone(),
            });
            if !applied {
                log::debug!("Dropping stale error for {:?}", request_id);
                return;
            }
            events::emit(&*self.events, events::STREAM_RESPONSE, &StreamResponse::error(request_id, error));
            self.finish(cancel);
            return;
        }

        if let Some(chunk) = event.chunk {
            let parsed = adapter.parse_chunk(&chunk);
            if !parsed.text.is_empty() {
                let applied = self.dispatch(SessionAction::Token {
                    request_id,
                    text: parsed.text.clone(),
                });
                if !applied {
                    log::debug!("Dropping stale chunk for {:?}", request_id);
                    return;
                }
                events::emit(
                    &*self.events,
                    events::STREAM_RESPONSE,
                    &StreamResponse::chunk(request_id, parsed.text),
                );
            }
            if !parsed.finished {
                return;
            }
        } else if !event.done {
            return;
        }

        if !self.dispatch(SessionAction::Complete(request_id)) {
            log::debug!("Dropping stale completion for {:?}", request_id);
            return;
        }
        events::emit(&*self.events, events::STREAM_RESPONSE, &StreamResponse::done(request_id));
        self.finish(cancel);
    }

    fn finish(&self, cancel: &CancellationToken) {
        cancel.cancel();
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|t| t.is_cancelled()) {
            *in_flight = None;
        }
    }

    /// User-initiated stop: further output of the active request is ignored.
    pub fn stop(&self) {
        if let Some(token) = self.in_flight.lock().take() {
            token.cancel();
        }
        self.dispatch(SessionAction::Cancel);
    }

    pub fn clear_history(&self) {
        self.stop();
        self.dispatch(SessionAction::Clear);
    }

    /// Non-streaming completion of `prompt` with the current history. Does
    /// not touch the session.
    pub async fn ask(&self, prompt: &str) -> Result<String> {
        let history = rolling_history(&self.store.snapshot().messages);
        let (input, settings, kind) = self.prompt_input(prompt, None, history);
        llm::generate(&*self.transport, adapter_for(kind), &input, &settings).await
    }
}

/// Final transcripts from speech mode become chat requests.
impl LiveSink for Arc<ChatService> {
    fn on_transcript(&self, text: &str) {
        self.send_message(text);
    }

    fn notice(&self, text: &str) {
        self.push_notice(text);
    }
}
