use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::storage::StorageState;
use crate::ai::streaming::RequestId;
use crate::error::Result;

pub const HISTORY_KEY: &str = "aura_history";
pub const WELCOME_TEXT: &str = "Welcome to Aura";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_loading: bool,
}

impl Message {
    fn welcome() -> Self {
        Self {
            id: 1,
            text: WELCOME_TEXT.to_string(),
            sender: Sender::Ai,
            is_image: false,
            is_loading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPhase {
    #[default]
    Idle,
    AwaitingFirstToken,
    Streaming,
    Done,
    Error,
    Cancelled,
}

/// Immutable chat snapshot. Every change produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub active_request: Option<RequestId>,
    pub phase: RequestPhase,
    /// Message id of the active request's reply. Notices may land after it.
    #[serde(skip)]
    placeholder: Option<i64>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::with_messages(vec![Message::welcome()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    PushUser { text: String, is_image: bool },
    /// An AI-side message that is not a model response (capture or
    /// microphone failures).
    PushNotice(String),
    Begin(RequestId),
    Token { request_id: RequestId, text: String },
    Complete(RequestId),
    Fail { request_id: RequestId, error: String },
    Cancel,
    Clear,
}

impl ChatState {
    pub fn with_messages(mut messages: Vec<Message>) -> Self {
        for msg in &mut messages {
            msg.is_loading = false;
        }
        Self {
            messages,
            active_request: None,
            phase: RequestPhase::Idle,
            placeholder: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.active_request.is_some()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn next_message_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        now.max(last + 1)
    }

    fn push(&mut self, text: String, sender: Sender, is_image: bool, is_loading: bool) -> i64 {
        let id = self.next_message_id();
        self.messages.push(Message {
            id,
            text,
            sender,
            is_image,
            is_loading,
        });
        id
    }

    fn placeholder_mut(&mut self) -> Option<&mut Message> {
        let id = self.placeholder?;
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Stops the loading indicator of the active reply and detaches it.
    fn settle_placeholder(&mut self) -> Option<&mut Message> {
        let id = self.placeholder.take()?;
        let msg = self.messages.iter_mut().rev().find(|m| m.id == id)?;
        msg.is_loading = false;
        Some(msg)
    }

    fn is_active(&self, request_id: RequestId) -> bool {
        self.active_request == Some(request_id)
    }

    /// Applies `action`, returning the next state or `None` when nothing
    /// changes. Events for a request that is no longer active are dropped.
    pub fn reduce(&self, action: SessionAction) -> Option<ChatState> {
        let mut next = self.clone();
        match action {
            SessionAction::PushUser { text, is_image } => {
                next.push(text, Sender::User, is_image, false);
            }
            SessionAction::PushNotice(text) => {
                next.push(text, Sender::Ai, false, false);
            }
            SessionAction::Begin(request_id) => {
                // a superseded request may have left its placeholder behind
                // the new user message
                for msg in &mut next.messages {
                    msg.is_loading = false;
                }
                let reply = next.push(String::new(), Sender::Ai, false, true);
                next.placeholder = Some(reply);
                next.active_request = Some(request_id);
                next.phase = RequestPhase::AwaitingFirstToken;
            }
            SessionAction::Token { request_id, text } => {
                if !self.is_active(request_id) || text.is_empty() {
                    return None;
                }
                next.placeholder_mut()?.text.push_str(&text);
                next.phase = RequestPhase::Streaming;
            }
            SessionAction::Complete(request_id) => {
                if !self.is_active(request_id) {
                    return None;
                }
                next.settle_placeholder();
                next.active_request = None;
                next.phase = RequestPhase::Done;
            }
            SessionAction::Fail { request_id, error } => {
                if !self.is_active(request_id) {
                    return None;
                }
                if let Some(reply) = next.settle_placeholder() {
                    reply.text = format!("Error: {}", error);
                }
                next.active_request = None;
                next.phase = RequestPhase::Error;
            }
            SessionAction::Cancel => {
                self.active_request?;
                next.settle_placeholder();
                next.active_request = None;
                next.phase = RequestPhase::Cancelled;
            }
            SessionAction::Clear => {
                next = ChatState::default();
            }
        }
        (next != *self).then_some(next)
    }
}

/// Single owner of the chat state. Readers take `Arc` snapshots; writers go
/// through [`SessionStore::dispatch`], which swaps in a whole new value and
/// writes the history to storage when it changed.
pub struct SessionStore {
    state: Mutex<Arc<ChatState>>,
    storage: Option<StorageState>,
}

impl SessionStore {
    pub fn new(state: ChatState) -> Self {
        Self {
            state: Mutex::new(Arc::new(state)),
            storage: None,
        }
    }

    pub fn load(storage: StorageState) -> Result<Self> {
        let saved = storage.lock().get(HISTORY_KEY)?;
        let messages = saved
            .and_then(|json| match serde_json::from_str::<Vec<Message>>(&json) {
                Ok(messages) => Some(messages),
                Err(e) => {
                    log::error!("Discarding unreadable chat history: {}", e);
                    None
                }
            })
            .filter(|messages| !messages.is_empty());

        let state = match messages {
            Some(messages) => ChatState::with_messages(messages),
            None => ChatState::default(),
        };

        Ok(Self {
            state: Mutex::new(Arc::new(state)),
            storage: Some(storage),
        })
    }

    pub fn snapshot(&self) -> Arc<ChatState> {
        self.state.lock().clone()
    }

    /// Returns whether the state changed.
    pub fn dispatch(&self, action: SessionAction) -> bool {
        let mut guard = self.state.lock();
        let Some(next) = guard.reduce(action) else {
            return false;
        };
        let history_changed = next.messages != guard.messages;
        *guard = Arc::new(next);

        if history_changed {
            self.persist(&guard.messages);
        }
        true
    }

    fn persist(&self, messages: &[Message]) {
        let Some(ref storage) = self.storage else {
            return;
        };
        let result = serde_json::to_string(messages)
            .map_err(crate::error::AppError::from)
            .and_then(|json| storage.lock().set(HISTORY_KEY, &json));
        if let Err(e) = result {
            log::error!("Failed to save chat history: {}", e);
        }
    }
}
