//! Push channel from the host to the webview.
//!
//! The desktop build forwards these through `AppHandle::emit`; tests record
//! them.

use serde::Serialize;

pub const STREAM_RESPONSE: &str = "stream-response";
pub const UPDATE_MSG: &str = "update-msg";
pub const APP_WOKE_UP: &str = "app-woke-up";
pub const CHAT_UPDATED: &str = "chat-updated";
pub const TRANSCRIPTION_CHUNK: &str = "transcription-chunk";
pub const BATTLECARDS: &str = "battlecards";
pub const LIVE_STATUS: &str = "live-status";

pub trait EventSink: Send + Sync {
    fn emit_json(&self, event: &str, payload: serde_json::Value);
}

pub fn emit<T: Serialize + ?Sized>(sink: &dyn EventSink, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit_json(event, value),
        Err(e) => log::error!("Failed to serialize {} payload: {}", event, e),
    }
}
