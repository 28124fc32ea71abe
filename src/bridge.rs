//! Tauri side of the app: the webview window, event forwarding and the
//! commands the UI invokes.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, LogicalSize, Manager, WebviewWindow};

use crate::ai::battlecards::Battlecard;
use crate::ai::live_engine::{LiveMode, LiveSettings};
use crate::ai::llm::render_display_html;
use crate::ai::streaming::RequestId;
use crate::capture::screen::{self, ScreenSource};
use crate::config::{AppConfig, ChatConfig};
use crate::error::{AppError, Result};
use crate::events::EventSink;
use crate::session::manager::ChatState;
use crate::session::service::ChatService;
use crate::sidecar::Sidecar;
use crate::updater::{self, UpdateService, UpdateState};
use crate::window::{self, IgnoreMouseOptions, OverlayWindow, PointerEvent, WindowController};

/// Forwards events to every webview.
pub struct TauriSink(pub AppHandle);

impl EventSink for TauriSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.0.emit(event, payload) {
            log::error!("Failed to emit {}: {}", event, e);
        }
    }
}

fn window_err(e: tauri::Error) -> AppError {
    AppError::Window(e.to_string())
}

/// The overlay webview window. Tauri has no per-window opacity, so an
/// opacity of zero hides the window and any other value shows it again.
pub struct TauriOverlay {
    window: WebviewWindow,
    opacity: Mutex<f64>,
}

impl TauriOverlay {
    pub fn new(window: WebviewWindow) -> Self {
        Self {
            window,
            opacity: Mutex::new(1.0),
        }
    }
}

impl OverlayWindow for TauriOverlay {
    fn show(&self) -> Result<()> {
        self.window.show().map_err(window_err)
    }

    fn hide(&self) -> Result<()> {
        self.window.hide().map_err(window_err)
    }

    fn is_visible(&self) -> Result<bool> {
        self.window.is_visible().map_err(window_err)
    }

    fn set_focus(&self) -> Result<()> {
        self.window.set_focus().map_err(window_err)
    }

    fn set_size(&self, width: f64, height: f64) -> Result<()> {
        self.window
            .set_size(LogicalSize::new(width, height))
            .map_err(window_err)
    }

    fn set_ignore_mouse(&self, ignore: bool) -> Result<()> {
        self.window
            .set_ignore_cursor_events(ignore)
            .map_err(window_err)
    }

    fn set_always_on_top(&self, on_top: bool) -> Result<()> {
        self.window.set_always_on_top(on_top).map_err(window_err)
    }

    fn set_content_protected(&self, protected: bool) -> Result<()> {
        self.window
            .set_content_protected(protected)
            .map_err(window_err)
    }

    fn opacity(&self) -> f64 {
        *self.opacity.lock()
    }

    fn set_opacity(&self, opacity: f64) -> Result<()> {
        let mut current = self.opacity.lock();
        let was_shown = *current > 0.0;
        let shown = opacity > 0.0;
        if was_shown && !shown {
            self.window.hide().map_err(window_err)?;
        } else if !was_shown && shown {
            self.window.show().map_err(window_err)?;
        }
        *current = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    fn cursor_inside(&self) -> Result<bool> {
        if !self.window.is_visible().map_err(window_err)? {
            return Ok(false);
        }
        let cursor = self.window.cursor_position().map_err(window_err)?;
        let origin = self.window.outer_position().map_err(window_err)?;
        let size = self.window.outer_size().map_err(window_err)?;
        Ok(window::contains(
            (f64::from(origin.x), f64::from(origin.y)),
            (f64::from(size.width), f64::from(size.height)),
            (cursor.x, cursor.y),
        ))
    }
}

/// Everything the commands reach, managed as Tauri state.
pub struct AppServices {
    pub app_data: PathBuf,
    pub app_config: Arc<Mutex<AppConfig>>,
    pub chat: Arc<ChatService>,
    pub window: Arc<WindowController>,
    pub screen: Arc<dyn ScreenSource>,
    pub live: Arc<LiveMode>,
    pub updates: Arc<UpdateService>,
    pub sidecar: Mutex<Option<Sidecar>>,
}

type Services<'a> = tauri::State<'a, AppServices>;

fn to_string(e: AppError) -> String {
    e.to_string()
}

// ─── Window ──────────────────────────────────────────────────────────────

#[tauri::command]
pub async fn capture_screen(services: Services<'_>) -> std::result::Result<String, String> {
    let settle = services.app_config.lock().capture_settle_ms;
    screen::capture_screen(
        &*services.window.window(),
        Arc::clone(&services.screen),
        std::time::Duration::from_millis(settle),
    )
    .await
    .map_err(to_string)
}

#[tauri::command]
pub fn quit_app(app: AppHandle, services: Services<'_>) {
    services.live.disable();
    app.exit(0);
}

#[tauri::command]
pub fn set_window_size(
    services: Services<'_>,
    width: f64,
    height: f64,
) -> std::result::Result<(), String> {
    services.window.resize(width, height).map_err(to_string)
}

#[tauri::command]
pub fn set_ignore_mouse(
    services: Services<'_>,
    ignore: bool,
    options: Option<IgnoreMouseOptions>,
) -> std::result::Result<(), String> {
    services
        .window
        .set_click_through(ignore, options.unwrap_or_default())
        .map_err(to_string)
}

#[tauri::command]
pub fn pointer_event(
    services: Services<'_>,
    event: PointerEvent,
) -> std::result::Result<(), String> {
    services.window.pointer(event).map_err(to_string)
}

#[tauri::command]
pub fn toggle_always_on_top(
    services: Services<'_>,
    on_top: bool,
) -> std::result::Result<(), String> {
    services.window.toggle_always_on_top(on_top).map_err(to_string)
}

#[tauri::command]
pub fn toggle_overlay(services: Services<'_>) -> std::result::Result<bool, String> {
    services.window.toggle_visibility().map_err(to_string)
}

// ─── Updates ─────────────────────────────────────────────────────────────

#[tauri::command]
pub async fn check_for_updates(
    services: Services<'_>,
) -> std::result::Result<UpdateState, String> {
    services.updates.check_for_updates().await.map_err(to_string)
}

#[tauri::command]
pub async fn download_update(services: Services<'_>) -> std::result::Result<(), String> {
    services
        .updates
        .download_update()
        .await
        .map(|_| ())
        .map_err(to_string)
}

#[tauri::command]
pub fn quit_and_install(
    app: AppHandle,
    services: Services<'_>,
) -> std::result::Result<(), String> {
    let installer = services.updates.installer().map_err(to_string)?;
    updater::launch_installer(&installer).map_err(to_string)?;
    services.live.disable();
    app.exit(0);
    Ok(())
}

#[tauri::command]
pub fn get_update_state(services: Services<'_>) -> UpdateState {
    services.updates.state()
}

// ─── Chat ────────────────────────────────────────────────────────────────

#[tauri::command]
pub fn get_chat_state(services: Services<'_>) -> ChatState {
    (*services.chat.snapshot()).clone()
}

#[tauri::command]
pub async fn send_message(
    services: Services<'_>,
    text: String,
) -> std::result::Result<Option<RequestId>, String> {
    Ok(services.chat.send_message(&text))
}

#[tauri::command]
pub async fn analyze_screen(services: Services<'_>) -> std::result::Result<RequestId, String> {
    services
        .chat
        .analyze_screen(&*services.window.window(), Arc::clone(&services.screen))
        .await
        .map_err(to_string)
}

#[tauri::command]
pub fn stop_generation(services: Services<'_>) {
    services.chat.stop();
}

#[tauri::command]
pub fn clear_history(services: Services<'_>) {
    services.chat.clear_history();
}

#[tauri::command]
pub async fn ask_ai(services: Services<'_>, prompt: String) -> std::result::Result<String, String> {
    services
        .chat
        .ask(&prompt)
        .await
        .map(|text| render_display_html(&text))
        .map_err(to_string)
}

#[tauri::command]
pub async fn list_models(services: Services<'_>) -> std::result::Result<Vec<String>, String> {
    services.chat.list_models().await.map_err(to_string)
}

// ─── Settings ────────────────────────────────────────────────────────────

#[tauri::command]
pub fn get_config(services: Services<'_>) -> ChatConfig {
    services.chat.config()
}

#[tauri::command]
pub fn save_config(
    services: Services<'_>,
    config: ChatConfig,
) -> std::result::Result<(), String> {
    services.chat.save_config(config).map_err(to_string)
}

#[tauri::command]
pub fn get_app_config(services: Services<'_>) -> AppConfig {
    services.app_config.lock().clone()
}

#[tauri::command]
pub fn update_app_config(
    services: Services<'_>,
    new_config: AppConfig,
) -> std::result::Result<(), String> {
    new_config.save(&services.app_data).map_err(to_string)?;
    services.live.update_settings(LiveSettings::from(&new_config));
    *services.app_config.lock() = new_config;
    Ok(())
}

// ─── Live ────────────────────────────────────────────────────────────────

#[tauri::command]
pub async fn toggle_live(services: Services<'_>) -> std::result::Result<bool, String> {
    services.live.toggle().await.map_err(to_string)
}

#[tauri::command]
pub fn get_battlecards(services: Services<'_>) -> Vec<Battlecard> {
    services.live.battlecards()
}

/// Releases live resources and stops the helper on shutdown.
pub fn shutdown(app: &AppHandle) {
    use tauri_plugin_global_shortcut::GlobalShortcutExt;

    if let Err(e) = app.global_shortcut().unregister_all() {
        log::error!("Failed to unregister shortcuts: {}", e);
    }
    let Some(services) = app.try_state::<AppServices>() else {
        return;
    };
    services.live.disable();
    if let Some(helper) = services.sidecar.lock().take() {
        tauri::async_runtime::block_on(helper.kill());
    }
}
