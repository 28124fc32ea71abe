pub mod ai;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod sidecar;
pub mod updater;
pub mod window;

#[cfg(feature = "desktop")]
pub mod bridge;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tauri::window::{Effect, EffectsBuilder};
    use tauri::{Manager, RunEvent, WebviewUrl, WebviewWindowBuilder};
    use tauri_plugin_global_shortcut::{GlobalShortcutExt, ShortcutState};

    use ai::battlecards::KeywordAnalyzer;
    use ai::live_engine::{ChunkedRecognizer, LiveMode, LiveSettings, LiveSink};
    use ai::streaming::HttpTransport;
    use ai::stt::{ContextAnalyzer, HelperClient, Transcriber, HELPER_READY_ATTEMPTS};
    use capture::audio::{CpalDevices, MediaDevices};
    use capture::screen::XcapSource;
    use config::{AnalysisBackend, AppConfig, ChatConfig};
    use events::EventSink;
    use session::manager::SessionStore;
    use session::service::ChatService;
    use session::storage::Storage;
    use updater::{HttpUpdater, UpdateService};
    use window::{
        WindowController, OVERLAY_HEIGHT, OVERLAY_LABEL, OVERLAY_WIDTH, OVERLAY_X, OVERLAY_Y,
        POINTER_POLL,
    };

    env_logger::init();

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .plugin(tauri_plugin_shell::init())
        .setup(|app| {
            // ─── State ───────────────────────────────────────────────────
            let app_data = app.path().app_data_dir()?;
            std::fs::create_dir_all(&app_data)?;

            let app_config = AppConfig::load(&app_data);
            let storage = Arc::new(Mutex::new(Storage::open(&app_data.join("aura.db"))?));
            let chat_config = ChatConfig::load(&storage.lock())?.with_env_overrides();
            let store = Arc::new(SessionStore::load(storage.clone())?);

            let events: Arc<dyn EventSink> = Arc::new(bridge::TauriSink(app.handle().clone()));
            let client = reqwest::Client::new();

            let chat = Arc::new(ChatService::new(
                store,
                Arc::new(Mutex::new(app_config.clone())),
                chat_config,
                storage,
                Arc::new(HttpTransport::new(client.clone())),
                events.clone(),
            ));

            // ─── Overlay window ──────────────────────────────────────────
            let webview = WebviewWindowBuilder::new(app, OVERLAY_LABEL, WebviewUrl::App("index.html".into()))
                .title("Aura")
                .inner_size(OVERLAY_WIDTH, OVERLAY_HEIGHT)
                .position(OVERLAY_X, OVERLAY_Y)
                .transparent(true)
                .decorations(false)
                .shadow(false)
                .resizable(true)
                .always_on_top(true)
                .skip_taskbar(false)
                .content_protected(true)
                .effects(EffectsBuilder::new().effect(Effect::HudWindow).build())
                .build()?;

            let window = Arc::new(WindowController::new(
                Arc::new(bridge::TauriOverlay::new(webview)),
                events.clone(),
            )?);

            // ─── Live mode ───────────────────────────────────────────────
            let helper = HelperClient::new(client.clone(), app_config.helper_url.clone());
            let helper_check = helper.clone();
            let transcriber: Arc<dyn Transcriber> = Arc::new(helper.clone());
            let analyzer: Arc<dyn ContextAnalyzer> = match app_config.analysis_backend {
                AnalysisBackend::Helper => Arc::new(helper),
                AnalysisBackend::Builtin => Arc::new(KeywordAnalyzer),
            };
            let devices: Arc<dyn MediaDevices> = Arc::new(CpalDevices);
            let settings = LiveSettings::from(&app_config);
            let speech = Arc::new(ChunkedRecognizer::new(
                devices.clone(),
                transcriber.clone(),
                settings.chunk,
            ));
            let sink: Arc<dyn LiveSink> = Arc::new(chat.clone());
            let live = LiveMode::new(settings, devices, speech, transcriber, analyzer, sink, events.clone());

            // ─── Updates ─────────────────────────────────────────────────
            let cache_dir = app.path().app_cache_dir()?;
            let updates = Arc::new(UpdateService::new(
                Arc::new(HttpUpdater::new(
                    client,
                    app_config.update_manifest_url.clone(),
                    env!("CARGO_PKG_VERSION"),
                    cache_dir.join("updates"),
                )),
                events,
            ));

            let sidecar = match app_config.helper_command.as_deref() {
                Some(command) => tauri::async_runtime::block_on(async {
                    sidecar::Sidecar::spawn(command)
                })
                .map_err(|e| log::error!("Helper not started: {}", e))
                .ok(),
                None => None,
            };

            // ─── Global hotkey ───────────────────────────────────────────
            let hotkey_window = window.clone();
            app.global_shortcut()
                .on_shortcut(app_config.hotkey.as_str(), move |_app, _shortcut, event| {
                    if event.state() != ShortcutState::Pressed {
                        return;
                    }
                    if let Err(e) = hotkey_window.toggle_visibility() {
                        log::error!("Failed to toggle overlay: {}", e);
                    }
                })?;

            log::info!("Aura initialized. Hotkey: {}", app_config.hotkey);

            // ─── Background tasks ────────────────────────────────────────
            if app_config.update_manifest_url.is_some() && !cfg!(debug_assertions) {
                let updates = updates.clone();
                tauri::async_runtime::spawn(async move {
                    if let Err(e) = updates.check_for_updates().await {
                        log::debug!("Startup update check failed: {}", e);
                    }
                });
            }

            if sidecar.is_some() || app_config.analysis_backend == AnalysisBackend::Helper {
                tauri::async_runtime::spawn(async move {
                    match helper_check.wait_ready(HELPER_READY_ATTEMPTS, Duration::from_secs(1)).await {
                        Ok(health) => log::info!(
                            "Helper ready: {} ({})",
                            health.status,
                            health.model.as_deref().unwrap_or("no model")
                        ),
                        Err(e) => log::warn!("Helper not ready, live transcription will fail: {}", e),
                    }
                });
            }

            let hover = Arc::downgrade(&window);
            tauri::async_runtime::spawn(async move {
                let mut interval = tokio::time::interval(POINTER_POLL);
                loop {
                    interval.tick().await;
                    let Some(window) = hover.upgrade() else {
                        return;
                    };
                    if let Err(e) = window.track_pointer() {
                        log::debug!("Pointer check failed: {}", e);
                    }
                }
            });

            let ticker = Arc::downgrade(&live);
            tauri::async_runtime::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    let Some(live) = ticker.upgrade() else {
                        return;
                    };
                    live.expire_battlecards(std::time::Instant::now());
                }
            });

            app.manage(bridge::AppServices {
                app_data,
                app_config: Arc::new(Mutex::new(app_config)),
                chat,
                window,
                screen: Arc::new(XcapSource),
                live,
                updates,
                sidecar: Mutex::new(sidecar),
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Window
            bridge::capture_screen,
            bridge::quit_app,
            bridge::set_window_size,
            bridge::set_ignore_mouse,
            bridge::pointer_event,
            bridge::toggle_always_on_top,
            bridge::toggle_overlay,
            // Updates
            bridge::check_for_updates,
            bridge::download_update,
            bridge::quit_and_install,
            bridge::get_update_state,
            // Chat
            bridge::get_chat_state,
            bridge::send_message,
            bridge::analyze_screen,
            bridge::stop_generation,
            bridge::clear_history,
            bridge::ask_ai,
            bridge::list_models,
            // Settings
            bridge::get_config,
            bridge::save_config,
            bridge::get_app_config,
            bridge::update_app_config,
            // Live
            bridge::toggle_live,
            bridge::get_battlecards,
        ])
        .build(tauri::generate_context!())
        .expect("error while building Aura");

    app.run(|handle, event| {
        if let RunEvent::Exit = event {
            bridge::shutdown(handle);
        }
    });
}
