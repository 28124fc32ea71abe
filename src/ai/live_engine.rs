//! Live listening modes.
//!
//! Speech mode turns each final transcript into a chat request and restarts
//! recognition whenever it ends on its own. Transcription mode records the
//! microphone in fixed chunks, transcribes the loud ones and surfaces
//! battlecards for matched topics. Both are best-effort: failures while
//! live are logged and skipped, only failing to acquire the microphone
//! turns live mode off again.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::battlecards::{Battlecard, BattlecardBoard};
use super::stt::{ContextAnalyzer, Transcriber};
use crate::capture::audio::{encode_wav, AudioLevelMeter, MediaDevices, MicrophoneStream};
use crate::config::{AppConfig, LiveStrategy};
use crate::error::{AppError, Result};
use crate::events::{self, EventSink};

#[derive(Debug)]
pub enum SpeechEvent {
    Final(String),
    /// Recognition stopped by itself (silence, timeout).
    End,
    Error(AppError),
}

/// Continuous speech recognition.
#[async_trait::async_trait]
pub trait SpeechInput: Send + Sync {
    /// Acquires the recognizer. Calling it while started is a no-op.
    async fn start(&self) -> Result<()>;

    async fn next_event(&self) -> SpeechEvent;

    fn stop(&self);
}

/// Where live results go.
pub trait LiveSink: Send + Sync {
    fn on_transcript(&self, text: &str);

    fn notice(&self, text: &str);
}

/// Speech recognition from microphone windows plus a [`Transcriber`]. Each
/// turn records one `window` of audio; silence ends the turn.
pub struct ChunkedRecognizer {
    devices: Arc<dyn MediaDevices>,
    transcriber: Arc<dyn Transcriber>,
    window: Duration,
    mic: Mutex<Option<Arc<dyn MicrophoneStream>>>,
}

impl ChunkedRecognizer {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        transcriber: Arc<dyn Transcriber>,
        window: Duration,
    ) -> Self {
        Self {
            devices,
            transcriber,
            window,
            mic: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl SpeechInput for ChunkedRecognizer {
    async fn start(&self) -> Result<()> {
        let mut mic = self.mic.lock();
        if mic.is_none() {
            *mic = Some(self.devices.open_microphone()?);
        }
        Ok(())
    }

    async fn next_event(&self) -> SpeechEvent {
        tokio::time::sleep(self.window).await;

        let Some(mic) = self.mic.lock().clone() else {
            return SpeechEvent::End;
        };
        let samples = mic.take_samples();
        if samples.is_empty() {
            return SpeechEvent::End;
        }
        let wav = match encode_wav(&samples, mic.sample_rate()) {
            Ok(wav) => wav,
            Err(e) => return SpeechEvent::Error(e),
        };
        match self.transcriber.transcribe(wav).await {
            Ok(text) if !text.trim().is_empty() => SpeechEvent::Final(text),
            Ok(_) => SpeechEvent::End,
            Err(e) => SpeechEvent::Error(e),
        }
    }

    fn stop(&self) {
        if let Some(mic) = self.mic.lock().take() {
            mic.stop();
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub strategy: LiveStrategy,
    pub chunk: Duration,
    pub silence_threshold: f32,
}

impl From<&AppConfig> for LiveSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            strategy: config.live_strategy,
            chunk: Duration::from_secs(config.live_chunk_secs.max(1)),
            silence_threshold: config.silence_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub live: bool,
    pub strategy: LiveStrategy,
}

#[derive(Debug, Clone, Serialize)]
struct TranscriptionChunk<'a> {
    text: &'a str,
}

/// Everything acquired for one live session.
struct LiveSession {
    generation: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    mic: Option<Arc<dyn MicrophoneStream>>,
    meter: Option<Arc<dyn AudioLevelMeter>>,
    speech: Option<Arc<dyn SpeechInput>>,
}

impl LiveSession {
    fn release(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(speech) = self.speech.take() {
            speech.stop();
        }
        if let Some(mic) = self.mic.take() {
            mic.stop();
        }
        if let Some(meter) = self.meter.take() {
            meter.close();
        }
    }
}

pub struct LiveMode {
    settings: Mutex<LiveSettings>,
    devices: Arc<dyn MediaDevices>,
    speech: Arc<dyn SpeechInput>,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn ContextAnalyzer>,
    sink: Arc<dyn LiveSink>,
    events: Arc<dyn EventSink>,
    board: Mutex<BattlecardBoard>,
    session: Mutex<Option<LiveSession>>,
    generation: Mutex<u64>,
}

impl LiveMode {
    pub fn new(
        settings: LiveSettings,
        devices: Arc<dyn MediaDevices>,
        speech: Arc<dyn SpeechInput>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn ContextAnalyzer>,
        sink: Arc<dyn LiveSink>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(settings),
            devices,
            speech,
            transcriber,
            analyzer,
            sink,
            events,
            board: Mutex::new(BattlecardBoard::new()),
            session: Mutex::new(None),
            generation: Mutex::new(0),
        })
    }

    pub fn is_live(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Takes effect on the next enable.
    pub fn update_settings(&self, settings: LiveSettings) {
        *self.settings.lock() = settings;
    }

    pub async fn toggle(self: &Arc<Self>) -> Result<bool> {
        if self.is_live() {
            self.disable();
            Ok(false)
        } else {
            self.enable().await?;
            Ok(true)
        }
    }

    /// Acquires the microphone for the configured strategy and starts
    /// listening. An acquisition failure is reported in the chat and leaves
    /// live mode off.
    pub async fn enable(self: &Arc<Self>) -> Result<()> {
        if self.is_live() {
            return Ok(());
        }
        let settings = self.settings.lock().clone();
        let generation = {
            let mut g = self.generation.lock();
            *g += 1;
            *g
        };

        let acquired = match settings.strategy {
            LiveStrategy::Speech => self.start_speech(generation).await,
            LiveStrategy::Transcription => self.start_transcription(generation, &settings),
        };

        let session = match acquired {
            Ok(session) => session,
            Err(e) => {
                log::error!("Live mode unavailable: {}", e);
                self.sink.notice(&format!("Microphone unavailable: {}", e));
                self.emit_status(false, settings.strategy);
                return Err(e);
            }
        };

        if let Some(stale) = self.session.lock().replace(session) {
            stale.release();
        }
        log::info!("Live mode on ({:?})", settings.strategy);
        self.emit_status(true, settings.strategy);
        Ok(())
    }

    /// Releases every live resource and drops the shown battlecards. Safe
    /// to call when already off.
    pub fn disable(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.release();
        self.board.lock().clear();
        self.emit_battlecards(Instant::now());
        log::info!("Live mode off");
        let strategy = self.settings.lock().strategy;
        self.emit_status(false, strategy);
    }

    fn fail(&self, generation: u64, error: AppError) {
        let current = self
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation);
        if !current {
            return;
        }
        log::error!("Live mode stopped: {}", error);
        self.sink.notice(&format!("Microphone unavailable: {}", error));
        self.disable();
    }

    fn emit_status(&self, live: bool, strategy: LiveStrategy) {
        events::emit(&*self.events, events::LIVE_STATUS, &LiveStatus { live, strategy });
    }

    async fn start_speech(self: &Arc<Self>, generation: u64) -> Result<LiveSession> {
        self.speech.start().await?;

        let cancel = CancellationToken::new();
        let speech = Arc::clone(&self.speech);
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(speech_loop(weak, generation, speech, cancel.clone()));

        Ok(LiveSession {
            generation,
            cancel,
            task: Some(task),
            mic: None,
            meter: None,
            speech: Some(Arc::clone(&self.speech)),
        })
    }

    fn start_transcription(
        self: &Arc<Self>,
        generation: u64,
        settings: &LiveSettings,
    ) -> Result<LiveSession> {
        let mic = self.devices.open_microphone()?;
        let meter = match self.devices.open_level_meter() {
            Ok(meter) => meter,
            Err(e) => {
                mic.stop();
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(transcription_loop(
            Arc::downgrade(self),
            Arc::clone(&mic),
            Arc::clone(&meter),
            settings.clone(),
            cancel.clone(),
        ));

        Ok(LiveSession {
            generation,
            cancel,
            task: Some(task),
            mic: Some(mic),
            meter: Some(meter),
            speech: None,
        })
    }

    async fn process_chunk(&self, wav: Vec<u8>) {
        let text = match self.transcriber.transcribe(wav).await {
            Ok(text) => text,
            Err(e) => {
                log::debug!("Transcription chunk skipped: {}", e);
                return;
            }
        };
        if text.trim().is_empty() {
            return;
        }
        events::emit(
            &*self.events,
            events::TRANSCRIPTION_CHUNK,
            &TranscriptionChunk { text: &text },
        );

        let matches = match self.analyzer.analyze(&text).await {
            Ok(matches) => matches,
            Err(e) => {
                log::debug!("Context analysis skipped: {}", e);
                return;
            }
        };
        let added = self.board.lock().add_matches(&matches, Instant::now());
        if !added.is_empty() {
            self.emit_battlecards(Instant::now());
        }
    }

    fn emit_battlecards(&self, now: Instant) {
        let active = self.board.lock().active(now);
        events::emit(&*self.events, events::BATTLECARDS, &active);
    }

    pub fn battlecards(&self) -> Vec<Battlecard> {
        self.board.lock().active(Instant::now())
    }

    /// Drops expired cards and pushes the new list when anything expired.
    pub fn expire_battlecards(&self, now: Instant) {
        let expired = self.board.lock().expire(now);
        if !expired.is_empty() {
            self.emit_battlecards(now);
        }
    }
}

impl Drop for LiveMode {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.release();
        }
    }
}

async fn speech_loop(
    live: Weak<LiveMode>,
    generation: u64,
    speech: Arc<dyn SpeechInput>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = speech.next_event() => event,
        };
        let Some(live) = live.upgrade() else {
            return;
        };

        match event {
            SpeechEvent::Final(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                events::emit(
                    &*live.events,
                    events::TRANSCRIPTION_CHUNK,
                    &TranscriptionChunk { text },
                );
                live.sink.on_transcript(text);
            }
            SpeechEvent::End | SpeechEvent::Error(_) => {
                if let SpeechEvent::Error(e) = event {
                    log::debug!("Speech recognition error: {}", e);
                }
                if cancel.is_cancelled() {
                    return;
                }
                // recognition ended on its own; keep listening while live
                if let Err(e) = speech.start().await {
                    live.fail(generation, e);
                    return;
                }
            }
        }
    }
}

async fn transcription_loop(
    live: Weak<LiveMode>,
    mic: Arc<dyn MicrophoneStream>,
    meter: Arc<dyn AudioLevelMeter>,
    settings: LiveSettings,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + settings.chunk;
    let mut interval = tokio::time::interval_at(start, settings.chunk);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let samples = mic.take_samples();
        if samples.is_empty() || meter.level(&samples) < settings.silence_threshold {
            continue;
        }
        let wav = match encode_wav(&samples, mic.sample_rate()) {
            Ok(wav) => wav,
            Err(e) => {
                log::debug!("Dropping audio chunk: {}", e);
                continue;
            }
        };

        let Some(live) = live.upgrade() else {
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = live.process_chunk(wav) => {}
        }
    }
}
