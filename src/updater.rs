//! Self-update against a JSON manifest `{version, url, notes?}`.
//!
//! Progress is pushed to the UI as `update-msg` events and folded into an
//! [`UpdateState`] the same way the UI does.

use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::events::{self, EventSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    #[default]
    Idle,
    Checking,
    Available,
    Downloading,
    Ready,
    Uptodate,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMsg {
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl UpdateMsg {
    pub fn status(status: UpdateStatus) -> Self {
        Self {
            status,
            percent: None,
            error: None,
            version: None,
        }
    }

    pub fn progress(percent: f64) -> Self {
        Self {
            percent: Some(percent),
            ..Self::status(UpdateStatus::Downloading)
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(UpdateStatus::Error)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateState {
    pub status: UpdateStatus,
    pub percent: u8,
    pub error: Option<String>,
}

impl UpdateState {
    pub fn apply(&mut self, msg: &UpdateMsg) {
        let percent = match msg.status {
            UpdateStatus::Downloading => msg.percent.unwrap_or(0.0).round().clamp(0.0, 100.0) as u8,
            UpdateStatus::Ready => 100,
            UpdateStatus::Error => self.percent,
            _ => 0,
        };
        self.status = msg.status;
        self.percent = percent;
        self.error = match msg.status {
            UpdateStatus::Error => msg.error.clone(),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn version_parts(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

/// Dotted numeric comparison; missing components count as zero.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let mut a = version_parts(candidate);
    let mut b = version_parts(current);
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    a > b
}

#[async_trait::async_trait]
pub trait Updater: Send + Sync {
    /// The newer release, if any.
    async fn check(&self) -> Result<Option<Manifest>>;

    async fn download(
        &self,
        manifest: &Manifest,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf>;
}

pub struct HttpUpdater {
    client: Client,
    manifest_url: Option<String>,
    current_version: String,
    download_dir: PathBuf,
}

impl HttpUpdater {
    pub fn new(
        client: Client,
        manifest_url: Option<String>,
        current_version: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            manifest_url,
            current_version: current_version.into(),
            download_dir: download_dir.into(),
        }
    }
}

fn file_name_for(manifest: &Manifest) -> String {
    manifest
        .url
        .rsplit('/')
        .next()
        .map(|name| name.split('?').next().unwrap_or(name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("aura-{}.bin", manifest.version))
}

#[async_trait::async_trait]
impl Updater for HttpUpdater {
    async fn check(&self) -> Result<Option<Manifest>> {
        let Some(ref url) = self.manifest_url else {
            return Ok(None);
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Update(format!("Update check failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Update(format!(
                "Update server returned {}",
                response.status()
            )));
        }
        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| AppError::Update(format!("Invalid update manifest: {}", e)))?;

        Ok(is_newer(&manifest.version, &self.current_version).then_some(manifest))
    }

    async fn download(
        &self,
        manifest: &Manifest,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf> {
        let response = self
            .client
            .get(&manifest.url)
            .send()
            .await
            .map_err(|e| AppError::Update(format!("Download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Update(format!(
                "Download returned {}",
                response.status()
            )));
        }

        let total = response.content_length();
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(file_name_for(manifest));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut received: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AppError::Update(format!("Download interrupted: {}", e)))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                on_progress(received as f64 * 100.0 / total as f64);
            }
        }
        file.flush().await?;

        log::info!("Update {} downloaded to {}", manifest.version, path.display());
        Ok(path)
    }
}

/// Drives one updater and reports through `update-msg`.
pub struct UpdateService {
    updater: Arc<dyn Updater>,
    events: Arc<dyn EventSink>,
    state: Mutex<UpdateState>,
    available: Mutex<Option<Manifest>>,
    downloaded: Mutex<Option<PathBuf>>,
}

impl UpdateService {
    pub fn new(updater: Arc<dyn Updater>, events: Arc<dyn EventSink>) -> Self {
        Self {
            updater,
            events,
            state: Mutex::new(UpdateState::default()),
            available: Mutex::new(None),
            downloaded: Mutex::new(None),
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state.lock().clone()
    }

    fn publish(&self, msg: UpdateMsg) {
        self.state.lock().apply(&msg);
        events::emit(&*self.events, events::UPDATE_MSG, &msg);
    }

    /// Checks and, when a newer version exists, downloads it right away.
    pub async fn check_for_updates(&self) -> Result<UpdateState> {
        self.publish(UpdateMsg::status(UpdateStatus::Checking));

        match self.updater.check().await {
            Ok(Some(manifest)) => {
                log::info!("Update available: {}", manifest.version);
                self.publish(UpdateMsg {
                    version: Some(manifest.version.clone()),
                    ..UpdateMsg::status(UpdateStatus::Available)
                });
                *self.available.lock() = Some(manifest);
                self.download_update().await?;
            }
            Ok(None) => self.publish(UpdateMsg::status(UpdateStatus::Uptodate)),
            Err(e) => {
                log::error!("Update check failed: {}", e);
                self.publish(UpdateMsg::error(e.to_string()));
                return Err(e);
            }
        }
        Ok(self.state())
    }

    pub async fn download_update(&self) -> Result<PathBuf> {
        if let Some(path) = self.downloaded.lock().clone() {
            return Ok(path);
        }
        let manifest = self
            .available
            .lock()
            .clone()
            .ok_or_else(|| AppError::Update("No update available".to_string()))?;

        self.publish(UpdateMsg::progress(0.0));
        let on_progress = |percent: f64| self.publish(UpdateMsg::progress(percent));

        match self.updater.download(&manifest, &on_progress).await {
            Ok(path) => {
                *self.downloaded.lock() = Some(path.clone());
                self.publish(UpdateMsg::status(UpdateStatus::Ready));
                Ok(path)
            }
            Err(e) => {
                log::error!("Update download failed: {}", e);
                self.publish(UpdateMsg::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// The installer to launch before exiting.
    pub fn installer(&self) -> Result<PathBuf> {
        self.downloaded
            .lock()
            .clone()
            .ok_or_else(|| AppError::Update("Update has not been downloaded".to_string()))
    }
}

/// Starts the downloaded installer detached from this process.
pub fn launch_installer(path: &Path) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = std::process::Command::new("open");
        c.arg(path);
        c
    };
    #[cfg(target_os = "windows")]
    let mut command = std::process::Command::new(path);
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(path);
        c
    };
    command.spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;

    #[test]
    fn test_version_comparison() {
        assert!(is_newer("0.2.0", "0.1.9"));
        assert!(is_newer("v1.10", "1.9.5"));
        assert!(!is_newer("1.0", "1.0.0"));
        assert!(!is_newer("0.9.9", "1.0.0"));
        assert!(is_newer("1.0.1-beta", "1.0.0"));
    }

    #[test]
    fn test_state_follows_messages() {
        let mut state = UpdateState::default();

        state.apply(&UpdateMsg::status(UpdateStatus::Available));
        assert_eq!((state.status, state.percent), (UpdateStatus::Available, 0));

        state.apply(&UpdateMsg::progress(41.6));
        assert_eq!((state.status, state.percent), (UpdateStatus::Downloading, 42));

        state.apply(&UpdateMsg::status(UpdateStatus::Ready));
        assert_eq!(state.percent, 100);

        state.apply(&UpdateMsg::error("disk full"));
        assert_eq!(state.status, UpdateStatus::Error);
        assert_eq!(state.error.as_deref(), Some("disk full"));

        state.apply(&UpdateMsg::status(UpdateStatus::Uptodate));
        assert_eq!((state.percent, state.error.as_deref()), (0, None));
    }

    #[test]
    fn test_file_name_from_url() {
        let manifest = Manifest {
            version: "1.2.0".into(),
            url: "https://example.com/releases/Aura-1.2.0.dmg?sig=abc".into(),
            notes: None,
        };
        assert_eq!(file_name_for(&manifest), "Aura-1.2.0.dmg");

        let bare = Manifest {
            url: "https://example.com/".into(),
            ..manifest
        };
        assert_eq!(file_name_for(&bare), "aura-1.2.0.bin");
    }

    struct FakeUpdater {
        manifest: Option<Manifest>,
        fail_download: bool,
    }

    #[async_trait::async_trait]
    impl Updater for FakeUpdater {
        async fn check(&self) -> Result<Option<Manifest>> {
            Ok(self.manifest.clone())
        }

        async fn download(
            &self,
            _manifest: &Manifest,
            on_progress: &(dyn Fn(f64) + Send + Sync),
        ) -> Result<PathBuf> {
            if self.fail_download {
                return Err(AppError::Update("connection reset".into()));
            }
            on_progress(50.0);
            on_progress(100.0);
            Ok(PathBuf::from("/tmp/Aura.dmg"))
        }
    }

    fn statuses(sink: &RecordingSink) -> Vec<String> {
        sink.named(events::UPDATE_MSG)
            .iter()
            .map(|m| m["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_available_update_downloads_automatically() {
        let sink = Arc::new(RecordingSink::default());
        let service = UpdateService::new(
            Arc::new(FakeUpdater {
                manifest: Some(Manifest {
                    version: "9.9.9".into(),
                    url: "https://example.com/Aura.dmg".into(),
                    notes: None,
                }),
                fail_download: false,
            }),
            sink.clone(),
        );

        let state = service.check_for_updates().await.unwrap();
        assert_eq!(state.status, UpdateStatus::Ready);
        assert_eq!(state.percent, 100);
        assert_eq!(
            statuses(&sink),
            vec!["checking", "available", "downloading", "downloading", "downloading", "ready"]
        );
        assert_eq!(service.installer().unwrap(), PathBuf::from("/tmp/Aura.dmg"));
    }

    #[tokio::test]
    async fn test_no_update_reports_uptodate() {
        let sink = Arc::new(RecordingSink::default());
        let service = UpdateService::new(
            Arc::new(FakeUpdater {
                manifest: None,
                fail_download: false,
            }),
            sink.clone(),
        );

        let state = service.check_for_updates().await.unwrap();
        assert_eq!(state.status, UpdateStatus::Uptodate);
        assert!(service.installer().is_err());
        assert!(service.download_update().await.is_err());
    }

    #[tokio::test]
    async fn test_download_failure_sets_error() {
        let sink = Arc::new(RecordingSink::default());
        let service = UpdateService::new(
            Arc::new(FakeUpdater {
                manifest: Some(Manifest {
                    version: "9.9.9".into(),
                    url: "https://example.com/Aura.dmg".into(),
                    notes: None,
                }),
                fail_download: true,
            }),
            sink.clone(),
        );

        assert!(service.check_for_updates().await.is_err());
        let state = service.state();
        assert_eq!(state.status, UpdateStatus::Error);
        assert_eq!(state.error.as_deref(), Some("Update error: connection reset"));
    }

    #[tokio::test]
    async fn test_missing_manifest_url_is_uptodate() {
        let updater = HttpUpdater::new(Client::new(), None, "0.1.0", std::env::temp_dir());
        assert!(updater.check().await.unwrap().is_none());
    }
}
