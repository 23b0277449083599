//! The camera session: one owned object per physical camera.
//!
//! [`Dashcam`] ties the protocol driver, the reconciler, the gateway
//! resolver and the settings store together, and publishes everything a
//! front end renders on `watch` channels.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dashlink_common::config::Config;
use dashlink_common::discovery::GatewayResolver;
use dashlink_common::model::{
    CameraAddress, ConnectionState, DeviceStatus, StorageInfo, VideoFileRecord,
};

use crate::error::CameraError;
use crate::protocol::{self, CameraProtocol, DeviceFamily};
use crate::reconciler::{RecordCommand, Reconciler, ToggleAction};
use crate::settings::SettingsStore;

/// Reason published when no Wi-Fi gateway can be found.
pub const NO_WIFI: &str = "No Wi-Fi Connection Found";

pub struct Dashcam {
    config: Config,
    protocol: Arc<dyn CameraProtocol>,
    resolver: Box<dyn GatewayResolver>,
    settings: Arc<dyn SettingsStore>,
    reconciler: Arc<Reconciler>,
    files: watch::Sender<Vec<VideoFileRecord>>,
    storage: watch::Sender<Option<StorageInfo>>,
    polling: Mutex<Option<CancellationToken>>,
}

impl Dashcam {
    /// Build a session with the driver named by `DEVICE_FAMILY`.
    pub fn new(
        config: Config,
        resolver: Box<dyn GatewayResolver>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, CameraError> {
        let family: DeviceFamily = config.device_family.parse()?;
        let protocol = protocol::create(family, &config)?;
        info!("Using {family} driver");
        Ok(Self::with_protocol(config, protocol, resolver, settings))
    }

    pub fn with_protocol(
        config: Config,
        protocol: Arc<dyn CameraProtocol>,
        resolver: Box<dyn GatewayResolver>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(protocol.clone(), &config));
        Self {
            config,
            protocol,
            resolver,
            settings,
            reconciler,
            files: watch::channel(Vec::new()).0,
            storage: watch::channel(None).0,
            polling: Mutex::new(None),
        }
    }

    // ── lifecycle ────────────────────────────────────────────────────────

    /// Find the camera, run the handshake and start status polling.
    ///
    /// Any previous link is dropped first.  On failure the connection
    /// state carries the reason and `connect` can simply be called again.
    pub async fn connect(&self) -> Result<(), CameraError> {
        self.disconnect();
        self.protocol.begin_discovery();

        let address = match self.locate() {
            Some(address) => address,
            None => {
                self.protocol.discovery_failed(NO_WIFI);
                return Err(CameraError::NoGateway);
            }
        };

        self.protocol.connect(address).await?;
        self.start_polling();
        Ok(())
    }

    /// Connect when the stored settings allow it.  Returns whether a
    /// connection was attempted.
    pub async fn auto_connect(&self) -> Result<bool, CameraError> {
        if !self.settings.wifi().auto_connect {
            info!("Auto-connect disabled");
            return Ok(false);
        }
        self.connect().await?;
        Ok(true)
    }

    /// Stop polling and the heartbeat, and drop the link.  Safe in any state.
    pub fn disconnect(&self) {
        if let Some(token) = self
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        self.protocol.disconnect();
        self.reconciler.reset();
    }

    fn locate(&self) -> Option<CameraAddress> {
        if let Some(address) = &self.config.camera_address {
            debug!("Using configured camera address {address}");
            return Some(address.clone());
        }
        self.resolver.gateway().map(CameraAddress::from)
    }

    fn start_polling(&self) {
        let token = CancellationToken::new();
        let previous = self
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let reconciler = self.reconciler.clone();
        tokio::spawn(async move { reconciler.run(token).await });
    }

    // ── observers ────────────────────────────────────────────────────────

    pub fn family(&self) -> DeviceFamily {
        self.protocol.family()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.protocol.state()
    }

    pub fn is_connected(&self) -> bool {
        self.protocol.state().borrow().is_connected()
    }

    pub fn recording(&self) -> watch::Receiver<bool> {
        self.reconciler.recording()
    }

    pub fn has_sd_card(&self) -> watch::Receiver<bool> {
        self.reconciler.has_sd_card()
    }

    pub fn audio_enabled(&self) -> watch::Receiver<bool> {
        self.reconciler.audio_enabled()
    }

    pub fn files(&self) -> watch::Receiver<Vec<VideoFileRecord>> {
        self.files.subscribe()
    }

    pub fn storage(&self) -> watch::Receiver<Option<StorageInfo>> {
        self.storage.subscribe()
    }

    pub fn recording_duration(&self) -> String {
        self.reconciler.recording_duration()
    }

    // ── commands ─────────────────────────────────────────────────────────

    pub async fn live_stream_url(&self) -> String {
        self.protocol.live_stream_url().await
    }

    pub async fn toggle_recording(&self) -> Result<ToggleAction, CameraError> {
        self.reconciler.toggle_recording().await
    }

    pub async fn start_recording(&self) -> Result<(), CameraError> {
        self.reconciler.send(RecordCommand::Start).await
    }

    pub async fn stop_recording(&self) -> Result<(), CameraError> {
        self.reconciler.send(RecordCommand::Stop).await
    }

    pub async fn take_photo(&self) -> Result<(), CameraError> {
        self.protocol.take_photo().await
    }

    pub async fn delete_file(&self, filename: &str) -> Result<(), CameraError> {
        self.protocol.delete_file(filename).await?;
        self.refresh_files().await;
        Ok(())
    }

    pub async fn format_sd_card(&self) -> Result<(), CameraError> {
        self.protocol.format_sd_card().await?;
        self.refresh_files().await;
        self.refresh_storage().await;
        Ok(())
    }

    pub async fn set_audio_recording(&self, enabled: bool) -> Result<(), CameraError> {
        self.reconciler.set_audio(enabled).await
    }

    pub async fn toggle_audio(&self) -> Result<bool, CameraError> {
        self.reconciler.toggle_audio().await
    }

    /// Change the camera's access-point credentials.  They are stored
    /// only once the camera accepted all of them; the link drops shortly
    /// after.
    pub async fn update_wifi(&self, ssid: &str, password: &str) -> Result<(), CameraError> {
        self.protocol.set_wifi_credentials(ssid, password).await?;
        self.settings.store_wifi_credentials(ssid, password);
        Ok(())
    }

    /// Reload the file list and publish it.
    pub async fn refresh_files(&self) -> Vec<VideoFileRecord> {
        let files = self.protocol.file_list().await;
        debug!("{} file(s) on card", files.len());
        self.files.send_replace(files.clone());
        files
    }

    /// Reload the card capacity and publish it.  A failed read keeps the
    /// last known value.
    pub async fn refresh_storage(&self) -> Option<StorageInfo> {
        match self.protocol.storage_info().await {
            Some(info) => {
                self.storage.send_replace(Some(info));
                Some(info)
            }
            None => {
                warn!("Storage info unavailable");
                None
            }
        }
    }

    /// Poll the camera once, publishing the result like the background poll.
    pub async fn device_status(&self) -> Result<DeviceStatus, CameraError> {
        self.reconciler.poll_once().await
    }
}

impl Drop for Dashcam {
    fn drop(&mut self) {
        self.disconnect();
    }
}
