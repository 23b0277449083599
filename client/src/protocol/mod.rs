//! Camera protocol drivers.
//!
//! Each firmware family speaks its own dialect over HTTP.  The rest of
//! the client only sees [`CameraProtocol`]; [`create`] picks the driver
//! for a [`DeviceFamily`].

pub mod novatek;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use dashlink_common::config::Config;
use dashlink_common::model::{
    CameraAddress, ConnectionState, DeviceStatus, StorageInfo, VideoFileRecord,
};

use crate::error::CameraError;

pub use novatek::NovatekProtocol;

/// Everything a driver can do with one physical camera.
///
/// A driver owns the [`ConnectionState`] of its link; only the driver
/// mutates it.  Commands issued while not connected fail with
/// [`CameraError::NotConnected`] without touching the network.
#[async_trait]
pub trait CameraProtocol: Send + Sync {
    fn family(&self) -> DeviceFamily;

    /// Observe the connection state.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Enter `Scanning` while the caller looks for the camera's address.
    fn begin_discovery(&self);

    /// Discovery found no camera; enter `Error(reason)`.
    fn discovery_failed(&self, reason: &str);

    /// Run the wake-up handshake and start the heartbeat on success.
    async fn connect(&self, address: CameraAddress) -> Result<(), CameraError>;

    /// RTSP URL of the live preview.  Never fails: falls back to the
    /// default channel when the camera cannot tell.
    async fn live_stream_url(&self) -> String;

    /// (Re)start the keep-alive loop for the current link.
    fn start_heartbeat(&self);

    /// Stop the heartbeat and enter `Disconnected`.  Idempotent.
    fn disconnect(&self);

    async fn start_recording(&self) -> Result<(), CameraError>;
    async fn stop_recording(&self) -> Result<(), CameraError>;
    async fn take_photo(&self) -> Result<(), CameraError>;
    async fn delete_file(&self, filename: &str) -> Result<(), CameraError>;
    async fn format_sd_card(&self) -> Result<(), CameraError>;
    async fn set_audio_recording(&self, enabled: bool) -> Result<(), CameraError>;
    async fn set_wifi_credentials(&self, ssid: &str, password: &str) -> Result<(), CameraError>;

    async fn device_status(&self) -> Result<DeviceStatus, CameraError>;

    /// Recordings on the card; empty when unavailable.
    async fn file_list(&self) -> Vec<VideoFileRecord>;

    /// Card capacity; `None` when unavailable.
    async fn storage_info(&self) -> Option<StorageInfo>;
}

/// Firmware families with a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFamily {
    /// Novatek-based cameras with the HiHz `Config.cgi` interface.
    #[default]
    Novatek,
}

impl FromStr for DeviceFamily {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "novatek" | "hihz" => Ok(Self::Novatek),
            other => Err(CameraError::UnknownFamily(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Novatek => f.write_str("novatek"),
        }
    }
}

/// Build the driver for `family`.
pub fn create(family: DeviceFamily, config: &Config) -> Result<Arc<dyn CameraProtocol>, CameraError> {
    match family {
        DeviceFamily::Novatek => Ok(Arc::new(NovatekProtocol::new(config)?)),
    }
}
