//! Driver for Novatek-based dashcams (HiHz `Config.cgi` firmware).
//!
//! Connection lifecycle:
//! 1. wake-up: three `Config.cgi` commands, strictly in order with a
//!    short pause between them – the firmware drops commands that
//!    arrive out of order or too fast;
//! 2. live view: the active preview channel decides the RTSP path;
//! 3. heartbeat: a status-only keep-alive request every few seconds.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use dashlink_common::config::Config;
use dashlink_common::model::{
    CameraAddress, ConnectionState, DeviceStatus, StorageInfo, VideoFileRecord,
};
use dashlink_common::parse::{
    delete_property, is_format_success, is_success, parse_file_list, parse_preview_channel,
    parse_storage, recording_from_response, sd_card_from_response, stream_path,
};

use super::{CameraProtocol, DeviceFamily};
use crate::error::CameraError;
use crate::transport::{http_client, Expect, Reply, Transport};

/// Reason published when the wake-up sequence fails.
pub const HANDSHAKE_FAILED: &str = "Handshake Failed";

const WAKE_UP_SEQUENCE: [&str; 3] = [
    "action=set&property=Net&value=connect",
    "action=set&property=MovieLive&value=1",
    "action=play&property=Live&value=1",
];

const HEARTBEAT_QUERY: &str = "action=get&property=hbt&value=playback";
const PREVIEW_CHANNEL_QUERY: &str = "action=get&property=Camera.Preview.RTSP.av";
const RECORD_STATUS_QUERY: &str = "action=get&property=Camera.Preview.MJPEG.status.record";
const SD_STATUS_QUERY: &str = "action=get&property=Camera.Menu.SD0";
const FILE_LIST_QUERY: &str = "action=dir&property=Normal&format=all&count=100&from=0";
const STORAGE_QUERY: &str = "action=get&property=SDCard.Capacity";

/// Start and stop are the same firmware toggle.
const RECORD_TOGGLE: &str = "action=set&property=Video&value=record";
const CAPTURE_PHOTO: &str = "action=set&property=Camera.Capture&value=1";
const WIFI_RESET: &str = "action=set&property=Net.Dev.1.Type&value=AP&property=Net&value=reset";

/// `ipc` command code that formats the card.
const FORMAT_COMMAND: u32 = 3015;

const DEFAULT_CHANNEL: u32 = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct NovatekProtocol {
    client: reqwest::Client,
    handshake_delay: Duration,
    heartbeat_interval: Duration,
    state: watch::Sender<ConnectionState>,
    /// Last address a connection was attempted with.
    address: Mutex<CameraAddress>,
    /// Present only while `Connected`.
    link: Mutex<Option<Transport>>,
    /// Cancelled on disconnect or when a new connection attempt starts;
    /// the heartbeat token is its child.
    connection: Mutex<CancellationToken>,
    heartbeat: Mutex<Option<CancellationToken>>,
}

impl NovatekProtocol {
    pub fn new(config: &Config) -> Result<Self, CameraError> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            client: http_client(config.request_timeout())?,
            handshake_delay: config.handshake_delay(),
            heartbeat_interval: config.heartbeat_interval(),
            state,
            address: Mutex::new(config.camera_address.clone().unwrap_or_default()),
            link: Mutex::new(None),
            connection: Mutex::new(CancellationToken::new()),
            heartbeat: Mutex::new(None),
        })
    }

    fn transport(&self) -> Result<Transport, CameraError> {
        lock(&self.link).clone().ok_or(CameraError::NotConnected)
    }

    /// Send a command and run its reply through [`is_success`].
    async fn command(&self, what: &str, query: &str) -> Result<(), CameraError> {
        let transport = self.transport()?;
        command_on(&transport, what, query).await
    }
}

impl Drop for NovatekProtocol {
    fn drop(&mut self) {
        lock(&self.connection).cancel();
    }
}

async fn command_on(transport: &Transport, what: &str, query: &str) -> Result<(), CameraError> {
    debug!("{what}: {query}");
    let result = match transport.text(query).await {
        Ok(body) if is_success(Some(&body)) => Ok(()),
        Ok(body) => Err(CameraError::Rejected(body)),
        Err(e) => Err(e),
    };
    match &result {
        Ok(()) => debug!("{what}: accepted"),
        Err(e) => warn!("{what} failed: {e}"),
    }
    result
}

/// Phase A: wake the firmware up, one command at a time.
async fn wake_up(transport: &Transport, delay: Duration) -> Result<(), CameraError> {
    for (step, query) in WAKE_UP_SEQUENCE.iter().enumerate() {
        if step > 0 {
            tokio::time::sleep(delay).await;
        }
        let reply = match transport.text(query).await {
            Ok(body) if is_success(Some(&body)) => Ok(()),
            Ok(body) => Err(CameraError::Rejected(body)),
            Err(e) => Err(e),
        };
        if let Err(e) = reply {
            return Err(CameraError::Handshake {
                step,
                source: Box::new(e),
            });
        }
        debug!("Wake-up step {step} accepted");
    }
    Ok(())
}

/// Phase C: keep-alive until `token` is cancelled.
///
/// Misses are logged only; the link counts as alive until a command fails.
async fn heartbeat_loop(transport: Transport, interval: Duration, token: CancellationToken) {
    debug!("Heartbeat started for {}", transport.address());
    loop {
        let tick = tokio::select! {
            _ = token.cancelled() => break,
            result = transport.send(HEARTBEAT_QUERY, Expect::StatusCode) => result,
        };
        match tick {
            Ok(Reply::Status(200)) => trace!("Heartbeat ok"),
            Ok(Reply::Status(code)) => warn!("Heartbeat missed: HTTP {code}"),
            Ok(Reply::Body(body)) => warn!("Heartbeat missed: unexpected body {body:?}"),
            Err(e) => warn!("Heartbeat failed: {e}"),
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Heartbeat stopped for {}", transport.address());
}

#[async_trait]
impl CameraProtocol for NovatekProtocol {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Novatek
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn begin_discovery(&self) {
        self.state.send_replace(ConnectionState::Scanning);
    }

    fn discovery_failed(&self, reason: &str) {
        warn!("Discovery failed: {reason}");
        self.state
            .send_replace(ConnectionState::Error(reason.to_string()));
    }

    async fn connect(&self, address: CameraAddress) -> Result<(), CameraError> {
        // One link at a time: drop whatever was there before.
        let token = CancellationToken::new();
        std::mem::replace(&mut *lock(&self.connection), token.clone()).cancel();
        lock(&self.heartbeat).take();
        lock(&self.link).take();

        *lock(&self.address) = address.clone();
        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to camera at {address}");

        let transport = Transport::new(self.client.clone(), address.clone());
        let handshake = tokio::select! {
            _ = token.cancelled() => {
                info!("Connection attempt to {address} cancelled");
                return Err(CameraError::NotConnected);
            }
            result = wake_up(&transport, self.handshake_delay) => result,
        };

        if let Err(e) = handshake {
            warn!("Handshake with {address} failed: {e}");
            self.state
                .send_replace(ConnectionState::Error(HANDSHAKE_FAILED.to_string()));
            return Err(e);
        }

        *lock(&self.link) = Some(transport);
        self.state.send_replace(ConnectionState::Connected);
        info!("Connected to camera at {address}");
        self.start_heartbeat();
        Ok(())
    }

    async fn live_stream_url(&self) -> String {
        let address = lock(&self.address).clone();
        let channel = match self.transport() {
            Ok(transport) => match transport.text(PREVIEW_CHANNEL_QUERY).await {
                Ok(body) => parse_preview_channel(&body).unwrap_or_else(|e| {
                    debug!("{e}; using channel {DEFAULT_CHANNEL}");
                    DEFAULT_CHANNEL
                }),
                Err(e) => {
                    debug!("Preview channel query failed: {e}; using channel {DEFAULT_CHANNEL}");
                    DEFAULT_CHANNEL
                }
            },
            Err(_) => DEFAULT_CHANNEL,
        };
        let url = address.rtsp_url(&format!("/liveRTSP/{}", stream_path(channel)));
        debug!("Live stream: {url}");
        url
    }

    fn start_heartbeat(&self) {
        let Ok(transport) = self.transport() else {
            debug!("Not connected; heartbeat not started");
            return;
        };
        let token = lock(&self.connection).child_token();
        if let Some(previous) = lock(&self.heartbeat).replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(heartbeat_loop(transport, self.heartbeat_interval, token).in_current_span());
    }

    fn disconnect(&self) {
        lock(&self.connection).cancel();
        lock(&self.heartbeat).take();
        if lock(&self.link).take().is_some() {
            info!("Disconnected from camera at {}", lock(&self.address));
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn start_recording(&self) -> Result<(), CameraError> {
        self.command("Record toggle (start)", RECORD_TOGGLE).await
    }

    async fn stop_recording(&self) -> Result<(), CameraError> {
        self.command("Record toggle (stop)", RECORD_TOGGLE).await
    }

    async fn take_photo(&self) -> Result<(), CameraError> {
        self.command("Photo", CAPTURE_PHOTO).await
    }

    async fn delete_file(&self, filename: &str) -> Result<(), CameraError> {
        let transport = self.transport()?;
        let property = delete_property(filename, transport.address());
        info!("Deleting {filename} (property={property})");
        command_on(&transport, "Delete", &format!("action=del&property={property}")).await
    }

    async fn format_sd_card(&self) -> Result<(), CameraError> {
        let transport = self.transport()?;
        warn!("Formatting SD card on {}", transport.address());
        let body = transport.exec(FORMAT_COMMAND).await?;
        if is_format_success(&body) {
            info!("SD card formatted");
            Ok(())
        } else {
            warn!("Format rejected: {body:?}");
            Err(CameraError::Rejected(body))
        }
    }

    async fn set_audio_recording(&self, enabled: bool) -> Result<(), CameraError> {
        let value = if enabled { "On" } else { "Off" };
        self.command(
            "Audio recording",
            &format!("action=set&property=SoundRecord&value={value}"),
        )
        .await
    }

    async fn set_wifi_credentials(&self, ssid: &str, password: &str) -> Result<(), CameraError> {
        let transport = self.transport()?;
        info!("Updating camera Wi-Fi (ssid={ssid})");

        let ssid_query = format!(
            "action=set&property=Net.WIFI_AP.SSID&value={}",
            urlencoding::encode(ssid)
        );
        command_on(&transport, "Set SSID", &ssid_query).await?;

        let key_query = format!(
            "action=set&property=Net.WIFI_AP.CryptoKey&value={}",
            urlencoding::encode(password)
        );
        command_on(&transport, "Set password", &key_query).await?;

        // The camera restarts its access point after this; losing the
        // link right afterwards is expected.
        command_on(&transport, "Wi-Fi reset", WIFI_RESET).await?;
        info!("Wi-Fi settings applied; camera access point is restarting");
        Ok(())
    }

    async fn device_status(&self) -> Result<DeviceStatus, CameraError> {
        let transport = self.transport()?;
        let record = transport.text(RECORD_STATUS_QUERY).await?;
        let sd = match transport.text(SD_STATUS_QUERY).await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("SD status query failed: {e}");
                None
            }
        };
        let status = DeviceStatus {
            is_recording: recording_from_response(Some(&record)),
            has_sd_card: sd_card_from_response(sd.as_deref()),
        };
        trace!("Status poll: {status:?}");
        Ok(status)
    }

    async fn file_list(&self) -> Vec<VideoFileRecord> {
        let Ok(transport) = self.transport() else {
            return Vec::new();
        };
        match transport.text(FILE_LIST_QUERY).await {
            Ok(xml) if xml.is_empty() => Vec::new(),
            Ok(xml) => parse_file_list(&xml, transport.address()),
            Err(e) => {
                warn!("File list request failed: {e}");
                Vec::new()
            }
        }
    }

    async fn storage_info(&self) -> Option<StorageInfo> {
        let transport = self.transport().ok()?;
        let body = match transport.text(STORAGE_QUERY).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Storage request failed: {e}");
                return None;
            }
        };
        match parse_storage(&body) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("{e}");
                None
            }
        }
    }
}
