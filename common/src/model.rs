//! Values exchanged between the protocol driver, the reconciler and
//! whatever renders them.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Address every request URL is built from.
///
/// Usually the bare gateway IPv4 address; `host:port` is accepted so the
/// client can reach a camera behind a forwarded port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraAddress(String);

impl CameraAddress {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `http://<addr><path>`; `path` must start with `/`.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.0, path)
    }

    /// `rtsp://<addr><path>`; `path` must start with `/`.
    pub fn rtsp_url(&self, path: &str) -> String {
        format!("rtsp://{}{}", self.0, path)
    }
}

impl Default for CameraAddress {
    fn default() -> Self {
        Self("192.168.0.1".to_string())
    }
}

impl From<Ipv4Addr> for CameraAddress {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.to_string())
    }
}

impl fmt::Display for CameraAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of the link to one physical camera.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// A recording stored on the camera, as listed by the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFileRecord {
    /// Base name, e.g. `20230101_120000.MP4`.
    pub filename: String,
    pub download_url: String,
    pub thumbnail_url: String,
    /// Display string as reported by the camera, `Unknown` when absent.
    pub size: String,
    /// Display string as reported by the camera, empty when absent.
    pub time: String,
}

/// SD card capacity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl StorageInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Percentage of the card in use, `0.0` for an unknown capacity.
    pub fn percent_used(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }

    pub fn formatted_total(&self) -> String {
        format_bytes(self.total_bytes)
    }

    pub fn formatted_free(&self) -> String {
        format_bytes(self.free_bytes)
    }

    pub fn formatted_used(&self) -> String {
        format_bytes(self.used_bytes())
    }
}

/// Render a byte count with binary units and two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// One status poll. Never persisted; the next poll supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub is_recording: bool,
    pub has_sd_card: bool,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            is_recording: false,
            has_sd_card: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_derived_values() {
        let info = StorageInfo {
            total_bytes: 4000,
            free_bytes: 1000,
        };
        assert_eq!(info.used_bytes(), 3000);
        assert!((info.percent_used() - 75.0).abs() < 1e-9);

        let empty = StorageInfo::default();
        assert_eq!(empty.percent_used(), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(30 * 1024 * 1024 * 1024), "30.00 GB");
    }

    #[test]
    fn test_address_urls() {
        let addr = CameraAddress::from(Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(addr.http_url("/cgi-bin/Config.cgi"), "http://192.168.0.1/cgi-bin/Config.cgi");
        assert_eq!(addr.rtsp_url("/liveRTSP/av1"), "rtsp://192.168.0.1/liveRTSP/av1");
        assert_eq!(CameraAddress::default(), addr);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(
            ConnectionState::Error("Handshake Failed".into()).to_string(),
            "error: Handshake Failed"
        );
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
