//! Configuration parsing – reads a `KEY=VALUE` file such as
//! `/etc/dashlink/dashlink.conf`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::model::CameraAddress;

/// Client configuration.
///
/// Every key is optional; a missing or unparsable value falls back to
/// the default from [`Config::default`].
#[derive(Debug, Clone)]
pub struct Config {
    // ── camera ───────────────────────────────────────────────────────
    /// Fixed camera address.  When unset the Wi-Fi gateway is used.
    pub camera_address: Option<CameraAddress>,
    /// Protocol driver name, e.g. `novatek`.
    pub device_family: String,

    // ── timing ───────────────────────────────────────────────────────
    pub request_timeout_ms: u64,
    pub handshake_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub status_poll_interval_secs: u64,
    /// How long after an explicit record command poll results that
    /// contradict it are ignored.
    pub command_settle_ms: u64,

    // ── wi-fi ────────────────────────────────────────────────────────
    pub wifi_auto_connect: bool,
    pub wifi_ssid: String,
    pub wifi_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_address: None,
            device_family: "novatek".to_string(),
            request_timeout_ms: 3000,
            handshake_delay_ms: 150,
            heartbeat_interval_secs: 3,
            status_poll_interval_secs: 2,
            command_settle_ms: 3000,
            wifi_auto_connect: true,
            wifi_ssid: "OpenDash_Cam".to_string(),
            wifi_password: String::new(),
        }
    }
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/dashlink/dashlink.conf"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_millis(self.command_settle_ms)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot read config {path}: {source}")]
pub struct ConfigError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

/// Read and parse a `KEY=VALUE` configuration file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError {
        path: path.display().to_string(),
        source,
    })?;
    let config = from_str(&text);
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Build a [`Config`] from the text of a configuration file.
pub fn from_str(text: &str) -> Config {
    let map = parse_conf(text);
    let defaults = Config::default();

    let get = |key: &str| -> Option<String> { map.get(key).cloned() };
    let get_u64 = |key: &str, default: u64| -> u64 {
        match get(key) {
            Some(v) => v.parse().unwrap_or_else(|_| {
                warn!("Ignoring invalid {key}={v:?}, using {default}");
                default
            }),
            None => default,
        }
    };
    let get_bool = |key: &str, default: bool| -> bool {
        match get(key) {
            Some(v) => parse_bool(&v).unwrap_or_else(|| {
                warn!("Ignoring invalid {key}={v:?}, using {default}");
                default
            }),
            None => default,
        }
    };

    Config {
        camera_address: get("CAMERA_ADDRESS")
            .filter(|s| !s.is_empty())
            .map(CameraAddress::new),
        device_family: get("DEVICE_FAMILY")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.device_family),

        request_timeout_ms: get_u64("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
        handshake_delay_ms: get_u64("HANDSHAKE_DELAY_MS", defaults.handshake_delay_ms),
        heartbeat_interval_secs: get_u64(
            "HEARTBEAT_INTERVAL_SECS",
            defaults.heartbeat_interval_secs,
        ),
        status_poll_interval_secs: get_u64(
            "STATUS_POLL_INTERVAL_SECS",
            defaults.status_poll_interval_secs,
        ),
        command_settle_ms: get_u64("COMMAND_SETTLE_MS", defaults.command_settle_ms),

        wifi_auto_connect: get_bool("WIFI_AUTO_CONNECT", defaults.wifi_auto_connect),
        wifi_ssid: get("WIFI_SSID").unwrap_or(defaults.wifi_ssid),
        wifi_password: get("WIFI_PASSWORD").unwrap_or(defaults.wifi_password),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
