//! Stored preferences the session reads and updates.

use std::sync::{PoisonError, RwLock};

use dashlink_common::config::Config;
use tracing::info;

/// Wi-Fi preferences for the camera's access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSettings {
    pub auto_connect: bool,
    pub ssid: String,
    pub password: String,
}

pub trait SettingsStore: Send + Sync {
    fn wifi(&self) -> WifiSettings;

    /// Remember credentials the camera has accepted.
    fn store_wifi_credentials(&self, ssid: &str, password: &str);
}

/// Settings held in memory for the lifetime of the process.
#[derive(Debug)]
pub struct MemorySettings {
    wifi: RwLock<WifiSettings>,
}

impl MemorySettings {
    pub fn new(wifi: WifiSettings) -> Self {
        Self {
            wifi: RwLock::new(wifi),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(WifiSettings {
            auto_connect: config.wifi_auto_connect,
            ssid: config.wifi_ssid.clone(),
            password: config.wifi_password.clone(),
        })
    }
}

impl SettingsStore for MemorySettings {
    fn wifi(&self) -> WifiSettings {
        self.wifi
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_wifi_credentials(&self, ssid: &str, password: &str) {
        let mut wifi = self.wifi.write().unwrap_or_else(PoisonError::into_inner);
        wifi.ssid = ssid.to_string();
        wifi.password = password.to_string();
        info!("Stored Wi-Fi credentials for {ssid}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = dashlink_common::config::from_str("WIFI_AUTO_CONNECT=false\nWIFI_PASSWORD=hunter22\n");
        let settings = MemorySettings::from_config(&config);
        let wifi = settings.wifi();
        assert!(!wifi.auto_connect);
        assert_eq!(wifi.ssid, "OpenDash_Cam");
        assert_eq!(wifi.password, "hunter22");
    }

    #[test]
    fn test_store_credentials_keeps_auto_connect() {
        let settings = MemorySettings::from_config(&Config::default());
        settings.store_wifi_credentials("RoadCam", "secret123");
        assert_eq!(
            settings.wifi(),
            WifiSettings {
                auto_connect: true,
                ssid: "RoadCam".into(),
                password: "secret123".into(),
            }
        );
    }
}
