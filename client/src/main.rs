//! dashlink – connects to a Wi-Fi dashcam and runs one command against it.
//!
//! The camera is found through the configured address or the default
//! gateway of the Wi-Fi link, woken up with the firmware handshake, and
//! then driven through the session API.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dashlink_client::reconciler::{RecordCommand, ToggleAction};
use dashlink_client::session::Dashcam;
use dashlink_client::settings::MemorySettings;
use dashlink_common::config::{self, Config};
use dashlink_common::discovery::SystemGateway;
use dashlink_common::model::{DeviceStatus, StorageInfo};

use cli::{Cli, Command};

/// Pause between connection attempts in `watch`.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // ── load config ──────────────────────────────────────────────────
    let config = load_config(cli.config.as_deref())?;
    let settings = Arc::new(MemorySettings::from_config(&config));
    let dashcam = Dashcam::new(config, Box::new(SystemGateway), settings)
        .context("Cannot set up camera session")?;

    // ── ctrl-c ───────────────────────────────────────────────────────
    let token = CancellationToken::new();
    let signal = token.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        signal.cancel();
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── run ──────────────────────────────────────────────────────────
    let out = Output { json: cli.json };
    let result = tokio::select! {
        _ = token.cancelled() => Ok(()),
        result = run(&dashcam, cli.command, out, &token) => result,
    };

    dashcam.disconnect();
    result
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return config::load(path).context("Config load failed");
    }
    let default = Path::new(Config::default_path());
    if default.exists() {
        config::load(default).context("Config load failed")
    } else {
        info!("No config at {}, using defaults", default.display());
        Ok(Config::default())
    }
}

async fn run(dashcam: &Dashcam, command: Command, out: Output, token: &CancellationToken) -> Result<()> {
    match command {
        Command::Watch => return watch(dashcam, out, token).await,
        Command::Status => {
            connect(dashcam).await?;
            let status = dashcam.device_status().await.context("Status query failed")?;
            out.status(&status, *dashcam.audio_enabled().borrow());
        }
        Command::StreamUrl => {
            connect(dashcam).await?;
            let url = dashcam.live_stream_url().await;
            out.value("stream_url", &url, || url.clone());
        }
        Command::Files => {
            connect(dashcam).await?;
            let files = dashcam.refresh_files().await;
            out.value("files", &files, || {
                if files.is_empty() {
                    return "No recordings on card".to_string();
                }
                files
                    .iter()
                    .map(|f| format!("{:<28} {:>12} {:<20} {}", f.filename, f.size, f.time, f.download_url))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        Command::Storage => {
            connect(dashcam).await?;
            let Some(info) = dashcam.refresh_storage().await else {
                bail!("Camera did not report storage capacity");
            };
            out.storage(&info);
        }
        Command::Record => {
            connect(dashcam).await?;
            let action = dashcam
                .toggle_recording()
                .await
                .context("Record toggle failed")?;
            out.done(record_message(action));
        }
        Command::Photo => {
            connect(dashcam).await?;
            dashcam.take_photo().await.context("Photo failed")?;
            out.done("Photo taken");
        }
        Command::Delete { name } => {
            connect(dashcam).await?;
            dashcam.delete_file(&name).await.context("Delete failed")?;
            out.done(&format!("Deleted {name}"));
        }
        Command::Format { yes } => {
            if !yes {
                bail!("Formatting erases every recording on the card; pass --yes to confirm");
            }
            connect(dashcam).await?;
            dashcam.format_sd_card().await.context("Format failed")?;
            out.done("SD card formatted");
        }
        Command::Audio { state } => {
            connect(dashcam).await?;
            dashcam
                .set_audio_recording(state.enabled())
                .await
                .context("Audio setting failed")?;
            out.done(if state.enabled() {
                "Audio recording on"
            } else {
                "Audio recording off"
            });
        }
        Command::Wifi { ssid, password } => {
            connect(dashcam).await?;
            dashcam
                .update_wifi(&ssid, &password)
                .await
                .context("Wi-Fi update failed")?;
            out.done(&format!("Camera Wi-Fi set to {ssid}; its access point is restarting"));
        }
    }
    Ok(())
}

async fn connect(dashcam: &Dashcam) -> Result<()> {
    dashcam.connect().await.context("Cannot connect to camera")
}

fn record_message(action: ToggleAction) -> &'static str {
    match action {
        ToggleAction::Send(RecordCommand::Start) => "Recording started",
        ToggleAction::Send(RecordCommand::Stop) => "Recording stopped",
        ToggleAction::Sync(true) => "Camera was already recording",
        ToggleAction::Sync(false) => "Camera had already stopped recording",
    }
}

/// Stay connected, reconnecting after failures, and print every change.
async fn watch(dashcam: &Dashcam, out: Output, token: &CancellationToken) -> Result<()> {
    let mut state = dashcam.state();
    let mut recording = dashcam.recording();
    let mut sd_card = dashcam.has_sd_card();

    let retry = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            () = &mut retry, if !dashcam.is_connected() => {
                if let Err(e) = dashcam.connect().await {
                    warn!("Connection failed: {e}; retrying in {}s", RECONNECT_DELAY.as_secs());
                }
                retry.as_mut().reset(tokio::time::Instant::now() + RECONNECT_DELAY);
            }
            Ok(()) = state.changed() => {
                let value = state.borrow_and_update().to_string();
                out.event("state", &value);
            }
            Ok(()) = recording.changed() => {
                let value = *recording.borrow_and_update();
                out.event("recording", &value);
            }
            Ok(()) = sd_card.changed() => {
                let value = *sd_card.borrow_and_update();
                out.event("sd_card", &value);
            }
            else => break,
        }
    }
    Ok(())
}

// ── output ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    at: DateTime<Local>,
    kind: &'a str,
    value: &'a T,
}

#[derive(Serialize)]
struct StatusReport {
    #[serde(flatten)]
    status: DeviceStatus,
    audio_enabled: bool,
}

#[derive(Serialize)]
struct StorageReport {
    #[serde(flatten)]
    info: StorageInfo,
    used_bytes: u64,
    percent_used: f64,
}

impl Output {
    fn print_json(value: &impl Serialize) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!("Cannot serialize output: {e}"),
        }
    }

    /// A single named value; `text` renders it for humans.
    fn value<T: Serialize>(&self, key: &str, value: &T, text: impl FnOnce() -> String) {
        if self.json {
            Self::print_json(&serde_json::json!({ key: value }));
        } else {
            println!("{}", text());
        }
    }

    fn done(&self, message: &str) {
        if self.json {
            Self::print_json(&serde_json::json!({ "ok": true, "message": message }));
        } else {
            println!("{message}");
        }
    }

    fn event<T: Serialize>(&self, kind: &str, value: &T) {
        let event = Event {
            at: Local::now(),
            kind,
            value,
        };
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Cannot serialize event: {e}"),
            }
        } else {
            let rendered = serde_json::to_string(value).unwrap_or_default();
            println!("{} {kind}: {}", event.at.format("%H:%M:%S"), rendered.trim_matches('"'));
        }
    }

    fn status(&self, status: &DeviceStatus, audio_enabled: bool) {
        if self.json {
            Self::print_json(&StatusReport {
                status: *status,
                audio_enabled,
            });
        } else {
            println!("Recording: {}", if status.is_recording { "yes" } else { "no" });
            println!("SD card:   {}", if status.has_sd_card { "present" } else { "missing" });
            println!("Audio:     {}", if audio_enabled { "on" } else { "off" });
        }
    }

    fn storage(&self, info: &StorageInfo) {
        if self.json {
            Self::print_json(&StorageReport {
                info: *info,
                used_bytes: info.used_bytes(),
                percent_used: info.percent_used(),
            });
        } else {
            println!("Total: {}", info.formatted_total());
            println!("Used:  {} ({:.1}%)", info.formatted_used(), info.percent_used());
            println!("Free:  {}", info.formatted_free());
        }
    }
}
